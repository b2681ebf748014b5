//! MCP wire adapter: the only module that knows about `rmcp`'s request/
//! response shapes. Translates `CallToolRequestParam` to/from the
//! dispatcher's plain `serde_json::Value` interface; every tool's actual
//! behavior lives in `dispatcher.rs` and `handlers/`, not here.

use crate::bridge::Bridge;
use crate::dispatcher::{self, CallContext};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct BridgeServer {
    bridge: Arc<Bridge>,
}

impl BridgeServer {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    fn tool_descriptor(name: &'static str) -> rmcp::model::Tool {
        rmcp::model::Tool {
            name: name.into(),
            description: Some(format!("QRWC bridge tool: {name}").into()),
            input_schema: Arc::new(permissive_object_schema()),
            annotations: None,
        }
    }
}

fn permissive_object_schema() -> Map<String, Value> {
    match json!({"type": "object", "additionalProperties": true}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn error_to_mcp(err: dispatcher::ToolError) -> McpError {
    McpError::invalid_params(err.message, Some(json!({"code": err.code, "httpStatus": err.http_status})))
}

fn result_to_tool_result(value: Value) -> CallToolResult {
    let text = serde_json::to_string(&value).unwrap_or_else(|_| value.to_string());
    CallToolResult::success(vec![Content::text(text)])
}

impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Bridges Q-SYS Remote WebSocket Control (QRWC) Cores to MCP tool calls.".into(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = dispatcher::TOOL_NAMES.iter().map(|name| Self::tool_descriptor(name)).collect();
        Ok(ListToolsResult { tools, next_cursor: None })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let params = request.arguments.map(Value::Object).unwrap_or_else(|| json!({}));
        // Stdio is a single local process-to-process pipe; the bridge
        // accepts per-call auth headers for parity with the design, but a
        // stdio client has no channel to carry them on, so every call is
        // anonymous unless `auth.allow_anonymous` rejects the tool.
        let ctx = CallContext::default();

        match dispatcher::dispatch(&self.bridge, request.name.as_ref(), params, &ctx).await {
            Ok(value) => Ok(result_to_tool_result(value)),
            Err(err) => Err(error_to_mcp(err)),
        }
    }
}
