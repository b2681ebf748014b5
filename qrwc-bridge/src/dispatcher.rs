//! Tool Dispatcher (component H): authenticate -> rate-limit -> validate
//! -> invoke handler -> translate errors, per spec.md §4.H's five-step
//! pipeline. `server.rs` is the only other module that calls into this
//! one; everything here is independent of MCP's wire framing.

use crate::auth::{parse_credential, AuthOutcome};
use crate::bridge::Bridge;
use crate::handlers;
use crate::params::*;
use qrwc_core::{http_status, sanitize_message, BridgeError, LatencyTimer};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Caller-supplied identity headers, extracted by `server.rs` from
/// whatever transport-level metadata MCP hands it.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub authorization: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<f64>,
}

impl From<BridgeError> for ToolError {
    fn from(err: BridgeError) -> Self {
        let retry_after_secs = match &err {
            BridgeError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            BridgeError::CircuitOpen { retry_after_ms } => Some(*retry_after_ms as f64 / 1000.0),
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            http_status: http_status(&err),
            message: sanitize_message(&err.to_string()),
            retry_after_secs,
        }
    }
}

fn validation_error(message: impl Into<String>) -> ToolError {
    ToolError::from(BridgeError::Validation(message.into()))
}

fn rate_limited_error(retry_after_secs: f64) -> ToolError {
    ToolError::from(BridgeError::RateLimited { retry_after_secs })
}

fn auth_error(err: crate::auth::AuthError) -> ToolError {
    match err {
        crate::auth::AuthError::Required => ToolError::from(BridgeError::AuthRequired),
        crate::auth::AuthError::Invalid | crate::auth::AuthError::NoSigningKey => {
            ToolError::from(BridgeError::AuthInvalid)
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(raw: &Value) -> Result<T, ToolError> {
    serde_json::from_value(raw.clone()).map_err(|e| validation_error(format!("invalid parameters: {e}")))
}

/// Runs the full dispatch pipeline for one tool call and returns either
/// the handler's JSON result or a `ToolError` -- never a raw
/// `BridgeError`, so `server.rs` never has to know the error taxonomy.
pub async fn dispatch(bridge: &Arc<Bridge>, tool: &str, params: Value, ctx: &CallContext) -> Result<Value, ToolError> {
    let credential = parse_credential(ctx.authorization.as_deref(), ctx.api_key.as_deref());
    let outcome = bridge
        .authenticator
        .authenticate(tool, credential.as_ref())
        .map_err(auth_error)?;

    let client_id = Bridge::client_id_for(&outcome);
    let rate = bridge.rate_limiter.check(client_id.as_deref());
    if !rate.allowed {
        return Err(rate_limited_error(rate.retry_after_secs));
    }

    let timer = LatencyTimer::start(Arc::clone(&bridge.metrics));
    let result = invoke(bridge, tool, params, &outcome).await;
    timer.finish();
    bridge.metrics.record_tool_call(result.is_ok());

    result
}

async fn invoke(bridge: &Bridge, tool: &str, params: Value, _outcome: &AuthOutcome) -> Result<Value, ToolError> {
    match tool {
        "list_components" => {
            let params: ListComponentsParams = parse_params(&params)?;
            handlers::components::list_components(bridge, params).await.map_err(Into::into)
        }
        "get_component_controls" => {
            let params: GetComponentControlsParams = parse_params(&params)?;
            handlers::components::get_component_controls(bridge, params).await.map_err(Into::into)
        }
        "list_controls" => {
            let params: ListControlsParams = parse_params(&params)?;
            handlers::components::list_controls(bridge, params).await.map_err(Into::into)
        }
        "get_all_controls" => {
            let params: GetAllControlsParams = parse_params(&params)?;
            handlers::components::get_all_controls(bridge, params).await.map_err(Into::into)
        }
        "get_control_values" => {
            let params: GetControlValuesParams = parse_params(&params)?;
            handlers::controls::get_control_values(bridge, params).await.map_err(Into::into)
        }
        "set_control_values" => {
            let params: SetControlValuesParams = parse_params(&params)?;
            handlers::controls::set_control_values(bridge, params).await.map_err(Into::into)
        }
        "query_core_status" => {
            let params: QueryCoreStatusParams = parse_params(&params)?;
            handlers::status::query_core_status(bridge, params).await.map_err(Into::into)
        }
        "query_qsys_api" => {
            let params: QueryQsysApiParams = parse_params(&params)?;
            handlers::passthrough::query_qsys_api(bridge, params).await.map_err(Into::into)
        }
        "create_change_group" => {
            let params: CreateChangeGroupParams = parse_params(&params)?;
            handlers::change_groups::create_change_group(bridge, params).await.map_err(Into::into)
        }
        "add_controls_to_change_group" => {
            let params: ChangeGroupControlsParams = parse_params(&params)?;
            handlers::change_groups::add_controls_to_change_group(bridge, params).await.map_err(Into::into)
        }
        "remove_controls_from_change_group" => {
            let params: ChangeGroupControlsParams = parse_params(&params)?;
            handlers::change_groups::remove_controls_from_change_group(bridge, params).await.map_err(Into::into)
        }
        "clear_change_group" => {
            let params: ChangeGroupIdParams = parse_params(&params)?;
            handlers::change_groups::clear_change_group(bridge, params).await.map_err(Into::into)
        }
        "poll_change_group" => {
            let params: ChangeGroupIdParams = parse_params(&params)?;
            handlers::change_groups::poll_change_group(bridge, params).await.map_err(Into::into)
        }
        "set_change_group_auto_poll" => {
            let params: SetChangeGroupAutoPollParams = parse_params(&params)?;
            handlers::change_groups::set_change_group_auto_poll(bridge, params).await.map_err(Into::into)
        }
        "list_change_groups" => handlers::change_groups::list_change_groups(bridge).await.map_err(Into::into),
        "destroy_change_group" => {
            let params: ChangeGroupIdParams = parse_params(&params)?;
            handlers::change_groups::destroy_change_group(bridge, params).await.map_err(Into::into)
        }
        "query_change_events" => {
            let params: QueryChangeEventsParams = parse_params(&params)?;
            handlers::events::query_change_events(bridge, params).await.map_err(Into::into)
        }
        "get_event_statistics" => {
            let params: GetEventStatisticsParams = parse_params(&params)?;
            handlers::events::get_event_statistics(bridge, params).await.map_err(Into::into)
        }
        other => Err(validation_error(format!("unknown tool: {other}"))),
    }
}

/// Every tool name `dispatch` recognizes, in the order spec §6 lists them.
/// `server.rs` uses this to build the MCP `list_tools` response.
pub const TOOL_NAMES: &[&str] = &[
    "list_components",
    "get_component_controls",
    "list_controls",
    "get_all_controls",
    "get_control_values",
    "set_control_values",
    "query_core_status",
    "query_qsys_api",
    "create_change_group",
    "add_controls_to_change_group",
    "remove_controls_from_change_group",
    "clear_change_group",
    "poll_change_group",
    "set_change_group_auto_poll",
    "list_change_groups",
    "destroy_change_group",
    "query_change_events",
    "get_event_statistics",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_is_a_validation_error() {
        let err = validation_error("unknown tool: bogus");
        assert_eq!(err.code, "VALIDATION_ERROR");
    }

    #[test]
    fn tool_names_has_no_duplicates() {
        let mut sorted = TOOL_NAMES.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), TOOL_NAMES.len());
    }
}
