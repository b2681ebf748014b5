//! QRWC Adapter: a typed façade over [`crate::transport::Transport`] using
//! a `RetryExecutor`/`RetryConfig` pattern, adapted so every call site
//! passes its own policy instead of sharing one crate-wide config, and
//! known Core methods are request builders rather than free-form
//! method-name strings.

use crate::error::{BridgeError, BridgeResult};
use crate::model::ControlValue;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::transport::Transport;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Duration;

/// Per-call options for [`QrwcAdapter::send_command`].
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub max_retries: Option<u32>,
    pub retry_base_ms: u64,
    pub retry_factor: f64,
    pub timeout: Duration,
}

impl SendOptions {
    pub fn reads() -> Self {
        Self {
            max_retries: None,
            retry_base_ms: 100,
            retry_factor: 2.0,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn writes() -> Self {
        Self {
            max_retries: Some(0),
            retry_base_ms: 100,
            retry_factor: 2.0,
            timeout: Duration::from_secs(5),
        }
    }
}

/// The Core methods the adapter is required to support.
#[derive(Debug, Clone)]
pub enum QrwcMethod {
    StatusGet,
    GetComponents,
    GetControls { name: String },
    ComponentGet { name: String, controls: Vec<String> },
    ComponentSet { name: String, controls: Vec<Value> },
    ControlGetValues { names: Vec<String> },
    ControlSetValues { name: String, value: ControlValue },
    ControlSetRamp { name: String, value: ControlValue, ramp_seconds: f64 },
    ChangeGroupAddControl { id: String, controls: Vec<String> },
    ChangeGroupAddComponentControl { id: String, component: String, controls: Vec<String> },
    ChangeGroupRemove { id: String, controls: Vec<String> },
    ChangeGroupClear { id: String },
    ChangeGroupPoll { id: String },
    ChangeGroupAutoPoll { id: String, rate_seconds: f64 },
    ChangeGroupInvalidate { id: String },
    ChangeGroupDestroy { id: String },
}

impl QrwcMethod {
    fn wire(&self) -> (&'static str, Value) {
        match self {
            QrwcMethod::StatusGet => ("StatusGet", json!({})),
            QrwcMethod::GetComponents => ("Component.GetComponents", json!({})),
            QrwcMethod::GetControls { name } => {
                ("Component.GetControls", json!({"Name": name}))
            }
            QrwcMethod::ComponentGet { name, controls } => {
                ("Component.Get", json!({"Name": name, "Controls": controls}))
            }
            QrwcMethod::ComponentSet { name, controls } => {
                ("Component.Set", json!({"Name": name, "Controls": controls}))
            }
            QrwcMethod::ControlGetValues { names } => {
                ("Control.GetValues", json!({"Names": names}))
            }
            QrwcMethod::ControlSetValues { name, value } => {
                ("Control.SetValues", json!([{"Name": name, "Value": value}]))
            }
            QrwcMethod::ControlSetRamp { name, value, ramp_seconds } => (
                "Control.SetRamp",
                json!([{"Name": name, "Value": value, "Ramp": ramp_seconds}]),
            ),
            QrwcMethod::ChangeGroupAddControl { id, controls } => {
                ("ChangeGroup.AddControl", json!({"Id": id, "Controls": controls}))
            }
            QrwcMethod::ChangeGroupAddComponentControl { id, component, controls } => (
                "ChangeGroup.AddComponentControl",
                json!({"Id": id, "Component": {"Name": component, "Controls": controls}}),
            ),
            QrwcMethod::ChangeGroupRemove { id, controls } => {
                ("ChangeGroup.Remove", json!({"Id": id, "Controls": controls}))
            }
            QrwcMethod::ChangeGroupClear { id } => ("ChangeGroup.Clear", json!({"Id": id})),
            QrwcMethod::ChangeGroupPoll { id } => ("ChangeGroup.Poll", json!({"Id": id})),
            QrwcMethod::ChangeGroupAutoPoll { id, rate_seconds } => {
                ("ChangeGroup.AutoPoll", json!({"Id": id, "Rate": rate_seconds}))
            }
            QrwcMethod::ChangeGroupInvalidate { id } => {
                ("ChangeGroup.Invalidate", json!({"Id": id}))
            }
            QrwcMethod::ChangeGroupDestroy { id } => ("ChangeGroup.Destroy", json!({"Id": id})),
        }
    }

    /// Reads retry by default (2); writes do not (0).
    fn default_options(&self) -> SendOptions {
        match self {
            QrwcMethod::StatusGet
            | QrwcMethod::GetComponents
            | QrwcMethod::GetControls { .. }
            | QrwcMethod::ComponentGet { .. }
            | QrwcMethod::ControlGetValues { .. }
            | QrwcMethod::ChangeGroupPoll { .. } => {
                let mut opts = SendOptions::reads();
                opts.max_retries = Some(2);
                opts
            }
            _ => SendOptions::writes(),
        }
    }
}

pub struct QrwcAdapter {
    transport: Arc<Transport>,
}

impl QrwcAdapter {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `sendCommand(method, params, opts?)`.
    pub async fn send_command(&self, method: QrwcMethod, opts: Option<SendOptions>) -> BridgeResult<Value> {
        let opts = opts.unwrap_or_else(|| method.default_options());
        let (name, params) = method.wire();
        let retry = RetryExecutor::new(RetryConfig {
            max_retries: opts.max_retries.unwrap_or(0),
            base_delay_ms: opts.retry_base_ms,
            factor: opts.retry_factor,
        });

        let transport = Arc::clone(&self.transport);
        let timeout = opts.timeout;
        retry
            .execute(|| {
                let transport = Arc::clone(&transport);
                let params = params.clone();
                async move { transport.send(name, params, timeout).await }
            })
            .await
    }
}

/// Narrow adapter trait consumed by the Batch Executor; keeps `batch.rs`
/// ignorant of `QrwcMethod`'s wire shapes.
#[async_trait::async_trait]
impl crate::batch::ControlWriter for QrwcAdapter {
    async fn get_value(&self, name: &str) -> BridgeResult<ControlValue> {
        let result = self
            .send_command(
                QrwcMethod::ControlGetValues { names: vec![name.to_string()] },
                None,
            )
            .await?;
        parse_single_control_value(&result, name)
    }

    async fn set_value(&self, name: &str, value: ControlValue, ramp: Option<f64>) -> BridgeResult<()> {
        let method = match ramp {
            Some(ramp_seconds) => QrwcMethod::ControlSetRamp {
                name: name.to_string(),
                value,
                ramp_seconds,
            },
            None => QrwcMethod::ControlSetValues { name: name.to_string(), value },
        };
        self.send_command(method, None).await.map(|_| ())
    }
}

fn parse_single_control_value(result: &Value, name: &str) -> BridgeResult<ControlValue> {
    let entries = result.as_array().ok_or_else(|| {
        BridgeError::Internal("Control.GetValues did not return an array".into())
    })?;
    let entry = entries
        .iter()
        .find(|e| e.get("Name").and_then(Value::as_str) == Some(name))
        .ok_or_else(|| BridgeError::ControlNotFound(name.to_string()))?;
    let value = entry
        .get("Value")
        .ok_or_else(|| BridgeError::Internal("control entry missing Value".into()))?;
    serde_json::from_value(value.clone()).map_err(BridgeError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_methods_map_to_documented_wire_names() {
        assert_eq!(QrwcMethod::StatusGet.wire().0, "StatusGet");
        assert_eq!(QrwcMethod::GetComponents.wire().0, "Component.GetComponents");
        assert_eq!(
            QrwcMethod::ChangeGroupDestroy { id: "g1".into() }.wire().0,
            "ChangeGroup.Destroy"
        );
    }

    #[test]
    fn reads_default_to_two_retries_writes_to_zero() {
        let read = QrwcMethod::StatusGet.default_options();
        assert_eq!(read.max_retries, Some(2));
        let write = QrwcMethod::ControlSetValues {
            name: "a".into(),
            value: ControlValue::Number(1.0),
        }
        .default_options();
        assert_eq!(write.max_retries, Some(0));
    }

    #[test]
    fn parse_single_control_value_finds_matching_name() {
        let result = json!([{"Name": "a.gain", "Value": 1.5}, {"Name": "b.gain", "Value": 2.0}]);
        let value = parse_single_control_value(&result, "b.gain").unwrap();
        assert_eq!(value, ControlValue::Number(2.0));
    }

    #[test]
    fn parse_single_control_value_missing_name_errors() {
        let result = json!([{"Name": "a.gain", "Value": 1.5}]);
        let err = parse_single_control_value(&result, "missing").unwrap_err();
        assert!(matches!(err, BridgeError::ControlNotFound(_)));
    }
}
