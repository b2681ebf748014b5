//! `query_qsys_api` -- the one escape hatch to the Core for methods the
//! other seventeen tools don't wrap. Goes straight to the transport with
//! the caller's method name and params verbatim; no response reshaping.

use crate::bridge::Bridge;
use crate::params::QueryQsysApiParams;
use qrwc_core::{BridgeError, BridgeResult};
use serde_json::{json, Value};
use std::time::Duration;

/// Known Q-SYS Core methods that have a dedicated tool and a typed
/// `QrwcMethod` variant; routing those through the raw passthrough would
/// bypass the cache/event-buffer side effects the typed path maintains.
const RESERVED_METHODS: &[&str] = &[
    "StatusGet",
    "Component.GetComponents",
    "Component.GetControls",
    "Control.GetValues",
    "Control.SetValues",
    "Control.SetRamp",
    "ChangeGroup.AddControl",
    "ChangeGroup.AddComponentControl",
    "ChangeGroup.Remove",
    "ChangeGroup.Clear",
    "ChangeGroup.Poll",
    "ChangeGroup.AutoPoll",
    "ChangeGroup.Invalidate",
    "ChangeGroup.Destroy",
];

pub async fn query_qsys_api(bridge: &Bridge, params: QueryQsysApiParams) -> BridgeResult<Value> {
    if params.method.is_empty() {
        return Err(BridgeError::Validation("method must not be empty".into()));
    }
    if RESERVED_METHODS.contains(&params.method.as_str()) {
        return Err(BridgeError::Validation(format!(
            "{} has a dedicated tool; use it instead of queryQsysApi",
            params.method
        )));
    }

    let result = bridge
        .connection
        .transport()
        .send(&params.method, params.params.clone().unwrap_or(json!({})), Duration::from_secs(10))
        .await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_methods_cover_every_typed_qrwc_method() {
        assert!(RESERVED_METHODS.contains(&"Control.SetValues"));
        assert!(!RESERVED_METHODS.contains(&"Mixer.SetCrossPointGain"));
    }
}
