//! `get_control_values`, `set_control_values` -- reads go straight through
//! the adapter and update the cache; writes go through the Batch Executor
//! (component G) so a failing write can roll the batch back.

use super::control_value_json;
use crate::bridge::Bridge;
use crate::params::{GetControlValuesParams, SetControlValuesParams};
use qrwc_core::{
    now_ns_ms, BatchOptions, BridgeError, BridgeResult, ControlSource, ControlValue, ControlWrite,
    QrwcMethod,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn full_name(component: &str, name: &str) -> String {
    if component.is_empty() {
        name.to_string()
    } else {
        format!("{component}.{name}")
    }
}

pub async fn get_control_values(bridge: &Bridge, params: GetControlValuesParams) -> BridgeResult<Value> {
    if params.controls.is_empty() {
        return Err(BridgeError::Validation("controls must not be empty".into()));
    }
    let names: Vec<String> = params.controls.iter().map(|c| full_name(&c.component, &c.name)).collect();

    let result = bridge
        .adapter
        .send_command(QrwcMethod::ControlGetValues { names: names.clone() }, None)
        .await?;
    let entries = result.as_array().ok_or_else(|| BridgeError::Internal("Control.GetValues did not return an array".into()))?;

    let (_, now_ms) = now_ns_ms();
    let mut out = Vec::with_capacity(entries.len());
    for (reference, wire_name) in params.controls.iter().zip(names.iter()) {
        let Some(entry) = entries.iter().find(|e| e.get("Name").and_then(Value::as_str) == Some(wire_name.as_str())) else {
            out.push(json!({
                "component": reference.component,
                "name": reference.name,
                "error": "control not found",
            }));
            continue;
        };
        let Some(raw_value) = entry.get("Value") else { continue };
        let Ok(value) = serde_json::from_value::<ControlValue>(raw_value.clone()) else { continue };
        bridge.cache.set(wire_name, value.clone(), ControlSource::Core, now_ms, None);
        out.push(json!({
            "component": reference.component,
            "name": reference.name,
            "value": control_value_json(&value),
            "string": value.as_display_string(),
            "position": entry.get("Position").cloned().unwrap_or(Value::Null),
        }));
    }

    Ok(json!({ "values": out }))
}

pub async fn set_control_values(bridge: &Bridge, params: SetControlValuesParams) -> BridgeResult<Value> {
    if params.controls.is_empty() {
        return Err(BridgeError::Validation("controls must not be empty".into()));
    }

    let mut writes = Vec::with_capacity(params.controls.len());
    for entry in &params.controls {
        let value = match (&entry.value, entry.position) {
            (Some(value), _) => value.clone(),
            (None, Some(position)) => ControlValue::Number(position.clamp(0.0, 1.0)),
            (None, None) => {
                return Err(BridgeError::Validation(format!(
                    "control {}.{} needs value or position",
                    entry.component, entry.name
                )))
            }
        };
        writes.push(ControlWrite {
            component: entry.component.clone(),
            name: full_name(&entry.component, &entry.name),
            value,
            ramp: entry.ramp,
        });
    }

    let written_values: Vec<ControlValue> = writes.iter().map(|w| w.value.clone()).collect();

    let result = bridge
        .batch
        .execute(writes, BatchOptions::default(), CancellationToken::new())
        .await?;

    // A successful write marks the cache `source=user` until the Core's
    // own confirmation (via a poll or a later `get_control_values`) flips
    // it back to `source=core`.
    let (_, now_ms) = now_ns_ms();
    for (outcome, value) in result.results.iter().zip(written_values.into_iter()) {
        if outcome.success {
            bridge.cache.set(&outcome.name, value, ControlSource::User, now_ms, None);
        }
    }

    Ok(serde_json::to_value(&result).map_err(BridgeError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_joins_component_and_control() {
        assert_eq!(full_name("MainMixer", "gain"), "MainMixer.gain");
        assert_eq!(full_name("", "gain"), "gain");
    }
}
