//! `list_components`, `get_component_controls`, `list_controls`,
//! `get_all_controls` -- component/control discovery over `Component.
//! GetComponents` / `Component.GetControls`.

use crate::bridge::Bridge;
use crate::params::{ControlTypeFilter, GetAllControlsParams, GetComponentControlsParams, ListComponentsParams, ListControlsParams};
use qrwc_core::{BridgeError, BridgeResult, QrwcMethod};
use serde_json::{json, Value};

async fn fetch_components(bridge: &Bridge) -> BridgeResult<Vec<Value>> {
    let result = bridge.adapter.send_command(QrwcMethod::GetComponents, None).await?;
    Ok(result.as_array().cloned().unwrap_or_default())
}

async fn fetch_controls(bridge: &Bridge, component_name: &str) -> BridgeResult<Vec<Value>> {
    let result = bridge
        .adapter
        .send_command(QrwcMethod::GetControls { name: component_name.to_string() }, None)
        .await?;
    let controls = result
        .get("Controls")
        .or_else(|| result.as_array().map(|_| &result))
        .cloned()
        .unwrap_or(Value::Null);
    Ok(controls.as_array().cloned().unwrap_or_default())
}

fn control_type_of(name: &str) -> ControlTypeFilter {
    let lower = name.to_ascii_lowercase();
    if lower.contains("gain") || lower.contains("level") {
        ControlTypeFilter::Gain
    } else if lower.contains("mute") {
        ControlTypeFilter::Mute
    } else if lower.contains("input") && lower.contains("select") {
        ControlTypeFilter::InputSelect
    } else if lower.contains("output") && lower.contains("select") {
        ControlTypeFilter::OutputSelect
    } else {
        ControlTypeFilter::All
    }
}

fn render_control(component: &str, raw: &Value, include_metadata: bool) -> Value {
    let name = raw.get("Name").and_then(Value::as_str).unwrap_or_default();
    let mut out = json!({
        "name": name,
        "type": raw.get("Type").cloned().unwrap_or(Value::Null),
        "value": raw.get("Value").cloned().unwrap_or(Value::Null),
        "string": raw.get("String").cloned().unwrap_or(Value::Null),
        "position": raw.get("Position").cloned().unwrap_or(Value::Null),
    });
    if include_metadata {
        out["metadata"] = json!({
            "component": component,
            "min": raw.get("ValueMin").cloned().unwrap_or(Value::Null),
            "max": raw.get("ValueMax").cloned().unwrap_or(Value::Null),
        });
    }
    out
}

pub async fn list_components(bridge: &Bridge, params: ListComponentsParams) -> BridgeResult<Value> {
    let components = fetch_components(bridge).await?;
    let include_properties = params.include_properties.unwrap_or(false);
    let filter = params.filter.as_ref().map(|f| f.to_ascii_lowercase());

    let items: Vec<Value> = components
        .iter()
        .filter(|c| {
            let name = c.get("Name").and_then(Value::as_str).unwrap_or_default();
            filter.as_ref().map(|f| name.to_ascii_lowercase().contains(f.as_str())).unwrap_or(true)
        })
        .map(|c| {
            let mut item = json!({
                "name": c.get("Name").cloned().unwrap_or(Value::Null),
                "type": c.get("Type").cloned().unwrap_or(Value::Null),
            });
            if include_properties {
                item["properties"] = c.get("Properties").cloned().unwrap_or(json!([]));
            }
            item
        })
        .collect();

    Ok(json!({ "count": items.len(), "components": items }))
}

pub async fn get_component_controls(bridge: &Bridge, params: GetComponentControlsParams) -> BridgeResult<Value> {
    if params.component_name.is_empty() {
        return Err(BridgeError::Validation("componentName must not be empty".into()));
    }
    let controls = fetch_controls(bridge, &params.component_name).await?;
    let rendered: Vec<Value> = controls.iter().map(|c| render_control(&params.component_name, c, true)).collect();
    Ok(json!({ "controls": rendered }))
}

pub async fn list_controls(bridge: &Bridge, params: ListControlsParams) -> BridgeResult<Value> {
    let include_metadata = params.include_metadata.unwrap_or(false);
    let component_names: Vec<String> = match &params.component {
        Some(name) => vec![name.clone()],
        None => fetch_components(bridge)
            .await?
            .iter()
            .filter_map(|c| c.get("Name").and_then(Value::as_str).map(String::from))
            .collect(),
    };

    let mut out = Vec::new();
    for component in &component_names {
        let controls = fetch_controls(bridge, component).await?;
        for control in &controls {
            let name = control.get("Name").and_then(Value::as_str).unwrap_or_default();
            if let Some(wanted) = params.control_type {
                if wanted != ControlTypeFilter::All && control_type_of(name) != wanted {
                    continue;
                }
            }
            out.push(render_control(component, control, include_metadata));
        }
    }
    Ok(Value::Array(out))
}

pub async fn get_all_controls(bridge: &Bridge, params: GetAllControlsParams) -> BridgeResult<Value> {
    let include_metadata = params.include_metadata.unwrap_or(false);
    let group_by_component = params.group_by_component.unwrap_or(false);
    let components = fetch_components(bridge).await?;

    if group_by_component {
        let mut grouped = serde_json::Map::new();
        for component in &components {
            let name = component.get("Name").and_then(Value::as_str).unwrap_or_default().to_string();
            let controls = fetch_controls(bridge, &name).await?;
            let rendered: Vec<Value> = controls.iter().map(|c| render_control(&name, c, include_metadata)).collect();
            grouped.insert(name, Value::Array(rendered));
        }
        Ok(Value::Object(grouped))
    } else {
        let mut out = Vec::new();
        for component in &components {
            let name = component.get("Name").and_then(Value::as_str).unwrap_or_default().to_string();
            let controls = fetch_controls(bridge, &name).await?;
            out.extend(controls.iter().map(|c| render_control(&name, c, include_metadata)));
        }
        Ok(json!({ "controls": out, "count": out.len() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_type_inferred_from_name() {
        assert_eq!(control_type_of("gain"), ControlTypeFilter::Gain);
        assert_eq!(control_type_of("mute"), ControlTypeFilter::Mute);
        assert_eq!(control_type_of("input.select"), ControlTypeFilter::InputSelect);
        assert_eq!(control_type_of("routing"), ControlTypeFilter::All);
    }
}
