//! Tool Handlers (component I): one thin async function per MCP tool in
//! spec §6, each a stateless adapter over the Bridge's components (C, E,
//! F, G). Grouped by the area of the tool table they implement.

pub mod change_groups;
pub mod components;
pub mod controls;
pub mod events;
pub mod passthrough;
pub mod status;

use qrwc_core::ControlValue;
use serde_json::Value;

pub(crate) fn control_value_json(value: &ControlValue) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Extracts the `(component, control)` split from a dotted control name,
/// falling back to an empty component when the name carries none.
pub(crate) fn split_component(name: &str) -> (String, String) {
    match name.split_once('.') {
        Some((component, control)) => (component.to_string(), control.to_string()),
        None => (String::new(), name.to_string()),
    }
}
