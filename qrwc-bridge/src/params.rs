//! Parameter schemas for the eighteen MCP tools in spec §6. Every struct
//! is `deny_unknown_fields`: an unrecognized field is a `VALIDATION_ERROR`,
//! not a silently ignored one.

use qrwc_core::ControlValue;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListComponentsParams {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub include_properties: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetComponentControlsParams {
    pub component_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlTypeFilter {
    Gain,
    Mute,
    InputSelect,
    OutputSelect,
    All,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListControlsParams {
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub control_type: Option<ControlTypeFilter>,
    #[serde(default)]
    pub include_metadata: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ControlRef {
    pub component: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetControlValuesParams {
    pub controls: Vec<ControlRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetControlEntry {
    pub component: String,
    pub name: String,
    #[serde(default)]
    pub value: Option<ControlValue>,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub ramp: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetControlValuesParams {
    pub controls: Vec<SetControlEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryCoreStatusParams {
    #[serde(default)]
    pub include_design_info: Option<bool>,
    #[serde(default)]
    pub include_network_info: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetAllControlsParams {
    #[serde(default)]
    pub include_metadata: Option<bool>,
    #[serde(default)]
    pub group_by_component: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateChangeGroupParams {
    pub id: String,
    /// Milliseconds; must be >= 30 when present.
    #[serde(default)]
    pub poll_interval: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChangeGroupControlsParams {
    pub id: String,
    pub controls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChangeGroupIdParams {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetChangeGroupAutoPollParams {
    pub id: String,
    pub enabled: bool,
    /// Seconds, within `[0.1, 300]`.
    #[serde(default)]
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTypeFilter {
    Change,
    ThresholdCrossed,
    StateTransition,
    SignificantChange,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryChangeEventsParams {
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub change_group_id: Option<String>,
    #[serde(default)]
    pub control_names: Option<Vec<String>>,
    #[serde(default)]
    pub component_names: Option<Vec<String>>,
    #[serde(default)]
    pub event_types: Option<Vec<EventTypeFilter>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatisticsGroupBy {
    Component,
    Control,
    ChangeGroup,
    Hour,
    Day,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetEventStatisticsParams {
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub group_by: Option<StatisticsGroupBy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryQsysApiParams {
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_is_rejected() {
        let raw = serde_json::json!({"id": "g1", "bogusField": true});
        let result: Result<ChangeGroupIdParams, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn required_field_missing_is_rejected() {
        let raw = serde_json::json!({});
        let result: Result<GetComponentControlsParams, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn camel_case_fields_parse() {
        let raw = serde_json::json!({"componentName": "MainMixer"});
        let parsed: GetComponentControlsParams = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.component_name, "MainMixer");
    }
}
