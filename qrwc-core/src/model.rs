//! Data model: `ControlValue`, `ControlState`, `ChangeGroup`, `CachedEvent`,
//! and the batch executor's `ExecutionResult`. Tagged variants rather than
//! an `any`-typed payload.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A control's value: one of a finite float, a bounded string, or a bool.
/// There is no `Null` variant -- absence is the control not being known to
/// the cache, not a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Number(f64),
    String(String),
    Boolean(bool),
}

impl ControlValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ControlValue::Number(n) => Some(*n),
            ControlValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            ControlValue::String(_) => None,
        }
    }

    /// String representation shown to MCP clients as the `string` field
    /// alongside the typed `value`.
    pub fn as_display_string(&self) -> String {
        match self {
            ControlValue::Number(n) => format!("{n}"),
            ControlValue::String(s) => s.clone(),
            ControlValue::Boolean(b) => b.to_string(),
        }
    }
}

/// Where a `ControlState` entry's value last came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlSource {
    /// Received from Q-SYS Core (poll response or push notification).
    Core,
    /// Inferred by the cache (e.g. seeded from a default, not yet confirmed).
    Cache,
    /// Written by a tool call; flips to `Core` on the next Core confirmation.
    User,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

/// A control's last-known state as held by the Control State Cache. The
/// cache exclusively owns these entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlState {
    pub name: String,
    pub value: ControlValue,
    /// Monotonic nanoseconds since an arbitrary epoch, not wall-clock; only
    /// used to order updates to the *same* control name.
    pub timestamp: u64,
    pub source: ControlSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ControlMetadata>,
}

impl ControlState {
    /// The first dotted segment of a control name is the owning component,
    /// when present.
    pub fn component_name(&self) -> Option<&str> {
        self.name.split_once('.').map(|(component, _)| component)
    }
}

/// A server-side registry of controls whose changes are polled and
/// surfaced as events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeGroup {
    pub id: String,
    #[serde(default)]
    pub controls: Vec<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub auto_poll: bool,
    pub created_at_ms: u64,
}

impl ChangeGroup {
    pub const MAX_ID_LEN: usize = 64;

    pub fn validate_id(id: &str) -> Result<(), crate::error::BridgeError> {
        if id.is_empty() {
            return Err(crate::error::BridgeError::Validation(
                "change group id must not be empty".into(),
            ));
        }
        if id.len() > Self::MAX_ID_LEN {
            return Err(crate::error::BridgeError::Validation(format!(
                "change group id exceeds {} characters",
                Self::MAX_ID_LEN
            )));
        }
        Ok(())
    }
}

/// Classification of a change, per the per-control rules below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Change,
    ThresholdCrossed,
    StateTransition,
    SignificantChange,
}

/// An emitted change, owned exclusively by the Event Buffer. Queries return
/// copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEvent {
    pub group_id: String,
    pub control_name: String,
    pub value: ControlValue,
    pub string_repr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<ControlValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    pub timestamp_ns: u128,
    pub timestamp_ms: u64,
    pub sequence_number: u64,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// Wall-clock "now" in both nanoseconds and milliseconds since the Unix
/// epoch, used only for display/ordering of emitted events -- monotonicity
/// within a control is tracked separately via the cache's own clock.
pub fn now_ns_ms() -> (u128, u64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_nanos(), now.as_millis() as u64)
}

/// Per-control outcome of a batch write, recorded even when the overall
/// batch fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlWriteOutcome {
    pub component: String,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<ControlValue>,
}

/// Result of a transactional batch write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub total_controls: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<ControlWriteOutcome>,
    pub rollback_performed: bool,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_value_has_no_null_variant() {
        let v: ControlValue = serde_json::from_str("-6.0").unwrap();
        assert_eq!(v, ControlValue::Number(-6.0));
        assert!(serde_json::from_str::<ControlValue>("null").is_err());
    }

    #[test]
    fn component_name_from_dotted_control() {
        let state = ControlState {
            name: "MainMixer.gain".to_string(),
            value: ControlValue::Number(0.0),
            timestamp: 0,
            source: ControlSource::Core,
            metadata: None,
        };
        assert_eq!(state.component_name(), Some("MainMixer"));
    }

    #[test]
    fn change_group_id_bounds() {
        assert!(ChangeGroup::validate_id("").is_err());
        assert!(ChangeGroup::validate_id(&"x".repeat(65)).is_err());
        assert!(ChangeGroup::validate_id(&"x".repeat(64)).is_ok());
    }
}
