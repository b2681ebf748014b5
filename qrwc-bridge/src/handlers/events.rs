//! `query_change_events`, `get_event_statistics` -- the Event Buffer's
//! query API (component F) plus a `groupBy` aggregation the buffer itself
//! doesn't need to know about.

use super::split_component;
use crate::params::{
    EventTypeFilter, GetEventStatisticsParams, QueryChangeEventsParams, StatisticsGroupBy,
};
use qrwc_core::{BridgeResult, CachedEvent, EventQuery, EventType};
use serde_json::{json, Value};
use std::collections::HashMap;

fn map_event_type(filter: EventTypeFilter) -> EventType {
    match filter {
        EventTypeFilter::Change => EventType::Change,
        EventTypeFilter::ThresholdCrossed => EventType::ThresholdCrossed,
        EventTypeFilter::StateTransition => EventType::StateTransition,
        EventTypeFilter::SignificantChange => EventType::SignificantChange,
    }
}

fn event_type_label(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Change => "change",
        EventType::ThresholdCrossed => "threshold_crossed",
        EventType::StateTransition => "state_transition",
        EventType::SignificantChange => "significant_change",
    }
}

pub async fn query_change_events(bridge: &crate::bridge::Bridge, params: QueryChangeEventsParams) -> BridgeResult<Value> {
    let query = EventQuery {
        group_id: params.change_group_id.clone(),
        start_time_ms: params.start_time,
        end_time_ms: params.end_time,
        control_names: full_control_names(&params),
        event_types: params.event_types.as_ref().map(|types| types.iter().copied().map(map_event_type).collect()),
        value_filter: None,
        limit: params.limit,
        offset: params.offset,
    };

    let result = bridge.events.query(&query);
    let events: Vec<&CachedEvent> = result
        .events
        .iter()
        .filter(|e| component_matches(e, &params.component_names))
        .collect();

    let offset = params.offset.unwrap_or(0);
    let has_more = offset + events.len() < result.total_matched;

    Ok(json!({
        "events": events,
        "count": events.len(),
        "hasMore": has_more,
    }))
}

fn full_control_names(params: &QueryChangeEventsParams) -> Option<Vec<String>> {
    params.control_names.clone()
}

fn component_matches(event: &CachedEvent, wanted: &Option<Vec<String>>) -> bool {
    let Some(wanted) = wanted else { return true };
    let (component, _) = split_component(&event.control_name);
    wanted.iter().any(|c| c == &component)
}

pub async fn get_event_statistics(bridge: &crate::bridge::Bridge, params: GetEventStatisticsParams) -> BridgeResult<Value> {
    let query = EventQuery {
        group_id: None,
        start_time_ms: params.start_time,
        end_time_ms: params.end_time,
        control_names: None,
        event_types: None,
        value_filter: None,
        limit: Some(qrwc_core::MAX_QUERY_LIMIT),
        offset: None,
    };
    let result = bridge.events.query(&query);

    let group_by = params.group_by.unwrap_or(StatisticsGroupBy::Control);
    let mut buckets: HashMap<String, usize> = HashMap::new();
    for event in &result.events {
        let key = bucket_key(event, group_by);
        *buckets.entry(key).or_insert(0) += 1;
    }

    let mut by_event_type: HashMap<&'static str, usize> = HashMap::new();
    for event in &result.events {
        *by_event_type.entry(event_type_label(event.event_type)).or_insert(0) += 1;
    }

    Ok(json!({
        "statistics": {
            "totalEvents": result.events.len(),
            "groupBy": format!("{group_by:?}"),
            "buckets": buckets,
            "byEventType": by_event_type,
        }
    }))
}

fn bucket_key(event: &CachedEvent, group_by: StatisticsGroupBy) -> String {
    match group_by {
        StatisticsGroupBy::Component => split_component(&event.control_name).0,
        StatisticsGroupBy::Control => event.control_name.clone(),
        StatisticsGroupBy::ChangeGroup => event.group_id.clone(),
        StatisticsGroupBy::Hour => (event.timestamp_ms / 3_600_000).to_string(),
        StatisticsGroupBy::Day => (event.timestamp_ms / 86_400_000).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrwc_core::ControlValue;

    fn event(name: &str, group: &str, ts_ms: u64, event_type: EventType) -> CachedEvent {
        CachedEvent {
            group_id: group.to_string(),
            control_name: name.to_string(),
            value: ControlValue::Number(1.0),
            string_repr: "1".to_string(),
            previous_value: None,
            delta: None,
            timestamp_ns: ts_ms as u128 * 1_000_000,
            timestamp_ms: ts_ms,
            sequence_number: 0,
            event_type,
            threshold: None,
        }
    }

    #[test]
    fn bucket_key_by_component_splits_dotted_name() {
        let e = event("MainMixer.gain", "g1", 0, EventType::Change);
        assert_eq!(bucket_key(&e, StatisticsGroupBy::Component), "MainMixer");
        assert_eq!(bucket_key(&e, StatisticsGroupBy::Control), "MainMixer.gain");
    }

    #[test]
    fn component_filter_matches_only_named_components() {
        let e = event("MainMixer.gain", "g1", 0, EventType::Change);
        assert!(component_matches(&e, &Some(vec!["MainMixer".to_string()])));
        assert!(!component_matches(&e, &Some(vec!["Other".to_string()])));
        assert!(component_matches(&e, &None));
    }
}
