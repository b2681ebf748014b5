//! Event Buffer: a per-group ring of [`CachedEvent`], plus a process-wide
//! memory-pressure monitor implementing a four-tier `usageFraction` policy,
//! and the full query API. The Event Buffer exclusively owns `CachedEvent`
//! entries; queries return copies.

use crate::model::{CachedEvent, ControlValue, EventType};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPriority {
    Low,
    Normal,
    High,
}

impl Default for GroupPriority {
    fn default() -> Self {
        GroupPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Normal,
    Warn,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFilterOperator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    ChangedTo,
    ChangedFrom,
}

#[derive(Debug, Clone)]
pub struct ValueFilter {
    pub operator: ValueFilterOperator,
    pub value: ControlValue,
}

#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub group_id: Option<String>,
    pub start_time_ms: Option<u64>,
    pub end_time_ms: Option<u64>,
    pub control_names: Option<Vec<String>>,
    pub event_types: Option<Vec<EventType>>,
    pub value_filter: Option<ValueFilter>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Default and maximum `limit`: requests above the maximum are clamped, not
/// rejected.
pub const DEFAULT_QUERY_LIMIT: usize = 1000;
pub const MAX_QUERY_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct EventAggregation {
    pub counts_by_control: HashMap<String, usize>,
    pub min_by_control: HashMap<String, f64>,
    pub max_by_control: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub events: Vec<CachedEvent>,
    pub total_matched: usize,
    pub aggregation: Option<EventAggregation>,
}

struct GroupBuffer {
    events: VecDeque<CachedEvent>,
    max_capacity: usize,
    max_age: Duration,
    priority: GroupPriority,
    next_sequence: u64,
}

impl GroupBuffer {
    fn new(max_capacity: usize, max_age: Duration, priority: GroupPriority) -> Self {
        Self {
            events: VecDeque::new(),
            max_capacity,
            max_age,
            priority,
            next_sequence: 0,
        }
    }

    fn approx_bytes(&self) -> usize {
        // Coarse per-event estimate; precise accounting is unnecessary for
        // a pressure heuristic.
        self.events.len() * 256
    }
}

pub struct EventBuffer {
    groups: Mutex<HashMap<String, GroupBuffer>>,
    default_capacity: usize,
    default_max_age: Duration,
    global_memory_limit_bytes: u64,
    /// Set once usage crosses 0.95 and cleared once it drops back below;
    /// consulted by `push` so `low`-priority groups stop accepting new
    /// events without waiting for the next monitor tick.
    critical: AtomicBool,
}

impl EventBuffer {
    pub fn new(default_capacity: usize, default_max_age: Duration, global_memory_limit_mb: u64) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            default_capacity,
            default_max_age,
            global_memory_limit_bytes: global_memory_limit_mb * 1024 * 1024,
            critical: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, GroupBuffer>> {
        self.groups.lock().expect("event buffer mutex poisoned")
    }

    pub fn register_group(&self, group_id: &str, priority: GroupPriority) {
        self.lock().entry(group_id.to_string()).or_insert_with(|| {
            GroupBuffer::new(self.default_capacity, self.default_max_age, priority)
        });
    }

    pub fn drop_group(&self, group_id: &str) {
        self.lock().remove(group_id);
    }

    /// Appends one event, assigning the next strictly-increasing sequence
    /// number for the group and evicting the oldest entry if at capacity;
    /// sequence numbers are never reused after eviction. Returns the stored
    /// copy (with its assigned sequence number) so callers that need to
    /// report what was actually persisted -- the Change-Group Registry's
    /// `poll` result -- don't have to guess it.
    ///
    /// Returns `None` if the event was refused: under critical memory
    /// pressure (`usageFraction` >= 0.95), `low`-priority groups stop
    /// accepting new events. Otherwise the global memory bound is enforced
    /// before returning, evicting oldest entries from the lowest-priority
    /// group until usage is back under the limit -- callers never observe
    /// the buffer over budget between pushes.
    pub fn push(&self, group_id: &str, mut event: CachedEvent) -> Option<CachedEvent> {
        let mut groups = self.lock();
        let buffer = groups
            .entry(group_id.to_string())
            .or_insert_with(|| GroupBuffer::new(self.default_capacity, self.default_max_age, GroupPriority::Normal));

        if self.critical.load(Ordering::SeqCst) && buffer.priority == GroupPriority::Low {
            return None;
        }

        event.sequence_number = buffer.next_sequence;
        buffer.next_sequence += 1;

        self.evict_expired(buffer);
        if buffer.events.len() >= buffer.max_capacity {
            buffer.events.pop_front();
        }
        buffer.events.push_back(event.clone());

        self.enforce_global_limit(&mut groups);
        Some(event)
    }

    fn evict_expired(&self, buffer: &mut GroupBuffer) {
        let max_age = buffer.max_age;
        let now_ms = crate::model::now_ns_ms().1;
        buffer
            .events
            .retain(|event| now_ms.saturating_sub(event.timestamp_ms) < max_age.as_millis() as u64);
    }

    /// Evicts the oldest entry from the lowest-priority non-empty group,
    /// repeating until total buffered bytes are at or under
    /// `global_memory_limit_bytes`, then refreshes the critical-pressure
    /// flag consulted by `push`. Runs on every insert so the global bound
    /// holds continuously, not just at the periodic monitor tick.
    fn enforce_global_limit(&self, groups: &mut HashMap<String, GroupBuffer>) {
        loop {
            let total_bytes: u64 = groups.values().map(|g| g.approx_bytes() as u64).sum();
            if total_bytes <= self.global_memory_limit_bytes {
                break;
            }
            let Some(lowest) = groups
                .values()
                .filter(|g| !g.events.is_empty())
                .map(|g| g.priority)
                .min_by_key(priority_rank)
            else {
                break;
            };
            let Some(buffer) = groups.values_mut().find(|g| g.priority == lowest && !g.events.is_empty()) else {
                break;
            };
            buffer.events.pop_front();
        }

        let total_bytes: u64 = groups.values().map(|g| g.approx_bytes() as u64).sum();
        let fraction = total_bytes as f64 / self.global_memory_limit_bytes.max(1) as f64;
        self.critical.store(fraction >= 0.95, Ordering::SeqCst);
    }

    /// Process-wide pressure check, driven periodically (default 5s)
    /// externally. Implements four tiers: below 0.80 is normal, [0.80,
    /// 0.90) warns, [0.90, 0.95) force-evicts the oldest 10% from the
    /// lowest-priority groups, and 0.95+ is critical.
    pub fn check_memory_pressure(&self) -> PressureLevel {
        let mut groups = self.lock();
        let total_bytes: usize = groups.values().map(|g| g.approx_bytes()).sum();
        let fraction = total_bytes as f64 / self.global_memory_limit_bytes.max(1) as f64;
        self.critical.store(fraction >= 0.95, Ordering::SeqCst);

        if fraction < 0.80 {
            return PressureLevel::Normal;
        }
        if fraction < 0.90 {
            return PressureLevel::Warn;
        }

        // >= 0.90: force-evict oldest 10% from the lowest-priority groups.
        let lowest_priority = groups
            .values()
            .map(|g| g.priority)
            .min_by_key(priority_rank)
            .unwrap_or(GroupPriority::Normal);
        for buffer in groups.values_mut().filter(|g| g.priority == lowest_priority) {
            let evict_count = buffer.events.len() / 10;
            for _ in 0..evict_count {
                buffer.events.pop_front();
            }
        }

        if fraction < 0.95 {
            PressureLevel::High
        } else {
            PressureLevel::Critical
        }
    }

    /// Query API: results ordered by `(timestampNs, sequenceNumber)`
    /// ascending, `limit` clamped (not rejected) to [`MAX_QUERY_LIMIT`].
    pub fn query(&self, query: &EventQuery) -> QueryResult {
        let groups = self.lock();
        let mut matched: Vec<CachedEvent> = Vec::new();

        let group_ids: Vec<String> = match &query.group_id {
            Some(id) => vec![id.clone()],
            None => groups.keys().cloned().collect(),
        };

        for group_id in &group_ids {
            let Some(buffer) = groups.get(group_id) else { continue };
            for event in &buffer.events {
                if !event_matches(event, query) {
                    continue;
                }
                matched.push(event.clone());
            }
        }

        matched.sort_by(|a, b| (a.timestamp_ns, a.sequence_number).cmp(&(b.timestamp_ns, b.sequence_number)));

        let total_matched = matched.len();
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT);

        let page: Vec<CachedEvent> = matched.into_iter().skip(offset).take(limit).collect();

        QueryResult {
            aggregation: Some(aggregate(&page)),
            events: page,
            total_matched,
        }
    }
}

fn priority_rank(p: &GroupPriority) -> u8 {
    match p {
        GroupPriority::Low => 0,
        GroupPriority::Normal => 1,
        GroupPriority::High => 2,
    }
}

fn event_matches(event: &CachedEvent, query: &EventQuery) -> bool {
    if let Some(start) = query.start_time_ms {
        if event.timestamp_ms < start {
            return false;
        }
    }
    if let Some(end) = query.end_time_ms {
        if event.timestamp_ms > end {
            return false;
        }
    }
    if let Some(names) = &query.control_names {
        if !names.iter().any(|n| n == &event.control_name) {
            return false;
        }
    }
    if let Some(types) = &query.event_types {
        if !types.contains(&event.event_type) {
            return false;
        }
    }
    if let Some(filter) = &query.value_filter {
        if !value_filter_matches(event, filter) {
            return false;
        }
    }
    true
}

/// Non-numeric events are excluded from numeric predicates.
fn value_filter_matches(event: &CachedEvent, filter: &ValueFilter) -> bool {
    match filter.operator {
        ValueFilterOperator::Eq => event.value == filter.value,
        ValueFilterOperator::Neq => event.value != filter.value,
        ValueFilterOperator::ChangedTo => event.value == filter.value,
        ValueFilterOperator::ChangedFrom => {
            event.previous_value.as_ref() == Some(&filter.value)
        }
        ValueFilterOperator::Lt | ValueFilterOperator::Lte | ValueFilterOperator::Gt | ValueFilterOperator::Gte => {
            let (Some(event_num), Some(filter_num)) = (event.value.as_f64(), filter.value.as_f64()) else {
                return false;
            };
            match filter.operator {
                ValueFilterOperator::Lt => event_num < filter_num,
                ValueFilterOperator::Lte => event_num <= filter_num,
                ValueFilterOperator::Gt => event_num > filter_num,
                ValueFilterOperator::Gte => event_num >= filter_num,
                _ => unreachable!(),
            }
        }
    }
}

fn aggregate(events: &[CachedEvent]) -> EventAggregation {
    let mut aggregation = EventAggregation::default();
    for event in events {
        *aggregation.counts_by_control.entry(event.control_name.clone()).or_insert(0) += 1;
        if let Some(n) = event.value.as_f64() {
            aggregation
                .min_by_control
                .entry(event.control_name.clone())
                .and_modify(|m| *m = m.min(n))
                .or_insert(n);
            aggregation
                .max_by_control
                .entry(event.control_name.clone())
                .and_modify(|m| *m = m.max(n))
                .or_insert(n);
        }
    }
    aggregation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(control: &str, value: f64, sequence: u64, timestamp_ms: u64) -> CachedEvent {
        CachedEvent {
            group_id: "g1".into(),
            control_name: control.into(),
            value: ControlValue::Number(value),
            string_repr: value.to_string(),
            previous_value: None,
            delta: None,
            timestamp_ns: timestamp_ms as u128 * 1_000_000,
            timestamp_ms,
            sequence_number: sequence,
            event_type: EventType::Change,
            threshold: None,
        }
    }

    #[test]
    fn sequence_numbers_increase_per_group() {
        let buffer = EventBuffer::new(100, Duration::from_secs(300), 500);
        buffer.push("g1", event("a", 1.0, 0, 1));
        buffer.push("g1", event("a", 2.0, 0, 2));
        let result = buffer.query(&EventQuery::default());
        assert_eq!(result.events[0].sequence_number, 0);
        assert_eq!(result.events[1].sequence_number, 1);
    }

    #[test]
    fn capacity_eviction_drops_oldest() {
        let buffer = EventBuffer::new(2, Duration::from_secs(300), 500);
        buffer.push("g1", event("a", 1.0, 0, 1));
        buffer.push("g1", event("a", 2.0, 0, 2));
        buffer.push("g1", event("a", 3.0, 0, 3));
        let result = buffer.query(&EventQuery::default());
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.events[0].value, ControlValue::Number(2.0));
    }

    #[test]
    fn limit_is_clamped_not_rejected() {
        let buffer = EventBuffer::new(20_000, Duration::from_secs(300), 500);
        for i in 0..20 {
            buffer.push("g1", event("a", i as f64, 0, i));
        }
        let result = buffer.query(&EventQuery {
            limit: Some(50_000),
            ..Default::default()
        });
        assert_eq!(result.events.len(), 20);
    }

    #[test]
    fn value_filter_gte_excludes_lower_values() {
        let buffer = EventBuffer::new(100, Duration::from_secs(300), 500);
        buffer.push("g1", event("a", 1.0, 0, 1));
        buffer.push("g1", event("a", 5.0, 0, 2));
        let result = buffer.query(&EventQuery {
            value_filter: Some(ValueFilter {
                operator: ValueFilterOperator::Gte,
                value: ControlValue::Number(3.0),
            }),
            ..Default::default()
        });
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].value, ControlValue::Number(5.0));
    }

    #[test]
    fn global_limit_evicts_lowest_priority_group_first() {
        let buffer = EventBuffer::new(10_000, Duration::from_secs(300), 1);
        buffer.register_group("low", GroupPriority::Low);
        buffer.register_group("high", GroupPriority::High);

        for i in 0..4000 {
            buffer.push("low", event("a", i as f64, 0, i));
        }
        for i in 0..200 {
            buffer.push("high", event("b", i as f64, 0, i));
        }

        let low_count = buffer
            .query(&EventQuery { group_id: Some("low".into()), ..Default::default() })
            .total_matched;
        let high_count = buffer
            .query(&EventQuery { group_id: Some("high".into()), ..Default::default() })
            .total_matched;

        assert_eq!(high_count, 200);
        assert!(low_count < 4000);
    }

    #[test]
    fn critical_pressure_rejects_low_priority_inserts() {
        let buffer = EventBuffer::new(10_000, Duration::from_secs(300), 1);
        buffer.register_group("low", GroupPriority::Low);
        buffer.register_group("high", GroupPriority::High);

        for i in 0..4000 {
            buffer.push("high", event("a", i as f64, 0, i));
        }

        assert!(buffer.push("low", event("b", 1.0, 0, 9999)).is_none());
        assert!(buffer.push("high", event("a", 1.0, 0, 9999)).is_some());
    }
}
