//! Change-Group Registry: the single registry of control
//! subscriptions, per-group poll timers, and delta detection against the
//! Control State Cache, feeding classified changes into the Event Buffer.
//! Per the design notes ("multiple `ChangeGroupManager` implementations...
//! specify a single registry") this is the *only* change-group
//! abstraction in the workspace -- there is no separate cache-local
//! variant.

use crate::adapter::{QrwcAdapter, QrwcMethod};
use crate::cache::ControlStateCache;
use crate::error::{BridgeError, BridgeResult};
use crate::event_buffer::{EventBuffer, GroupPriority};
use crate::model::{now_ns_ms, CachedEvent, ChangeGroup, ControlSource, ControlValue, EventType};
use async_trait::async_trait;
use qrwc_config::schema::ThresholdRule;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Auto-poll is disabled after this many consecutive Core errors while
/// polling.
const AUTO_POLL_FAILURE_LIMIT: u32 = 3;

/// What the registry needs to read current control values from the Core;
/// kept as a narrow trait (mirroring `batch::ControlWriter`) so `poll` is
/// unit-testable against a fake Core.
#[async_trait]
pub trait ValueReader: Send + Sync {
    async fn get_values(&self, names: &[String]) -> BridgeResult<HashMap<String, ControlValue>>;
}

#[async_trait]
impl ValueReader for QrwcAdapter {
    async fn get_values(&self, names: &[String]) -> BridgeResult<HashMap<String, ControlValue>> {
        let result = self.send_command(
            QrwcMethod::ControlGetValues {
                names: names.to_vec(),
            },
            None,
        ).await?;
        parse_control_values(&result)
    }
}

fn parse_control_values(result: &Value) -> BridgeResult<HashMap<String, ControlValue>> {
    let entries = result.as_array().ok_or_else(|| BridgeError::Internal("Control.GetValues did not return an array".into()))?;
    let mut out = HashMap::with_capacity(entries.len());
    for entry in entries {
        let Some(name) = entry.get("Name").and_then(Value::as_str) else {
            continue;
        };
        let Some(raw_value) = entry.get("Value") else {
            continue;
        };
        if let Ok(value) = serde_json::from_value::<ControlValue>(raw_value.clone()) {
            out.insert(name.to_string(), value);
        }
    }
    Ok(out)
}

fn configured_threshold(name: &str, rules: &[ThresholdRule]) -> Option<f64> {
    let lower = name.to_ascii_lowercase();
    rules.iter().find(|rule| lower.contains(&rule.pattern.to_ascii_lowercase())).map(|rule| rule.threshold)
}

/// Resolves the threshold used for `threshold_crossed` classification:
/// configured override first, then the two name/range-based defaults
/// (`-6` for level/gain-named controls, `0.5` for unitless
/// 0-1 controls), else no threshold applies.
fn default_threshold(name: &str, previous: f64, current: f64, rules: &[ThresholdRule]) -> Option<f64> {
    if let Some(threshold) = configured_threshold(name, rules) {
        return Some(threshold);
    }
    let lower = name.to_ascii_lowercase();
    if lower.contains("level") || lower.contains("gain") {
        return Some(-6.0);
    }
    if (0.0..=1.0).contains(&previous) && (0.0..=1.0).contains(&current) {
        return Some(0.5);
    }
    None
}

/// Pure classification function over `(previous, current, threshold
/// config)` per the per-control rules -- kept free of any I/O
/// so it can be exhaustively unit-tested.
pub fn classify_change(
    name: &str,
    previous: Option<&ControlValue>,
    current: &ControlValue,
    thresholds: &[ThresholdRule],
) -> (EventType, Option<f64>, Option<f64>) {
    if matches!(current, ControlValue::Boolean(_)) {
        return (EventType::StateTransition, None, None);
    }
    if let ControlValue::String(current_str) = current {
        let differs = match previous {
            Some(ControlValue::String(previous_str)) => previous_str != current_str,
            _ => true,
        };
        if differs {
            return (EventType::StateTransition, None, None);
        }
    }

    if let (Some(previous_num), Some(current_num)) =
        (previous.and_then(ControlValue::as_f64), current.as_f64())
    {
        let delta = current_num - previous_num;
        if let Some(threshold) = default_threshold(name, previous_num, current_num, thresholds) {
            let crossed = (previous_num < threshold) != (current_num < threshold);
            if crossed {
                return (EventType::ThresholdCrossed, Some(delta), Some(threshold));
            }
        }
        if previous_num != 0.0 && (delta / previous_num).abs() > 0.05 {
            return (EventType::SignificantChange, Some(delta), None);
        }
        return (EventType::Change, Some(delta), None);
    }

    (EventType::Change, None, None)
}

struct GroupState {
    group: ChangeGroup,
    failure_count: u32,
}

struct GroupHandle {
    state: AsyncMutex<GroupState>,
    /// Serializes polls for this group.
    poll_lock: AsyncMutex<()>,
    auto_poll_cancel: AsyncMutex<Option<CancellationToken>>,
    /// Cancelled on `destroy`, so an in-flight poll unblocks immediately.
    cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct ChangeGroupSummary {
    pub id: String,
    pub control_count: usize,
    pub auto_poll: bool,
    pub poll_interval_ms: Option<u64>,
    pub created_at_ms: u64,
}

/// The single Change-Group Registry. Cheaply `Arc`-shared;
/// `set_auto_poll` spawns a background task that calls back into `poll`.
pub struct ChangeGroupRegistry {
    reader: Arc<dyn ValueReader>,
    cache: Arc<ControlStateCache>,
    events: Arc<EventBuffer>,
    thresholds: Vec<ThresholdRule>,
    groups: StdMutex<HashMap<String, Arc<GroupHandle>>>,
}

impl ChangeGroupRegistry {
    pub fn new(
        reader: Arc<dyn ValueReader>,
        cache: Arc<ControlStateCache>,
        events: Arc<EventBuffer>,
        thresholds: Vec<ThresholdRule>,
    ) -> Arc<Self> {
        Arc::new(Self {
            reader,
            cache,
            events,
            thresholds,
            groups: StdMutex::new(HashMap::new()),
        })
    }

    fn lock_groups(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<GroupHandle>>> {
        self.groups.lock().expect("change-group registry mutex poisoned")
    }

    fn get_handle(&self, id: &str) -> BridgeResult<Arc<GroupHandle>> {
        self.lock_groups().get(id).cloned().ok_or_else(|| BridgeError::ChangeGroupNotFound(id.to_string()))
    }

    /// `create(id, pollInterval?)` -- rejects a duplicate
    /// id with `CHANGE_GROUP_EXISTS`.
    pub fn create(&self, id: &str, poll_interval_ms: Option<u64>) -> BridgeResult<ChangeGroup> {
        ChangeGroup::validate_id(id)?;
        if let Some(ms) = poll_interval_ms {
            if ms < 30 {
                return Err(BridgeError::Validation(
                    "pollInterval must be >= 30ms".into(),
                ));
            }
        }

        let mut groups = self.lock_groups();
        if groups.contains_key(id) {
            return Err(BridgeError::ChangeGroupExists(id.to_string()));
        }

        let group = ChangeGroup {
            id: id.to_string(),
            controls: Vec::new(),
            poll_interval_ms,
            auto_poll: false,
            created_at_ms: now_ns_ms().1,
        };
        let handle = Arc::new(GroupHandle {
            state: AsyncMutex::new(GroupState {
                group: group.clone(),
                failure_count: 0,
            }),
            poll_lock: AsyncMutex::new(()),
            auto_poll_cancel: AsyncMutex::new(None),
            cancel: CancellationToken::new(),
        });
        groups.insert(id.to_string(), handle);
        drop(groups);

        self.events.register_group(id, GroupPriority::Normal);
        Ok(group)
    }

    /// Adds controls to a group's membership, returning the number
    /// actually added (already-present names are not double-counted).
    pub async fn add_controls(&self, id: &str, names: &[String]) -> BridgeResult<usize> {
        let handle = self.get_handle(id)?;
        let mut state = handle.state.lock().await;
        let mut added = 0usize;
        for name in names {
            if !state.group.controls.contains(name) {
                state.group.controls.push(name.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    /// Removes controls from a group's membership, returning the number
    /// actually removed. Removed members stop contributing events
    /// immediately.
    pub async fn remove_controls(&self, id: &str, names: &[String]) -> BridgeResult<usize> {
        let handle = self.get_handle(id)?;
        let mut state = handle.state.lock().await;
        let before = state.group.controls.len();
        state.group.controls.retain(|existing| !names.contains(existing));
        Ok(before - state.group.controls.len())
    }

    pub async fn clear(&self, id: &str) -> BridgeResult<()> {
        let handle = self.get_handle(id)?;
        handle.state.lock().await.group.controls.clear();
        Ok(())
    }

    /// Cancels any running poll or auto-poll timer scoped to `id` and
    /// removes the group; a subsequent `poll` returns
    /// `CHANGE_GROUP_NOT_FOUND`.
    pub async fn destroy(&self, id: &str) -> BridgeResult<()> {
        let handle = {
            self.lock_groups().remove(id).ok_or_else(|| BridgeError::ChangeGroupNotFound(id.to_string()))?
        };
        handle.cancel.cancel();
        if let Some(cancel) = handle.auto_poll_cancel.lock().await.take() {
            cancel.cancel();
        }
        self.events.drop_group(id);
        Ok(())
    }

    /// `setAutoPoll(id, enabled, intervalSeconds?)` -- enabling installs a
    /// timer at `max(intervalSeconds, 0.03s)`; disabling cancels the timer
    /// and clears the failure counter.
    pub async fn set_auto_poll(
        self: &Arc<Self>,
        id: &str,
        enabled: bool,
        interval_secs: Option<f64>,
    ) -> BridgeResult<()> {
        let handle = self.get_handle(id)?;

        if !enabled {
            if let Some(cancel) = handle.auto_poll_cancel.lock().await.take() {
                cancel.cancel();
            }
            let mut state = handle.state.lock().await;
            state.group.auto_poll = false;
            state.failure_count = 0;
            return Ok(());
        }

        let interval_secs = interval_secs.unwrap_or(1.0);
        if !(0.1..=300.0).contains(&interval_secs) {
            return Err(BridgeError::Validation(
                "auto-poll interval must be within [0.1, 300] seconds".into(),
            ));
        }
        let effective_interval = interval_secs.max(0.03);

        if let Some(previous) = handle.auto_poll_cancel.lock().await.take() {
            previous.cancel();
        }
        {
            let mut state = handle.state.lock().await;
            state.group.auto_poll = true;
            state.failure_count = 0;
        }

        let cancel = CancellationToken::new();
        *handle.auto_poll_cancel.lock().await = Some(cancel.clone());

        let registry = Arc::clone(self);
        let id_owned = id.to_string();
        tokio::spawn(async move {
            registry.auto_poll_loop(id_owned, effective_interval, cancel).await;
        });
        Ok(())
    }

    async fn auto_poll_loop(self: Arc<Self>, id: String, interval_secs: f64, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(interval_secs));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let Ok(handle) = self.get_handle(&id) else { return };

            match self.poll(&id).await {
                Ok(_) => {
                    handle.state.lock().await.failure_count = 0;
                }
                Err(e) => {
                    tracing::warn!(group = %id, error = %e, "auto-poll cycle failed");
                    let mut state = handle.state.lock().await;
                    state.failure_count += 1;
                    if state.failure_count >= AUTO_POLL_FAILURE_LIMIT {
                        state.group.auto_poll = false;
                        tracing::warn!(
                            group = %id,
                            "auto-poll disabled after {} consecutive failures",
                            AUTO_POLL_FAILURE_LIMIT
                        );
                        drop(state);
                        if let Some(c) = handle.auto_poll_cancel.lock().await.take() {
                            c.cancel();
                        }
                        return;
                    }
                }
            }
        }
    }

    /// `poll(id)` -- synchronously requests current
    /// member values, diffs against the cache, emits a `CachedEvent` per
    /// changed member, updates the cache, and returns the changes. The
    /// first poll after a membership change reports each new member's
    /// current value as a change (the cache has no prior entry for it).
    pub async fn poll(&self, id: &str) -> BridgeResult<Vec<CachedEvent>> {
        let handle = self.get_handle(id)?;
        let _serialize = handle.poll_lock.lock().await;
        if handle.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let controls = handle.state.lock().await.group.controls.clone();
        if controls.is_empty() {
            return Ok(Vec::new());
        }

        let reader = Arc::clone(&self.reader);
        let names = controls.clone();
        let values = tokio::select! {
            _ = handle.cancel.cancelled() => return Err(BridgeError::Cancelled),
            result = async move { reader.get_values(&names).await } => result?,
        };

        let (timestamp_ns, timestamp_ms) = now_ns_ms();

        let mut emitted = Vec::new();
        for name in &controls {
            let Some(current) = values.get(name) else {
                continue;
            };
            let previous_state = self.cache.get(name);
            let previous_value = previous_state.map(|state| state.value);
            if previous_value.as_ref() == Some(current) {
                continue;
            }

            let (event_type, delta, threshold) =
                classify_change(name, previous_value.as_ref(), current, &self.thresholds);

            let event = CachedEvent {
                group_id: id.to_string(),
                control_name: name.clone(),
                value: current.clone(),
                string_repr: current.as_display_string(),
                previous_value: previous_value.clone(),
                delta,
                timestamp_ns,
                timestamp_ms,
                sequence_number: 0,
                event_type,
                threshold,
            };
            let Some(stored) = self.events.push(id, event) else {
                tracing::warn!(group = %id, control = %name, "event dropped under critical memory pressure");
                continue;
            };
            self.cache.set(name, current.clone(), ControlSource::Core, timestamp_ms, None);
            emitted.push(stored);
        }

        Ok(emitted)
    }

    pub async fn list(&self) -> Vec<ChangeGroupSummary> {
        let handles: Vec<Arc<GroupHandle>> = self.lock_groups().values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            let state = handle.state.lock().await;
            out.push(ChangeGroupSummary {
                id: state.group.id.clone(),
                control_count: state.group.controls.len(),
                auto_poll: state.group.auto_poll,
                poll_interval_ms: state.group.poll_interval_ms,
                created_at_ms: state.group.created_at_ms,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncTestMutex;

    struct FakeReader {
        values: AsyncTestMutex<HashMap<String, ControlValue>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ValueReader for FakeReader {
        async fn get_values(&self, names: &[String]) -> BridgeResult<HashMap<String, ControlValue>> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(BridgeError::CoreError {
                    code: -1,
                    message: "down".into(),
                });
            }
            let values = self.values.lock().await;
            Ok(names.iter().filter_map(|n| values.get(n).map(|v| (n.clone(), v.clone()))).collect())
        }
    }

    fn registry_with(values: HashMap<String, ControlValue>) -> Arc<ChangeGroupRegistry> {
        let reader: Arc<dyn ValueReader> = Arc::new(FakeReader {
            values: AsyncTestMutex::new(values),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let cache = Arc::new(ControlStateCache::new(100, Duration::from_secs(3600)));
        let events = Arc::new(EventBuffer::new(100, Duration::from_secs(300), 500));
        ChangeGroupRegistry::new(reader, cache, events, Vec::new())
    }

    #[test]
    fn duplicate_create_is_rejected_and_leaves_existing_group_untouched() {
        let registry = registry_with(HashMap::new());
        registry.create("g3", None).unwrap();
        let err = registry.create("g3", None).unwrap_err();
        assert!(matches!(err, BridgeError::ChangeGroupExists(_)));
    }

    #[test]
    fn poll_interval_below_30ms_rejected_at_exactly_30ms_accepted() {
        let registry = registry_with(HashMap::new());
        assert!(registry.create("below", Some(29)).is_err());
        assert!(registry.create("exact", Some(30)).is_ok());
    }

    #[tokio::test]
    async fn first_poll_after_membership_change_reports_current_value_as_change() {
        let mut values = HashMap::new();
        values.insert("MainMixer.gain".to_string(), ControlValue::Number(-5.0));
        values.insert("MainMixer.mute".to_string(), ControlValue::Boolean(true));
        let registry = registry_with(values);

        registry.create("g1", None).unwrap();
        registry.add_controls(
            "g1",
            &["MainMixer.gain".to_string(), "MainMixer.mute".to_string()],
        ).await.unwrap();

        let changes = registry.poll("g1").await.unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|e| e.control_name == "MainMixer.gain"));
        assert!(changes.iter().any(|e| e.control_name == "MainMixer.mute" && e.event_type == EventType::StateTransition));
    }

    #[test]
    fn threshold_crossed_matches_level_default_of_minus_six() {
        let (event_type, delta, threshold) = classify_change(
            "A.level",
            Some(&ControlValue::Number(-10.0)),
            &ControlValue::Number(-5.0),
            &[],
        );
        assert_eq!(event_type, EventType::ThresholdCrossed);
        assert_eq!(delta, Some(5.0));
        assert_eq!(threshold, Some(-6.0));
    }

    #[test]
    fn threshold_crossed_respects_configured_override() {
        let rules = vec![ThresholdRule {
            pattern: "custom".to_string(),
            threshold: 10.0,
        }];
        let (event_type, _, threshold) = classify_change(
            "Zone.customParam",
            Some(&ControlValue::Number(5.0)),
            &ControlValue::Number(15.0),
            &rules,
        );
        assert_eq!(event_type, EventType::ThresholdCrossed);
        assert_eq!(threshold, Some(10.0));
    }

    #[tokio::test]
    async fn remove_controls_stops_future_events() {
        let mut values = HashMap::new();
        values.insert("A.gain".to_string(), ControlValue::Number(1.0));
        let registry = registry_with(values);
        registry.create("g1", None).unwrap();
        registry.add_controls("g1", &["A.gain".to_string()]).await.unwrap();
        registry.poll("g1").await.unwrap();

        let removed = registry.remove_controls("g1", &["A.gain".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        let changes = registry.poll("g1").await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn destroy_then_poll_returns_not_found() {
        let registry = registry_with(HashMap::new());
        registry.create("g1", None).unwrap();
        registry.destroy("g1").await.unwrap();
        let err = registry.poll("g1").await.unwrap_err();
        assert!(matches!(err, BridgeError::ChangeGroupNotFound(_)));
    }

    #[tokio::test]
    async fn set_auto_poll_rejects_out_of_bounds_interval() {
        let registry = registry_with(HashMap::new());
        registry.create("g1", None).unwrap();
        let err = registry.set_auto_poll("g1", true, Some(0.01)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        let err = registry.set_auto_poll("g1", true, Some(301.0)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[tokio::test]
    async fn disabling_auto_poll_is_idempotent() {
        let registry = registry_with(HashMap::new());
        registry.create("g1", None).unwrap();
        registry.set_auto_poll("g1", false, None).await.unwrap();
        registry.set_auto_poll("g1", false, None).await.unwrap();
    }

    #[test]
    fn classify_boolean_is_state_transition() {
        let (event_type, _, _) = classify_change(
            "A.mute",
            Some(&ControlValue::Boolean(false)),
            &ControlValue::Boolean(true),
            &[],
        );
        assert_eq!(event_type, EventType::StateTransition);
    }

    #[test]
    fn classify_significant_numeric_change() {
        let (event_type, delta, _) = classify_change(
            "A.unrelated",
            Some(&ControlValue::Number(10.0)),
            &ControlValue::Number(20.0),
            &[],
        );
        assert_eq!(event_type, EventType::SignificantChange);
        assert_eq!(delta, Some(10.0));
    }

    #[test]
    fn classify_small_numeric_change_is_plain_change() {
        let (event_type, _, _) = classify_change(
            "A.unrelated",
            Some(&ControlValue::Number(100.0)),
            &ControlValue::Number(100.5),
            &[],
        );
        assert_eq!(event_type, EventType::Change);
    }
}
