//! Control State Cache: a bounded, TTL-swept map from control name to
//! [`ControlState`], the exclusive owner of that state. Built on the `lru`
//! crate the way a focused dependency is reached for rather than
//! hand-rolling an intrusive list, with `stateChanged`/`cacheEvicted`
//! events on a `broadcast` channel -- typed channels instead of emitters on
//! every layer.

use crate::model::{ControlMetadata, ControlSource, ControlState, ControlValue};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Lru,
    Ttl,
    Memory,
}

#[derive(Debug, Clone)]
pub enum CacheEvent {
    StateChanged {
        name: String,
        old: Option<ControlValue>,
        new: ControlValue,
    },
    CacheEvicted {
        name: String,
        reason: EvictionReason,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CacheStatistics {
    pub entries: usize,
    pub capacity: usize,
    pub evictions_lru: u64,
    pub evictions_ttl: u64,
}

struct Entry {
    state: ControlState,
    inserted_at: Instant,
}

struct Inner {
    map: LruCache<String, Entry>,
    ttl: Duration,
    evictions_lru: u64,
    evictions_ttl: u64,
}

/// Bounded map from control name to [`ControlState`] with LRU eviction and
/// a per-entry TTL. `ControlValue` equality (ignoring timestamp/source/
/// metadata) is used for change detection.
pub struct ControlStateCache {
    inner: Mutex<Inner>,
    events: broadcast::Sender<CacheEvent>,
}

impl ControlStateCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("capacity must be non-zero");
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner {
                map: LruCache::new(capacity),
                ttl,
                evictions_lru: 0,
                evictions_ttl: 0,
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("cache mutex poisoned")
    }

    pub fn get(&self, name: &str) -> Option<ControlState> {
        let mut inner = self.lock();
        let ttl = inner.ttl;
        let expired = inner
            .map
            .peek(name)
            .map(|entry| entry.inserted_at.elapsed() >= ttl)
            .unwrap_or(false);
        if expired {
            inner.map.pop(name);
            inner.evictions_ttl += 1;
            let _ = self.events.send(CacheEvent::CacheEvicted {
                name: name.to_string(),
                reason: EvictionReason::Ttl,
            });
            return None;
        }
        inner.map.get(name).map(|entry| entry.state.clone())
    }

    pub fn get_many(&self, names: &[String]) -> HashMap<String, ControlState> {
        names
            .iter()
            .filter_map(|name| self.get(name).map(|state| (name.clone(), state)))
            .collect()
    }

    /// Inserts/updates one entry, emitting `stateChanged` when the value
    /// differs by strict equality from the prior entry (timestamp, source,
    /// metadata are ignored for change detection).
    pub fn set(
        &self,
        name: &str,
        value: ControlValue,
        source: ControlSource,
        timestamp: u64,
        metadata: Option<ControlMetadata>,
    ) {
        let old_value = self.get(name).map(|s| s.value);
        let changed = old_value.as_ref() != Some(&value);

        let mut inner = self.lock();
        let evicted = inner.map.push(
            name.to_string(),
            Entry {
                state: ControlState {
                    name: name.to_string(),
                    value: value.clone(),
                    timestamp,
                    source,
                    metadata,
                },
                inserted_at: Instant::now(),
            },
        );
        if let Some((evicted_name, _)) = evicted {
            if evicted_name != name {
                inner.evictions_lru += 1;
                let _ = self.events.send(CacheEvent::CacheEvicted {
                    name: evicted_name,
                    reason: EvictionReason::Lru,
                });
            }
        }
        drop(inner);

        if changed {
            let _ = self.events.send(CacheEvent::StateChanged {
                name: name.to_string(),
                old: old_value,
                new: value,
            });
        }
    }

    /// Batch mutation: emits one `stateChanged` per name, never a single
    /// aggregated event -- change-group correctness depends on this.
    pub fn set_many(&self, entries: Vec<(String, ControlValue, ControlSource, u64)>) {
        for (name, value, source, timestamp) in entries {
            self.set(&name, value, source, timestamp, None);
        }
    }

    pub fn delete(&self, name: &str) -> bool {
        self.lock().map.pop(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().map.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn clear(&self) {
        self.lock().map.clear();
    }

    /// All live, non-expired entries, for snapshot persistence. Does not
    /// consult or mutate TTL bookkeeping the way `get` does; a restored
    /// snapshot gets a fresh TTL clock starting from restore time.
    pub fn snapshot(&self) -> Vec<ControlState> {
        self.lock().map.iter().map(|(_, entry)| entry.state.clone()).collect()
    }

    /// Seeds the cache from a persisted snapshot. Entries observe the
    /// same LRU capacity as any other insert; entries beyond capacity are
    /// silently dropped, oldest-snapshotted-first.
    pub fn restore(&self, entries: Vec<ControlState>) {
        for state in entries {
            self.set(&state.name.clone(), state.value, state.source, state.timestamp, state.metadata);
        }
    }

    pub fn statistics(&self) -> CacheStatistics {
        let inner = self.lock();
        CacheStatistics {
            entries: inner.map.len(),
            capacity: inner.map.cap().get(),
            evictions_lru: inner.evictions_lru,
            evictions_ttl: inner.evictions_ttl,
        }
    }

    /// Sweeps every entry for TTL expiry; intended to be driven by a
    /// periodic `cleanupIntervalMs` task.
    pub fn sweep_expired(&self) -> usize {
        let expired_names: Vec<String> = {
            let mut inner = self.lock();
            let ttl = inner.ttl;
            inner
                .map
                .iter()
                .filter(|(_, entry)| entry.inserted_at.elapsed() >= ttl)
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in &expired_names {
            let mut inner = self.lock();
            inner.map.pop(name);
            inner.evictions_ttl += 1;
            drop(inner);
            let _ = self.events.send(CacheEvent::CacheEvicted {
                name: name.clone(),
                reason: EvictionReason::Ttl,
            });
        }
        expired_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_cache() -> ControlStateCache {
        ControlStateCache::new(2, Duration::from_secs(3600))
    }

    #[test]
    fn set_and_get_round_trips() {
        let cache = state_cache();
        cache.set("a.gain", ControlValue::Number(1.0), ControlSource::Core, 1, None);
        let state = cache.get("a.gain").unwrap();
        assert_eq!(state.value, ControlValue::Number(1.0));
    }

    #[test]
    fn unchanged_value_does_not_emit_state_changed() {
        let cache = state_cache();
        let mut events = cache.subscribe();
        cache.set("a.gain", ControlValue::Number(1.0), ControlSource::Core, 1, None);
        cache.set("a.gain", ControlValue::Number(1.0), ControlSource::Core, 2, None);

        let mut changed_count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CacheEvent::StateChanged { .. }) {
                changed_count += 1;
            }
        }
        assert_eq!(changed_count, 1);
    }

    #[test]
    fn lru_eviction_drops_oldest_entry() {
        let cache = state_cache();
        cache.set("a", ControlValue::Number(1.0), ControlSource::Core, 1, None);
        cache.set("b", ControlValue::Number(2.0), ControlSource::Core, 1, None);
        cache.set("c", ControlValue::Number(3.0), ControlSource::Core, 1, None);
        assert!(!cache.has("a"));
        assert!(cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.statistics().evictions_lru, 1);
    }

    #[test]
    fn ttl_expiry_removes_entry_on_access() {
        let cache = ControlStateCache::new(10, Duration::from_millis(5));
        cache.set("a", ControlValue::Number(1.0), ControlSource::Core, 1, None);
        std::thread::sleep(Duration::from_millis(15));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn set_many_emits_one_event_per_name() {
        let cache = ControlStateCache::new(10, Duration::from_secs(3600));
        let mut events = cache.subscribe();
        cache.set_many(vec![
            ("a".to_string(), ControlValue::Number(1.0), ControlSource::Core, 1),
            ("b".to_string(), ControlValue::Number(2.0), ControlSource::Core, 1),
        ]);
        let mut changed_count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CacheEvent::StateChanged { .. }) {
                changed_count += 1;
            }
        }
        assert_eq!(changed_count, 2);
    }
}
