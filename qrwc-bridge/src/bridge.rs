//! Shared server state: wires the nine components (A-I) together behind
//! one `Arc<Bridge>` handle, the way the grounding crate's `main.rs`
//! assembles `SidecarConfig` into a single `KgcSidecarService`. Tool
//! handlers (`src/handlers/`) borrow this struct; nothing here knows about
//! MCP wire framing.

use crate::auth::Authenticator;
use crate::rate_limit::RateLimiter;
use qrwc_config::BridgeConfig;
use qrwc_core::{
    BatchExecutor, ChangeGroupRegistry, ConnectionConfig, ConnectionManager, ControlStateCache,
    EventBuffer, MetricsCollector, QrwcAdapter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct Bridge {
    pub config: BridgeConfig,
    pub connection: Arc<ConnectionManager>,
    pub adapter: Arc<QrwcAdapter>,
    pub cache: Arc<ControlStateCache>,
    pub registry: Arc<ChangeGroupRegistry>,
    pub events: Arc<EventBuffer>,
    pub batch: Arc<BatchExecutor>,
    pub metrics: Arc<MetricsCollector>,
    pub authenticator: Authenticator,
    pub rate_limiter: RateLimiter,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let metrics = Arc::new(MetricsCollector::new(1000));

        let connection_config = ConnectionConfig {
            host: config.core.host.clone(),
            port: config.core.port,
            secure: config.core.secure,
            reject_unauthorized: config.core.reject_unauthorized,
            reconnect_base_ms: config.core.reconnect_interval_ms,
            reconnect_max_ms: 60_000,
            heartbeat_interval_ms: config.core.heartbeat_interval_ms,
            missed_pong_limit: 3,
            circuit_failure_threshold: 5,
            circuit_reset_ms: 60_000,
        };
        let connection = ConnectionManager::new(connection_config, Some(Arc::clone(&metrics)));
        let adapter = Arc::new(QrwcAdapter::new(connection.transport()));

        let cache = Arc::new(ControlStateCache::new(
            config.cache.max_entries,
            Duration::from_millis(config.cache.ttl_ms),
        ));

        let events = Arc::new(EventBuffer::new(
            config.event_buffer.max_events,
            Duration::from_millis(config.event_buffer.max_age_ms),
            config.event_buffer.global_memory_limit_mb,
        ));

        let reader: Arc<dyn qrwc_core::ValueReader> = Arc::clone(&adapter) as Arc<dyn qrwc_core::ValueReader>;
        let registry = ChangeGroupRegistry::new(
            reader,
            Arc::clone(&cache),
            Arc::clone(&events),
            config.event_buffer.thresholds.clone(),
        );

        let writer: Arc<dyn qrwc_core::ControlWriter> = Arc::clone(&adapter) as Arc<dyn qrwc_core::ControlWriter>;
        let batch = Arc::new(BatchExecutor::new(writer));

        let authenticator = Authenticator::new(&config.auth);
        let rate_limiter = RateLimiter::new(&config.rate_limit);

        if config.persistence.enabled {
            let path = PathBuf::from(&config.persistence.snapshot_path);
            match qrwc_core::load_snapshot(&path) {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => {
                    let restored = entries.len();
                    cache.restore(entries);
                    tracing::info!(restored, path = %path.display(), "restored control cache from snapshot");
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load cache snapshot, starting empty"),
            }
        }

        Arc::new(Self {
            config,
            connection,
            adapter,
            cache,
            registry,
            events,
            batch,
            metrics,
            authenticator,
            rate_limiter,
        })
    }

    /// Starts the connection supervisor and the two periodic background
    /// tasks (cache TTL sweep, event-buffer memory-pressure monitor). Not
    /// part of `new` so tests can construct a `Bridge` without spawning
    /// tasks that outlive the test.
    pub fn start(self: &Arc<Self>) {
        self.connection.connect();

        let cache = Arc::clone(&self.cache);
        let cleanup_interval = Duration::from_millis(self.config.cache.cleanup_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let swept = cache.sweep_expired();
                if swept > 0 {
                    tracing::debug!(swept, "cache TTL sweep evicted entries");
                }
            }
        });

        let events = Arc::clone(&self.events);
        let memory_check_interval = Duration::from_millis(self.config.event_buffer.memory_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(memory_check_interval);
            loop {
                ticker.tick().await;
                match events.check_memory_pressure() {
                    qrwc_core::PressureLevel::Normal => {}
                    qrwc_core::PressureLevel::Warn => tracing::warn!("event buffer memory pressure: warn"),
                    qrwc_core::PressureLevel::High => tracing::warn!("event buffer memory pressure: high, evicting"),
                    qrwc_core::PressureLevel::Critical => tracing::error!("event buffer memory pressure: critical"),
                }
            }
        });

        if self.config.persistence.enabled {
            let cache = Arc::clone(&self.cache);
            let path = PathBuf::from(&self.config.persistence.snapshot_path);
            let backup_count = self.config.persistence.backup_count;
            let snapshot_interval = Duration::from_millis(self.config.persistence.snapshot_interval_ms);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(snapshot_interval);
                loop {
                    ticker.tick().await;
                    let entries = cache.snapshot();
                    if let Err(e) = qrwc_core::save_snapshot(&path, &entries, backup_count) {
                        tracing::warn!(path = %path.display(), error = %e, "failed to save cache snapshot");
                    }
                }
            });
        }
    }

    /// Best-effort client identifier used for per-client rate limiting and
    /// logging; anonymous calls and disabled auth fall back to `None`,
    /// which routes to the shared global bucket.
    pub fn client_id_for(outcome: &crate::auth::AuthOutcome) -> Option<String> {
        match outcome {
            crate::auth::AuthOutcome::Authenticated { client_id } => Some(client_id.clone()),
            crate::auth::AuthOutcome::Anonymous => None,
        }
    }
}
