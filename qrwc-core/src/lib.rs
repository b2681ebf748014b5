//! Core QRWC engine: transport, connection management, control state
//! cache, change-group registry, event buffer, TLS, retry, metrics, and
//! the batch executor. This crate owns every piece that talks to a Q-SYS
//! Core or tracks its state; `qrwc-bridge` wires these pieces together
//! behind the MCP tool surface.

pub mod adapter;
pub mod batch;
pub mod cache;
pub mod change_group;
pub mod connection;
pub mod error;
pub mod event_buffer;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod retry;
pub mod tls;
pub mod transport;

pub use adapter::{QrwcAdapter, QrwcMethod, SendOptions};
pub use batch::{BatchExecutor, BatchOptions, ControlWrite, ControlWriter};
pub use cache::{CacheEvent, CacheStatistics, ControlStateCache, EvictionReason};
pub use change_group::{ChangeGroupRegistry, ChangeGroupSummary, ValueReader};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{http_status, is_retryable, sanitize_message, BridgeError, BridgeResult};
pub use event_buffer::{
    EventAggregation, EventBuffer, EventQuery, GroupPriority, PressureLevel, QueryResult,
    ValueFilter, ValueFilterOperator, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT,
};
pub use metrics::{LatencyTimer, MetricsCollector, MetricsSnapshot};
pub use model::{
    now_ns_ms, CachedEvent, ChangeGroup, ControlMetadata, ControlSource, ControlState,
    ControlValue, ControlWriteOutcome, EventType, ExecutionResult,
};
pub use persistence::{load_snapshot, save_snapshot, PersistenceError};
pub use retry::{RetryConfig, RetryExecutor};
pub use tls::{create_tls_client_config, TlsConfig};
pub use transport::Transport;
