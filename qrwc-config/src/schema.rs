//! Configuration schema for the QRWC bridge. Field names and defaults
//! follow the "Configuration" table verbatim; every field is optional in
//! the TOML file and falls back to [`Default`], then is overridable by
//! environment variables (see [`crate::env`]).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub core: CoreSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub event_buffer: EventBufferSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default)]
    pub reject_unauthorized: bool,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_port() -> u16 {
    443
}
fn default_true() -> bool {
    true
}
fn default_reconnect_interval_ms() -> u64 {
    5000
}
fn default_heartbeat_interval_ms() -> u64 {
    30000
}

impl Default for CoreSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            secure: default_true(),
            reject_unauthorized: false,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

fn default_cache_max_entries() -> usize {
    1000
}
fn default_cache_ttl_ms() -> u64 {
    3_600_000
}
fn default_cleanup_interval_ms() -> u64 {
    60_000
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_ms: default_cache_ttl_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBufferSection {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    #[serde(default = "default_global_memory_limit_mb")]
    pub global_memory_limit_mb: u64,
    #[serde(default = "default_memory_check_interval_ms")]
    pub memory_check_interval_ms: u64,
    /// Per-control-name-pattern threshold overrides for `threshold_crossed`
    /// classification.
    #[serde(default)]
    pub thresholds: Vec<ThresholdRule>,
}

fn default_max_events() -> usize {
    10_000
}
fn default_max_age_ms() -> u64 {
    300_000
}
fn default_global_memory_limit_mb() -> u64 {
    500
}
fn default_memory_check_interval_ms() -> u64 {
    5000
}

impl Default for EventBufferSection {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_age_ms: default_max_age_ms(),
            global_memory_limit_mb: default_global_memory_limit_mb(),
            memory_check_interval_ms: default_memory_check_interval_ms(),
            thresholds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Substring matched against the control name (case-insensitive).
    pub pattern: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    #[serde(default)]
    pub per_client: bool,
}

fn default_requests_per_minute() -> u32 {
    60
}
fn default_burst_size() -> u32 {
    10
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_size: default_burst_size(),
            per_client: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_token_expiration")]
    pub token_expiration_secs: u64,
    #[serde(default = "default_allow_anonymous")]
    pub allow_anonymous: Vec<String>,
}

fn default_token_expiration() -> u64 {
    3600
}
fn default_allow_anonymous() -> Vec<String> {
    vec!["ping".to_string(), "health".to_string()]
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            enabled: false,
            api_keys: Vec::new(),
            jwt_secret: None,
            token_expiration_secs: default_token_expiration(),
            allow_anonymous: default_allow_anonymous(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default = "default_snapshot_backups")]
    pub backup_count: u32,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
}

fn default_snapshot_path() -> String {
    "qrwc-bridge-state.json".to_string()
}
fn default_snapshot_backups() -> u32 {
    3
}
fn default_snapshot_interval_ms() -> u64 {
    60_000
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            enabled: false,
            snapshot_path: default_snapshot_path(),
            backup_count: default_snapshot_backups(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            core: CoreSection::default(),
            cache: CacheSection::default(),
            event_buffer: EventBufferSection::default(),
            rate_limit: RateLimitSection::default(),
            auth: AuthSection::default(),
            persistence: PersistenceSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),
    #[error("failed to parse configuration: {0}")]
    ParseError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("io error: {0}")]
    IoError(String),
}
