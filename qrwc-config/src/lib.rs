//! Configuration schema and env/file/default loading for the QRWC bridge.

pub mod config;
pub mod env;
pub mod schema;

pub use config::{load_config, load_from_file, validate_config};
pub use env::apply_env_overrides;
pub use schema::{
 AuthSection, BridgeConfig, CacheSection, ConfigError, CoreSection, EventBufferSection,
 PersistenceSection, RateLimitSection, ThresholdRule,
};
