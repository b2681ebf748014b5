//! Configuration loading: env > file > defaults.

use crate::env::apply_env_overrides;
use crate::schema::{BridgeConfig, ConfigError};
use std::path::{Path, PathBuf};

/// Load configuration, optionally from an explicit file path; falls back
/// to `QRWC_CONFIG_FILE`, then to defaults if neither is set. Environment
/// variable overrides are applied last regardless of whether a file was
/// found, per the configured precedence (env > file > defaults).
pub fn load_config(explicit_path: Option<PathBuf>) -> Result<BridgeConfig, ConfigError> {
    let path = explicit_path.or_else(|| std::env::var("QRWC_CONFIG_FILE").ok().map(PathBuf::from));

    let mut config = match path {
        Some(path) if path.exists() => load_from_file(&path)?,
        Some(path) => return Err(ConfigError::FileNotFound(path.display().to_string())),
        None => BridgeConfig::default(),
    };

    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn load_from_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(format!("{}: {e}", path.display())))?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

pub fn validate_config(config: &BridgeConfig) -> Result<(), ConfigError> {
    if config.core.host.is_empty() {
        return Err(ConfigError::ValidationError(
            "core.host must not be empty".to_string(),
        ));
    }
    if config.rate_limit.requests_per_minute == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limit.requests_per_minute must be > 0".to_string(),
        ));
    }
    if config.rate_limit.burst_size == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limit.burst_size must be > 0".to_string(),
        ));
    }
    if config.auth.enabled && config.auth.api_keys.is_empty() && config.auth.jwt_secret.is_none() {
        return Err(ConfigError::ValidationError(
            "auth.enabled requires at least one api key or a jwt secret".to_string(),
        ));
    }
    if config.event_buffer.global_memory_limit_mb == 0 {
        return Err(ConfigError::ValidationError(
            "event_buffer.global_memory_limit_mb must be > 0".to_string(),
        ));
    }
    Ok(())
}
