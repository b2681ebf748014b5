//! Environment variable overrides. Variables are prefixed `QRWC_` and
//! follow `QRWC_<SECTION>_<KEY>`, e.g. `QRWC_CORE_HOST`,
//! `QRWC_RATE_LIMIT_REQUESTS_PER_MINUTE`. Env vars always win over the
//! config file, which always wins over [`Default`].

use crate::schema::BridgeConfig;
use std::env;

pub fn apply_env_overrides(config: &mut BridgeConfig) {
    if let Ok(v) = env::var("QRWC_CORE_HOST") {
        config.core.host = v;
    }
    if let Ok(v) = env::var("QRWC_CORE_PORT") {
        if let Ok(p) = v.parse() {
            config.core.port = p;
        }
    }
    if let Ok(v) = env::var("QRWC_CORE_USERNAME") {
        config.core.username = v;
    }
    if let Ok(v) = env::var("QRWC_CORE_PASSWORD") {
        config.core.password = v;
    }
    if let Ok(v) = env::var("QRWC_CORE_SECURE") {
        if let Ok(b) = v.parse() {
            config.core.secure = b;
        }
    }
    if let Ok(v) = env::var("QRWC_CORE_REJECT_UNAUTHORIZED") {
        if let Ok(b) = v.parse() {
            config.core.reject_unauthorized = b;
        }
    }
    if let Ok(v) = env::var("QRWC_CORE_RECONNECT_INTERVAL_MS") {
        if let Ok(n) = v.parse() {
            config.core.reconnect_interval_ms = n;
        }
    }
    if let Ok(v) = env::var("QRWC_CORE_HEARTBEAT_INTERVAL_MS") {
        if let Ok(n) = v.parse() {
            config.core.heartbeat_interval_ms = n;
        }
    }

    if let Ok(v) = env::var("QRWC_CACHE_MAX_ENTRIES") {
        if let Ok(n) = v.parse() {
            config.cache.max_entries = n;
        }
    }
    if let Ok(v) = env::var("QRWC_CACHE_TTL_MS") {
        if let Ok(n) = v.parse() {
            config.cache.ttl_ms = n;
        }
    }
    if let Ok(v) = env::var("QRWC_CACHE_CLEANUP_INTERVAL_MS") {
        if let Ok(n) = v.parse() {
            config.cache.cleanup_interval_ms = n;
        }
    }

    if let Ok(v) = env::var("QRWC_EVENT_BUFFER_MAX_EVENTS") {
        if let Ok(n) = v.parse() {
            config.event_buffer.max_events = n;
        }
    }
    if let Ok(v) = env::var("QRWC_EVENT_BUFFER_MAX_AGE_MS") {
        if let Ok(n) = v.parse() {
            config.event_buffer.max_age_ms = n;
        }
    }
    if let Ok(v) = env::var("QRWC_EVENT_BUFFER_GLOBAL_MEMORY_LIMIT_MB") {
        if let Ok(n) = v.parse() {
            config.event_buffer.global_memory_limit_mb = n;
        }
    }
    if let Ok(v) = env::var("QRWC_EVENT_BUFFER_MEMORY_CHECK_INTERVAL_MS") {
        if let Ok(n) = v.parse() {
            config.event_buffer.memory_check_interval_ms = n;
        }
    }

    if let Ok(v) = env::var("QRWC_RATE_LIMIT_REQUESTS_PER_MINUTE") {
        if let Ok(n) = v.parse() {
            config.rate_limit.requests_per_minute = n;
        }
    }
    if let Ok(v) = env::var("QRWC_RATE_LIMIT_BURST_SIZE") {
        if let Ok(n) = v.parse() {
            config.rate_limit.burst_size = n;
        }
    }
    if let Ok(v) = env::var("QRWC_RATE_LIMIT_PER_CLIENT") {
        if let Ok(b) = v.parse() {
            config.rate_limit.per_client = b;
        }
    }

    if let Ok(v) = env::var("QRWC_AUTH_ENABLED") {
        if let Ok(b) = v.parse() {
            config.auth.enabled = b;
        }
    }
    if let Ok(v) = env::var("QRWC_AUTH_API_KEYS") {
        config.auth.api_keys = v.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(v) = env::var("QRWC_AUTH_JWT_SECRET") {
        config.auth.jwt_secret = Some(v);
    }
    if let Ok(v) = env::var("QRWC_AUTH_TOKEN_EXPIRATION_SECS") {
        if let Ok(n) = v.parse() {
            config.auth.token_expiration_secs = n;
        }
    }

    if let Ok(v) = env::var("QRWC_PERSISTENCE_ENABLED") {
        if let Ok(b) = v.parse() {
            config.persistence.enabled = b;
        }
    }
    if let Ok(v) = env::var("QRWC_PERSISTENCE_SNAPSHOT_PATH") {
        config.persistence.snapshot_path = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_file_value() {
        std::env::set_var("QRWC_CORE_HOST", "core.example.test");
        std::env::set_var("QRWC_CORE_PORT", "8443");
        let mut config = BridgeConfig {
            core: crate::schema::CoreSection {
                host: "other-host".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        apply_env_overrides(&mut config);
        assert_eq!(config.core.host, "core.example.test");
        assert_eq!(config.core.port, 8443);
        std::env::remove_var("QRWC_CORE_HOST");
        std::env::remove_var("QRWC_CORE_PORT");
    }
}
