//! The error taxonomy: one variant per kind, not a generic "kind" string,
//! following the same `thiserror`-derived-enum-plus-free-functions shape
//! used for `SidecarError`/`is_retryable_error`/`is_guard_violation`.

use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    #[error("not connected to Q-SYS Core")]
    NotConnected,

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("send queue is full")]
    Backpressure,

    #[error("circuit breaker open, cool-down ends in {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid credentials")]
    AuthInvalid,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("component not found: {0}")]
    ComponentNotFound(String),

    #[error("control not found: {0}")]
    ControlNotFound(String),

    #[error("change group not found: {0}")]
    ChangeGroupNotFound(String),

    #[error("change group already exists: {0}")]
    ChangeGroupExists(String),

    #[error("Q-SYS Core error {code}: {message}")]
    CoreError { code: i64, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Stable machine-readable tag, used as the `error.code` field in every
    /// tool response.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NotConnected => "NOT_CONNECTED",
            BridgeError::Timeout(_) => "TIMEOUT",
            BridgeError::Backpressure => "BACKPRESSURE",
            BridgeError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            BridgeError::Validation(_) => "VALIDATION_ERROR",
            BridgeError::AuthRequired => "AUTH_REQUIRED",
            BridgeError::AuthInvalid => "AUTH_INVALID",
            BridgeError::RateLimited { .. } => "RATE_LIMITED",
            BridgeError::ComponentNotFound(_) => "COMPONENT_NOT_FOUND",
            BridgeError::ControlNotFound(_) => "CONTROL_NOT_FOUND",
            BridgeError::ChangeGroupNotFound(_) => "CHANGE_GROUP_NOT_FOUND",
            BridgeError::ChangeGroupExists(_) => "CHANGE_GROUP_EXISTS",
            BridgeError::CoreError { .. } => "CORE_ERROR",
            BridgeError::Cancelled => "CANCELLED",
            BridgeError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => BridgeError::NotConnected,
            WsError::Io(e) => BridgeError::Internal(format!("socket io error: {e}")),
            other => BridgeError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Internal(format!("json error: {err}"))
    }
}

/// Retryable kinds: transport timeout, transient socket close, and
/// Core-reported transient codes. Not-connected, validation, auth, and
/// "method not found" are explicitly non-retryable.
pub fn is_retryable(err: &BridgeError) -> bool {
    matches!(
        err,
        BridgeError::Timeout(_) | BridgeError::Backpressure | BridgeError::CoreError { .. }
    )
}

/// Maps a kind to the HTTP-style status a REST/metrics surface built on top
/// of the bridge would use; the bridge itself exposes no HTTP surface, but
/// tool handlers and the dispatcher's error log classify by this for
/// severity.
pub fn http_status(err: &BridgeError) -> u16 {
    match err {
        BridgeError::NotConnected | BridgeError::CircuitOpen { .. } => 503,
        BridgeError::Timeout(_) => 504,
        BridgeError::Backpressure => 429,
        BridgeError::Validation(_) => 400,
        BridgeError::AuthRequired => 401,
        BridgeError::AuthInvalid => 401,
        BridgeError::RateLimited { .. } => 429,
        BridgeError::ComponentNotFound(_)
        | BridgeError::ControlNotFound(_)
        | BridgeError::ChangeGroupNotFound(_) => 404,
        BridgeError::ChangeGroupExists(_) => 409,
        BridgeError::CoreError { .. } => 502,
        BridgeError::Cancelled => 499,
        BridgeError::Internal(_) => 500,
    }
}

/// Redacts IPs, bearer/api tokens, and `password=...` patterns from an
/// error message before it crosses into a tool response.
pub fn sanitize_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for word in message.split_inclusive(' ') {
        let trimmed = word.trim_end();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("password=") || lower.starts_with("token=") || lower.starts_with("bearer ") {
            out.push_str("[REDACTED] ");
            continue;
        }
        if is_ip_like(trimmed) {
            out.push_str("[REDACTED] ");
            continue;
        }
        out.push_str(word);
    }
    out.trim_end().to_string()
}

fn is_ip_like(token: &str) -> bool {
    let stripped = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != ':');
    let octets: Vec<&str> = stripped.split('.').collect();
    octets.len() == 4 && octets.iter().all(|o| !o.is_empty() && o.parse::<u8>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_kinds_are_excluded() {
        assert!(!is_retryable(&BridgeError::NotConnected));
        assert!(!is_retryable(&BridgeError::Validation("x".into())));
        assert!(!is_retryable(&BridgeError::AuthInvalid));
    }

    #[test]
    fn retryable_kinds() {
        assert!(is_retryable(&BridgeError::Timeout(5000)));
        assert!(is_retryable(&BridgeError::Backpressure));
        assert!(is_retryable(&BridgeError::CoreError {
            code: -1,
            message: "busy".into()
        }));
    }

    #[test]
    fn redacts_password_and_ip() {
        let msg = sanitize_message("connect failed to 192.168.1.5 password=hunter2");
        assert!(!msg.contains("192.168.1.5"));
        assert!(!msg.contains("hunter2"));
    }

    #[test]
    fn code_is_stable_tag() {
        assert_eq!(BridgeError::NotConnected.code(), "NOT_CONNECTED");
        assert_eq!(
            BridgeError::ChangeGroupExists("g1".into()).code(),
            "CHANGE_GROUP_EXISTS"
        );
    }
}
