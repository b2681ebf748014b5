//! Authentication gate (component H, step 1): `Bearer <token>`,
//! `ApiKey <key>` / `X-API-Key` credential extraction, constant-time API
//! key comparison, and HMAC-SHA-256-signed bearer tokens. A configured set
//! of method names may be called anonymously (`auth.allow_anonymous`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use qrwc_config::AuthSection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    ApiKey(String),
}

/// Parses the single credential header value the dispatcher was handed
/// (`Authorization: Bearer ...`, `Authorization: ApiKey ...`, or
/// `X-API-Key: ...`), in the shape spec.md 4.H names.
pub fn parse_credential(authorization: Option<&str>, api_key_header: Option<&str>) -> Option<Credential> {
    if let Some(key) = api_key_header {
        if !key.is_empty() {
            return Some(Credential::ApiKey(key.to_string()));
        }
    }
    let header = authorization?;
    if let Some(token) = header.strip_prefix("Bearer ") {
        return Some(Credential::Bearer(token.to_string()));
    }
    if let Some(key) = header.strip_prefix("ApiKey ") {
        return Some(Credential::ApiKey(key.to_string()));
    }
    None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub client_id: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Anonymous,
    Authenticated { client_id: String },
}

pub struct Authenticator {
    enabled: bool,
    api_key_hashes: Vec<[u8; 32]>,
    jwt_secret: Option<Vec<u8>>,
    allow_anonymous: Vec<String>,
}

impl Authenticator {
    pub fn new(config: &AuthSection) -> Self {
        Self {
            enabled: config.enabled,
            api_key_hashes: config.api_keys.iter().map(|k| sha256(k.as_bytes())).collect(),
            jwt_secret: config.jwt_secret.clone().map(|s| s.into_bytes()),
            allow_anonymous: config.allow_anonymous.clone(),
        }
    }

    /// Issues a signed bearer token for `client_id`, valid for
    /// `ttl_secs` from now. Used by out-of-band token issuance, not by any
    /// MCP tool itself.
    pub fn issue_token(&self, client_id: &str, ttl_secs: u64) -> Result<String, AuthError> {
        let secret = self.jwt_secret.as_ref().ok_or(AuthError::NoSigningKey)?;
        let now = now_secs();
        let claims = TokenClaims {
            client_id: client_id.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| AuthError::Invalid)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);
        let signature = sign(secret, payload_b64.as_bytes());
        Ok(format!("{payload_b64}.{signature}"))
    }

    /// `authenticate(method, credential)` per spec.md 4.H step 1. A method
    /// in `allow_anonymous` always succeeds without a credential. When
    /// auth is disabled entirely, every call is anonymous.
    pub fn authenticate(&self, method: &str, credential: Option<&Credential>) -> Result<AuthOutcome, AuthError> {
        if !self.enabled || self.allow_anonymous.iter().any(|m| m == method) {
            return Ok(AuthOutcome::Anonymous);
        }
        match credential {
            None => Err(AuthError::Required),
            Some(Credential::ApiKey(key)) => {
                let hash = sha256(key.as_bytes());
                if self.api_key_hashes.iter().any(|stored| constant_time_eq(stored, &hash)) {
                    Ok(AuthOutcome::Authenticated { client_id: format!("apikey:{}", short_fingerprint(&hash)) })
                } else {
                    Err(AuthError::Invalid)
                }
            }
            Some(Credential::Bearer(token)) => self.verify_token(token),
        }
    }

    fn verify_token(&self, token: &str) -> Result<AuthOutcome, AuthError> {
        let secret = self.jwt_secret.as_ref().ok_or(AuthError::Invalid)?;
        let (payload_b64, signature) = token.split_once('.').ok_or(AuthError::Invalid)?;
        let expected = sign(secret, payload_b64.as_bytes());
        if !constant_time_eq_str(&expected, signature) {
            return Err(AuthError::Invalid);
        }
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthError::Invalid)?;
        let claims: TokenClaims = serde_json::from_slice(&payload).map_err(|_| AuthError::Invalid)?;
        if claims.exp <= now_secs() {
            return Err(AuthError::Invalid);
        }
        Ok(AuthOutcome::Authenticated { client_id: claims.client_id })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("authentication required")]
    Required,
    #[error("invalid credentials")]
    Invalid,
    #[error("no signing key configured")]
    NoSigningKey,
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn sign(secret: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(data);
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Constant-time equality, so comparing a submitted key's hash against the
/// stored set does not leak timing information about where a mismatch
/// occurred.
fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn short_fingerprint(hash: &[u8; 32]) -> String {
    hash[..4].iter().map(|b| format!("{b:02x}")).collect()
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_with_keys(keys: Vec<&str>) -> Authenticator {
        Authenticator::new(&AuthSection {
            enabled: true,
            api_keys: keys.into_iter().map(String::from).collect(),
            jwt_secret: Some("test-secret".to_string()),
            token_expiration_secs: 3600,
            allow_anonymous: vec!["ping".to_string()],
        })
    }

    #[test]
    fn parses_bearer_and_apikey_headers() {
        assert_eq!(
            parse_credential(Some("Bearer abc.def"), None),
            Some(Credential::Bearer("abc.def".to_string()))
        );
        assert_eq!(
            parse_credential(Some("ApiKey k1"), None),
            Some(Credential::ApiKey("k1".to_string()))
        );
        assert_eq!(
            parse_credential(None, Some("k1")),
            Some(Credential::ApiKey("k1".to_string()))
        );
    }

    #[test]
    fn allow_anonymous_methods_bypass_credential_requirement() {
        let auth = auth_with_keys(vec!["secret-key"]);
        let outcome = auth.authenticate("ping", None).unwrap();
        assert_eq!(outcome, AuthOutcome::Anonymous);
    }

    #[test]
    fn missing_credential_on_guarded_method_is_required_error() {
        let auth = auth_with_keys(vec!["secret-key"]);
        let err = auth.authenticate("set_control_values", None).unwrap_err();
        assert_eq!(err, AuthError::Required);
    }

    #[test]
    fn correct_api_key_authenticates() {
        let auth = auth_with_keys(vec!["secret-key"]);
        let outcome = auth
            .authenticate("set_control_values", Some(&Credential::ApiKey("secret-key".to_string())))
            .unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated { .. }));
    }

    #[test]
    fn wrong_api_key_is_invalid() {
        let auth = auth_with_keys(vec!["secret-key"]);
        let err = auth
            .authenticate("set_control_values", Some(&Credential::ApiKey("wrong".to_string())))
            .unwrap_err();
        assert_eq!(err, AuthError::Invalid);
    }

    #[test]
    fn issued_token_round_trips_and_expires() {
        let auth = auth_with_keys(vec![]);
        let token = auth.issue_token("client-1", 3600).unwrap();
        let outcome = auth.authenticate("set_control_values", Some(&Credential::Bearer(token))).unwrap();
        assert_eq!(outcome, AuthOutcome::Authenticated { client_id: "client-1".to_string() });

        let expired = auth.issue_token("client-1", 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let err = auth.authenticate("set_control_values", Some(&Credential::Bearer(expired))).unwrap_err();
        assert_eq!(err, AuthError::Invalid);
    }

    #[test]
    fn disabled_auth_is_always_anonymous() {
        let auth = Authenticator::new(&AuthSection {
            enabled: false,
            ..AuthSection::default()
        });
        let outcome = auth.authenticate("set_control_values", None).unwrap();
        assert_eq!(outcome, AuthOutcome::Anonymous);
    }
}
