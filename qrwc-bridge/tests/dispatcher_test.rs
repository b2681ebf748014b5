//! Dispatcher-level scenarios that don't require a live Core connection:
//! change-group lifecycle goes straight to the in-process registry, and
//! rate limiting/auth gate before any handler runs.

use qrwc_bridge::dispatcher::{dispatch, CallContext};
use qrwc_bridge::Bridge;
use qrwc_config::schema::{AuthSection, BridgeConfig, RateLimitSection};
use serde_json::json;

fn config_with(rate_limit: RateLimitSection, auth: AuthSection) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.rate_limit = rate_limit;
    config.auth = auth;
    config
}

/// S3: creating the same change group id twice fails the second time with
/// `CHANGE_GROUP_EXISTS`, and the first group's membership survives.
#[tokio::test]
async fn duplicate_change_group_create_is_rejected() {
    let bridge = Bridge::new(config_with(RateLimitSection::default(), AuthSection::default()));
    let ctx = CallContext::default();

    let first = dispatch(&bridge, "create_change_group", json!({"id": "g3"}), &ctx).await;
    assert!(first.is_ok());

    dispatch(
        &bridge,
        "add_controls_to_change_group",
        json!({"id": "g3", "controls": ["MainMixer.gain"]}),
        &ctx,
    )
    .await
    .unwrap();

    let second = dispatch(&bridge, "create_change_group", json!({"id": "g3"}), &ctx).await;
    let err = second.unwrap_err();
    assert_eq!(err.code, "CHANGE_GROUP_EXISTS");

    let listed = dispatch(&bridge, "list_change_groups", json!({}), &ctx).await.unwrap();
    let groups = listed["groups"].as_array().unwrap();
    let g3 = groups.iter().find(|g| g["id"] == "g3").unwrap();
    assert_eq!(g3["controlCount"], 1);
}

/// S4: with `requestsPerMinute=60, burstSize=10`, 20 calls issued back to
/// back allow exactly 10 and reject the rest with `RATE_LIMITED` and a
/// bounded `retryAfterSecs`.
#[tokio::test]
async fn rate_limit_allows_exactly_burst_size() {
    let rate_limit = RateLimitSection {
        requests_per_minute: 60,
        burst_size: 10,
        per_client: false,
    };
    let bridge = Bridge::new(config_with(rate_limit, AuthSection::default()));
    let ctx = CallContext::default();

    let mut allowed = 0;
    let mut rejected = 0;
    for i in 0..20 {
        let result = dispatch(&bridge, "create_change_group", json!({"id": format!("g{i}")}), &ctx).await;
        match result {
            Ok(_) => allowed += 1,
            Err(err) => {
                assert_eq!(err.code, "RATE_LIMITED");
                assert!(err.retry_after_secs.unwrap() <= 60.0);
                rejected += 1;
            }
        }
    }

    assert_eq!(allowed, 10);
    assert_eq!(rejected, 10);
}

/// A guarded tool with no credential fails `AUTH_REQUIRED` before any
/// handler runs; a method on the anonymous allowlist bypasses the check.
#[tokio::test]
async fn auth_required_blocks_guarded_tool_without_credential() {
    let auth = AuthSection {
        enabled: true,
        api_keys: vec!["secret".to_string()],
        jwt_secret: Some("hmac-secret".to_string()),
        token_expiration_secs: 3600,
        allow_anonymous: vec!["list_change_groups".to_string()],
    };
    let bridge = Bridge::new(config_with(RateLimitSection::default(), auth));
    let ctx = CallContext::default();

    let guarded = dispatch(&bridge, "create_change_group", json!({"id": "g1"}), &ctx).await;
    assert_eq!(guarded.unwrap_err().code, "AUTH_REQUIRED");

    let anonymous = dispatch(&bridge, "list_change_groups", json!({}), &ctx).await;
    assert!(anonymous.is_ok());
}

/// An unrecognized tool name and a malformed parameter payload are both
/// `VALIDATION_ERROR`, not a panic or an internal error.
#[tokio::test]
async fn unknown_tool_and_bad_params_are_validation_errors() {
    let bridge = Bridge::new(config_with(RateLimitSection::default(), AuthSection::default()));
    let ctx = CallContext::default();

    let unknown = dispatch(&bridge, "not_a_real_tool", json!({}), &ctx).await;
    assert_eq!(unknown.unwrap_err().code, "VALIDATION_ERROR");

    let bad_params = dispatch(&bridge, "create_change_group", json!({"wrongField": true}), &ctx).await;
    assert_eq!(bad_params.unwrap_err().code, "VALIDATION_ERROR");
}

/// `query_change_events` and `get_event_statistics` run entirely against
/// the in-process Event Buffer and never touch the Core.
#[tokio::test]
async fn event_queries_run_without_a_live_core_connection() {
    let bridge = Bridge::new(config_with(RateLimitSection::default(), AuthSection::default()));
    let ctx = CallContext::default();

    let result = dispatch(&bridge, "query_change_events", json!({"limit": 10}), &ctx).await.unwrap();
    assert_eq!(result["count"], 0);

    let stats = dispatch(&bridge, "get_event_statistics", json!({}), &ctx).await.unwrap();
    assert_eq!(stats["statistics"]["totalEvents"], 0);
}
