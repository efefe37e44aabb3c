//! Token lifecycle integration tests.
//!
//! Drives `TokenLifecycleManager` against a mock authority serving both the
//! issuance endpoint and the published key set.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use futures::future::join_all;
use serde_json::{json, Map, Value};
use service_auth::config::Config;
use service_auth::error::AuthError;
use service_auth::secret::ExposeSecret;
use service_auth::token_manager::TokenLifecycleManager;
use service_auth::verifier::{InvalidReason, Verification};
use service_auth_test_utils::{
    MockAuthority, TestRsaKey, TestTokenBuilder, TokenAssertions, ISSUANCE_PATH,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const SIGNING_KID: &str = "s-2de6a4c3";

fn config_for(authority: &MockAuthority) -> Config {
    Config::new(authority.uri(), authority.uri())
}

fn manager_for(authority: &MockAuthority) -> TokenLifecycleManager {
    TokenLifecycleManager::from_config(&config_for(authority)).unwrap()
}

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// Authority that signs with one static key and publishes it behind an
/// older dynamic key, so positional selection would pick the wrong one.
async fn standard_authority() -> (MockAuthority, TestRsaKey) {
    let signing = TestRsaKey::primary(SIGNING_KID);
    let dynamic = TestRsaKey::secondary("d-1700000000");
    let authority = MockAuthority::start().await;
    authority.mount_jwks(&[&dynamic, &signing]).await;
    authority.mount_issuance(&signing).await;
    (authority, signing)
}

// =============================================================================
// Issue and reuse
// =============================================================================

#[tokio::test]
async fn test_first_call_issues_exactly_once() {
    let (authority, _) = standard_authority().await;
    let manager = manager_for(&authority);

    let verified = manager
        .get_verified_token(&payload(json!({"userId": "u-42"})), 7)
        .await
        .unwrap();

    assert!(verified.freshly_issued);
    assert!(!verified.was_already_valid);
    assert_eq!(authority.issuance_request_count().await, 1);
    assert_eq!(authority.jwks_request_count().await, 0);

    let token = verified.token.expose_secret().to_string();
    token
        .assert_valid_jwt()
        .assert_signed_by(SIGNING_KID)
        .assert_from_issuer()
        .assert_has_claim("userId", &json!("u-42"))
        .assert_expires_in(7 * 86_400);
}

#[tokio::test]
async fn test_valid_cached_token_is_reused_without_issuance() {
    let (authority, _) = standard_authority().await;
    let manager = manager_for(&authority);
    let body = payload(json!({"userId": "u-42"}));

    let first = manager.get_verified_token(&body, 7).await.unwrap();
    let second = manager.get_verified_token(&body, 7).await.unwrap();

    assert!(!second.freshly_issued);
    assert!(second.was_already_valid);
    assert_eq!(first.token.expose_secret(), second.token.expose_secret());
    assert_eq!(authority.issuance_request_count().await, 1);
    assert_eq!(authority.jwks_request_count().await, 1);
}

#[tokio::test]
async fn test_issued_claims_round_trip() {
    let (authority, _) = standard_authority().await;
    let manager = manager_for(&authority);
    let body = payload(json!({
        "userId": "u-42",
        "roles": ["billing", "reports"],
        "limits": {"rpm": 600},
    }));

    let verified = manager.get_verified_token(&body, 1).await.unwrap();
    let result = manager
        .decode(verified.token.expose_secret())
        .await
        .unwrap();

    let claims = result.claims().expect("issued token should verify");
    assert!(claims.is_from_issuer());
    for (key, value) in &body {
        assert_eq!(claims.get(key), Some(value), "claim '{key}' changed");
    }
}

#[tokio::test]
async fn test_registered_claim_names_in_payload_round_trip_and_reuse() {
    let bodies = [
        payload(json!({
            "sub": 42,
            "iss": {"org": "acme"},
            "iat": 1_700_000_000_i64,
            "userId": "u-42",
        })),
        payload(json!({
            "sub": "user-1",
            "iss": {"org": "acme", "region": "eu"},
        })),
    ];

    for body in &bodies {
        let (authority, _) = standard_authority().await;
        let manager = manager_for(&authority);

        let first = manager.get_verified_token(body, 1).await.unwrap();
        let second = manager.get_verified_token(body, 1).await.unwrap();

        assert!(first.freshly_issued);
        assert!(second.was_already_valid, "payload {body:?} was reissued");
        assert!(!second.freshly_issued);
        assert_eq!(first.token.expose_secret(), second.token.expose_secret());
        assert_eq!(authority.issuance_request_count().await, 1);

        let claims = manager
            .decode(second.token.expose_secret())
            .await
            .unwrap()
            .into_claims()
            .expect("issued token should verify");
        assert!(claims.is_from_issuer());
        for (key, value) in body {
            assert_eq!(claims.get(key), Some(value), "claim '{key}' changed");
        }
    }
}

// =============================================================================
// Reissue decisions
// =============================================================================

#[tokio::test]
async fn test_expired_cached_token_is_replaced() {
    let signing = TestRsaKey::primary(SIGNING_KID);
    let authority = MockAuthority::start().await;
    authority.mount_jwks(&[&signing]).await;

    let expired = TestTokenBuilder::new().expires_in(-60).sign(&signing);
    Mock::given(method("POST"))
        .and(path(ISSUANCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "jwt": expired,
        })))
        .up_to_n_times(1)
        .mount(authority.server())
        .await;
    authority.mount_issuance(&signing).await;

    let manager = manager_for(&authority);

    let first = manager.get_verified_token(&Map::new(), 7).await.unwrap();
    assert_eq!(first.token.expose_secret(), expired);

    let second = manager.get_verified_token(&Map::new(), 7).await.unwrap();
    assert!(second.freshly_issued);
    assert!(!second.was_already_valid);
    assert_ne!(second.token.expose_secret(), expired);
    assert_eq!(authority.issuance_request_count().await, 2);

    assert!(manager
        .decode(second.token.expose_secret())
        .await
        .unwrap()
        .is_valid());
}

#[tokio::test]
async fn test_reissue_stores_authority_token_verbatim() {
    let signing = TestRsaKey::primary(SIGNING_KID);
    let authority = MockAuthority::start().await;
    authority.mount_jwks(&[&signing]).await;
    authority
        .mount_issuance_response(200, json!({"jwt": "abc.def.ghi", "status": "OK"}))
        .await;

    let manager = manager_for(&authority);

    let token = manager
        .reissue(&payload(json!({"userId": "u-42"})), 7)
        .await
        .unwrap();
    assert_eq!(token.expose_secret(), "abc.def.ghi");
    assert_eq!(
        manager.cached_token().await.unwrap().expose_secret(),
        "abc.def.ghi"
    );

    // A real token signed by a published key still verifies.
    let real = TestTokenBuilder::new().sign(&signing);
    assert!(manager.decode(&real).await.unwrap().is_valid());

    // The verbatim token is malformed, so the next call replaces it.
    assert_eq!(
        manager.decode("abc.def.ghi").await.unwrap(),
        Verification::Invalid(InvalidReason::Malformed)
    );
    let next = manager.get_verified_token(&Map::new(), 7).await.unwrap();
    assert!(next.freshly_issued);
}

#[tokio::test]
async fn test_invalidate_then_call_reissues() {
    let (authority, _) = standard_authority().await;
    let manager = manager_for(&authority);

    manager.get_verified_token(&Map::new(), 7).await.unwrap();
    manager.invalidate().await;
    let verified = manager.get_verified_token(&Map::new(), 7).await.unwrap();

    assert!(verified.freshly_issued);
    assert_eq!(authority.issuance_request_count().await, 2);
}

// =============================================================================
// Error propagation
// =============================================================================

#[tokio::test]
async fn test_unpublished_signing_key_propagates_key_not_found() {
    let signing = TestRsaKey::primary("s-unpublished");
    let published = TestRsaKey::secondary("s-published");
    let authority = MockAuthority::start().await;
    authority.mount_jwks(&[&published]).await;
    authority.mount_issuance(&signing).await;

    let manager = manager_for(&authority);
    let first = manager.get_verified_token(&Map::new(), 7).await.unwrap();

    let result = manager.get_verified_token(&Map::new(), 7).await;

    assert!(
        matches!(result, Err(AuthError::KeyNotFound(ref msg)) if msg.contains("s-unpublished")),
        "expected KeyNotFound, got {result:?}"
    );
    assert_eq!(authority.issuance_request_count().await, 1);
    assert_eq!(
        manager.cached_token().await.unwrap().expose_secret(),
        first.token.expose_secret()
    );
}

#[tokio::test]
async fn test_key_set_outage_propagates_without_reissue() {
    let signing = TestRsaKey::primary(SIGNING_KID);
    let authority = MockAuthority::start().await;
    authority.mount_jwks_failure(503).await;
    authority.mount_issuance(&signing).await;

    let manager = manager_for(&authority);
    manager.get_verified_token(&Map::new(), 7).await.unwrap();

    let result = manager.get_verified_token(&Map::new(), 7).await;

    assert!(matches!(result, Err(AuthError::KeySetFetch(_))));
    assert_eq!(authority.issuance_request_count().await, 1);
}

#[tokio::test]
async fn test_issuance_failure_leaves_slot_empty() {
    let authority = MockAuthority::start().await;
    authority
        .mount_issuance_response(500, json!({"message": "internal"}))
        .await;

    let manager = manager_for(&authority);
    let result = manager.get_verified_token(&Map::new(), 7).await;

    assert!(matches!(
        result,
        Err(AuthError::Issuance {
            http_status: Some(500),
            ..
        })
    ));
    assert!(manager.cached_token().await.is_none());
}

#[tokio::test]
async fn test_zero_validity_rejected_before_network() {
    let (authority, _) = standard_authority().await;
    let manager = manager_for(&authority);

    let result = manager.get_verified_token(&Map::new(), 0).await;

    assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
    assert_eq!(authority.issuance_request_count().await, 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_first_calls_share_one_issuance() {
    let signing = TestRsaKey::primary(SIGNING_KID);
    let authority = MockAuthority::start().await;
    authority.mount_jwks(&[&signing]).await;
    authority
        .mount_slow_issuance(&signing, Duration::from_millis(100), 1)
        .await;

    let manager = Arc::new(manager_for(&authority));
    let body = payload(json!({"userId": "u-42"}));

    let results = join_all((0..16).map(|_| {
        let manager = manager.clone();
        let body = body.clone();
        async move { manager.get_verified_token(&body, 7).await }
    }))
    .await;

    let tokens: Vec<String> = results
        .iter()
        .map(|r| r.as_ref().unwrap().token.expose_secret().to_string())
        .collect();
    assert!(tokens.iter().all(|t| *t == tokens[0]));

    let fresh = results
        .iter()
        .filter(|r| r.as_ref().unwrap().freshly_issued)
        .count();
    assert_eq!(fresh, 1);
    assert_eq!(authority.issuance_request_count().await, 1);
    assert_eq!(authority.jwks_request_count().await, 15);
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_jwks_cache_avoids_repeat_fetches() {
    let (authority, _) = standard_authority().await;
    let mut config = config_for(&authority);
    config.jwks_cache_ttl = Some(Duration::from_secs(60));
    let manager = TokenLifecycleManager::from_config(&config).unwrap();

    for _ in 0..4 {
        manager.get_verified_token(&Map::new(), 7).await.unwrap();
    }

    assert_eq!(authority.issuance_request_count().await, 1);
    assert_eq!(authority.jwks_request_count().await, 1);
}

#[tokio::test]
async fn test_api_key_sent_to_authority() {
    let (authority, _) = standard_authority().await;
    let mut config = config_for(&authority);
    config.core_api_key = Some("core-api-key".into());
    let manager = TokenLifecycleManager::from_config(&config).unwrap();

    manager.get_verified_token(&Map::new(), 7).await.unwrap();

    let requests = authority.server().received_requests().await.unwrap();
    let issuance = requests
        .iter()
        .find(|r| r.url.path() == ISSUANCE_PATH)
        .unwrap();
    assert_eq!(
        issuance.headers.get("api-key").unwrap().to_str().unwrap(),
        "core-api-key"
    );
    assert_eq!(authority.issuance_requests().await[0]["jwksDomain"], authority.uri());
}
