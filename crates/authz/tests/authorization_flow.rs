//! End-to-end authorization flows: verify, then check permissions, with
//! the cache layer and deterministic clock in play.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::TimeDelta;
use keygrid_authz::{AuthzError, KeyVerifier, PermissionService};
use keygrid_storage::{
    Clock, KeyHash, KeyId, KeyStore, ManualClock, MemoryKeyStore, WorkspaceId,
    testutil::{FlakyKeyStore, active_key, expiring_key},
};

const T0_MS: i64 = 1_700_000_000_000;

#[tokio::test]
async fn happy_verify_hits_positive_cache_on_repeat() {
    let store = Arc::new(FlakyKeyStore::new(MemoryKeyStore::new()));
    store.inner().insert_key(KeyHash::from("H1"), active_key("K1", "W1"));
    let clock = ManualClock::starting_at_ms(T0_MS);
    let verifier = KeyVerifier::new(Arc::clone(&store) as Arc<dyn KeyStore>, Arc::new(clock));

    let first = verifier.verify(&KeyHash::from("H1")).await.unwrap();
    assert_eq!(first.authorized_workspace_id, WorkspaceId::from("W1"));
    assert_eq!(first.key_id, KeyId::from("K1"));

    let second = verifier.verify(&KeyHash::from("H1")).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(store.call_count(), 1, "second verify must hit the cache");
    assert_eq!(verifier.cache_metrics().snapshot().hits, 1);
}

#[tokio::test]
async fn expired_key_rejects_and_repeats_from_cache() {
    let store = Arc::new(FlakyKeyStore::new(MemoryKeyStore::new()));
    let clock = ManualClock::starting_at_ms(T0_MS);
    // expires_at strictly in the past relative to the test clock.
    let expires_at = clock.now() - TimeDelta::seconds(1);
    store.inner().insert_key(KeyHash::from("H2"), expiring_key("K2", "W1", expires_at));
    let verifier =
        KeyVerifier::new(Arc::clone(&store) as Arc<dyn KeyStore>, Arc::new(clock.clone()));

    let err = verifier.verify(&KeyHash::from("H2")).await.unwrap_err();
    assert!(matches!(err, AuthzError::Expired));

    // Same clock position, repeated call: the rejection is recomputed
    // from the cached record, not refetched.
    let err = verifier.verify(&KeyHash::from("H2")).await.unwrap_err();
    assert!(matches!(err, AuthzError::Expired));
    assert_eq!(store.call_count(), 1);
    assert_eq!(verifier.metrics().snapshot().expired, 2);
}

#[tokio::test]
async fn permission_check_after_verify() {
    let store = MemoryKeyStore::new();
    store.insert_key(KeyHash::from("H3"), active_key("K3", "W1"));
    store.set_permissions(
        KeyId::from("K3"),
        vec!["docs.read.*".to_owned(), "billing.read".to_owned()],
    );
    let store = Arc::new(store);
    let clock = ManualClock::starting_at_ms(T0_MS);

    let verifier =
        KeyVerifier::new(Arc::clone(&store) as Arc<dyn KeyStore>, Arc::new(clock));
    let permissions = PermissionService::new(Arc::clone(&store) as Arc<dyn KeyStore>);

    let verified = verifier.verify(&KeyHash::from("H3")).await.unwrap();

    let allowed = permissions
        .check_text(&verified.key_id, "docs.read.invoice and billing.read")
        .await
        .unwrap();
    assert!(allowed.valid);
    assert!(allowed.missing.is_empty());

    let denied = permissions.check_text(&verified.key_id, "docs.write").await.unwrap();
    assert!(!denied.valid);
    assert_eq!(denied.missing, vec!["docs.write"]);
}

#[tokio::test]
async fn verify_outcomes_are_idempotent_across_states() {
    let store = Arc::new(MemoryKeyStore::new());
    let clock = ManualClock::starting_at_ms(T0_MS);
    let verifier =
        KeyVerifier::new(Arc::clone(&store) as Arc<dyn KeyStore>, Arc::new(clock.clone()));

    store.insert_key(KeyHash::from("H4"), active_key("K4", "W1"));
    let expires_at = clock.now() + TimeDelta::seconds(30);
    store.insert_key(KeyHash::from("H5"), expiring_key("K5", "W1", expires_at));

    for _ in 0..3 {
        assert!(verifier.verify(&KeyHash::from("H4")).await.is_ok());
        assert!(verifier.verify(&KeyHash::from("H5")).await.is_ok());
        assert!(matches!(
            verifier.verify(&KeyHash::from("absent")).await.unwrap_err(),
            AuthzError::NotFound
        ));
    }

    // Advance past H5's expiry: its outcome flips exactly once and stays.
    clock.advance_ms(31_000);
    for _ in 0..3 {
        assert!(matches!(
            verifier.verify(&KeyHash::from("H5")).await.unwrap_err(),
            AuthzError::Expired
        ));
    }

    let snapshot = verifier.metrics().snapshot();
    assert_eq!(snapshot.ok, 6);
    assert_eq!(snapshot.not_found, 3);
    assert_eq!(snapshot.expired, 3);
}

#[tokio::test]
async fn grants_added_later_are_visible_after_invalidation() {
    let store = Arc::new(MemoryKeyStore::new());
    store.set_permissions(KeyId::from("K6"), vec!["docs.read".to_owned()]);
    let permissions = PermissionService::new(Arc::clone(&store) as Arc<dyn KeyStore>);

    assert!(!permissions.check_text(&KeyId::from("K6"), "docs.write").await.unwrap().valid);

    store.set_permissions(
        KeyId::from("K6"),
        vec!["docs.read".to_owned(), "docs.write".to_owned()],
    );
    permissions.invalidate(&KeyId::from("K6"));

    assert!(permissions.check_text(&KeyId::from("K6"), "docs.write").await.unwrap().valid);
}
