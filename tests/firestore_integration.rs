// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running
//! (`FIRESTORE_EMULATOR_HOST`); they are skipped otherwise.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storefront_auth::db::{AccountStore, AuditLog, SessionStore};
use storefront_auth::error::AppError;
use storefront_auth::models::{AuthPath, LoginAuditEvent, NewAccount};
use storefront_auth::services::TokenIssuer;
use uuid::Uuid;

mod common;
use common::test_db;

/// Unique suffix for test isolation.
fn unique() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

fn new_account(email: &str) -> NewAccount {
    NewAccount {
        username: "emulator".to_string(),
        email: email.to_string(),
        password_hash: "pbkdf2_sha256$1000$salt$hash".to_string(),
        external_id: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ACCOUNT TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_account_insert_and_lookup() {
    require_emulator!();

    let db = test_db().await;
    let email = format!("user-{}@example.com", unique());

    assert!(db.find_by_email(&email).await.unwrap().is_none());

    let created = db.insert(new_account(&email)).await.unwrap();
    assert!(created.is_active);
    assert!(created.id < (1 << 53));

    let by_email = db.find_by_email(&email).await.unwrap().unwrap();
    let by_id = db.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(by_email, created);
    assert_eq!(by_id, created);
}

#[tokio::test]
async fn test_duplicate_email_is_rejected() {
    require_emulator!();

    let db = test_db().await;
    let email = format!("dup-{}@example.com", unique());

    db.insert(new_account(&email)).await.unwrap();
    let err = db.insert(new_account(&email)).await.unwrap_err();
    assert!(matches!(err, AppError::EmailAlreadyExists));
}

#[tokio::test]
async fn test_account_update_links_external_id() {
    require_emulator!();

    let db = test_db().await;
    let email = format!("link-{}@example.com", unique());
    let mut account = db.insert(new_account(&email)).await.unwrap();

    let external_id = Uuid::new_v4();
    account.link_external_id(external_id, "2026-01-01T00:00:00Z");
    db.update(&account).await.unwrap();

    let fetched = db.find_by_id(account.id).await.unwrap().unwrap();
    assert_eq!(fetched.external_id, Some(external_id));
    assert!(!fetched.has_legacy_password());
    assert_eq!(fetched.migrated_at.as_deref(), Some("2026-01-01T00:00:00Z"));
}

// ═══════════════════════════════════════════════════════════════════════════
// SESSION STORE TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_kv_set_get_delete() {
    require_emulator!();

    let db = test_db().await;
    let key = format!("refresh:{}", unique());

    db.set_ex(&key, "session", Duration::from_secs(60)).await.unwrap();
    assert_eq!(db.get(&key).await.unwrap().as_deref(), Some("session"));

    assert!(db.delete(&key).await.unwrap());
    assert!(!db.delete(&key).await.unwrap());
    assert_eq!(db.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_kv_set_nx_and_incr() {
    require_emulator!();

    let db = test_db().await;
    let lock = format!("signup_lock:{}@example.com", unique());
    let counter = format!("signup_ip:10.0.{}", unique());
    let ttl = Duration::from_secs(60);

    assert!(db.set_nx_ex(&lock, "a", ttl).await.unwrap());
    assert!(!db.set_nx_ex(&lock, "b", ttl).await.unwrap());

    assert_eq!(db.incr_ex(&counter, ttl).await.unwrap(), 1);
    assert_eq!(db.incr_ex(&counter, ttl).await.unwrap(), 2);
}

#[tokio::test]
async fn test_expired_kv_entries_are_invisible() {
    require_emulator!();

    let db = test_db().await;
    let key = format!("signup:{}", unique());

    db.set_ex(&key, "pending", Duration::from_millis(200)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(db.get(&key).await.unwrap(), None);
    assert!(db.set_nx_ex(&key, "fresh", Duration::from_secs(60)).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_deletes_have_single_winner() {
    require_emulator!();

    let db = test_db().await;
    let key = format!("idp_refresh:{}", unique());
    db.set_ex(&key, "session", Duration::from_secs(60)).await.unwrap();

    let (a, b) = tokio::join!(db.delete(&key), db.delete(&key));

    let winners = [a.unwrap(), b.unwrap()].iter().filter(|won| **won).count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_refresh_session_is_taken_once() {
    require_emulator!();

    let db = test_db().await;
    let issuer = TokenIssuer::new(
        b"emulator_signing_key_32_bytes!!!",
        Duration::from_secs(900),
        Duration::from_secs(3600),
        Arc::new(db),
    );
    let email = format!("rotate-{}@example.com", unique());
    let token = issuer.issue_refresh_token(&email, "127.0.0.1").await.unwrap();

    let (a, b) = tokio::join!(
        issuer.take_refresh_session(&token),
        issuer.take_refresh_session(&token)
    );

    let taken = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|session| session.is_some())
        .count();
    assert_eq!(taken, 1);
}

#[tokio::test]
async fn test_audit_event_is_recorded() {
    require_emulator!();

    let db = test_db().await;
    db.record(&LoginAuditEvent {
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        ip: "127.0.0.1".to_string(),
        user_id: None,
        email: format!("audit-{}@example.com", unique()),
        user_agent: None,
        success: false,
        path: AuthPath::Legacy,
        reason: "password mismatch".to_string(),
    })
    .await
    .unwrap();
}
