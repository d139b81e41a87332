// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Explicit account migration endpoint.

mod common;

use axum::http::StatusCode;
use common::{create_test_app, create_test_app_with, post_json, seed_legacy_account, IdpBehavior};
use serde_json::json;
use storefront_auth::config::{AuthMode, Config};
use storefront_auth::db::AccountStore;
use storefront_auth::services::keycloak::IdentityProvider;

const IP: &str = "198.51.100.50";

fn migrate_body(email: &str, password: &str) -> serde_json::Value {
    json!({ "email": email, "password": password, "captcha_token": "token" })
}

#[tokio::test]
async fn test_migrate_legacy_account() {
    let app = create_test_app();
    let seeded = seed_legacy_account(&app.db, "legacy@example.com", "old password").await;

    let (status, body) = post_json(
        &app.router,
        "/auth/migration",
        migrate_body("legacy@example.com", "old password"),
        IP,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "legacy@example.com");

    let account = app.db.find_by_id(seeded.id).await.unwrap().unwrap();
    assert_eq!(body["migrated_at"], account.migrated_at.clone().unwrap());
    assert_eq!(account.external_id, app.idp.user_id("legacy@example.com"));
    assert!(!account.has_legacy_password());

    // The provider accepts the same password afterwards
    assert!(app
        .idp
        .password_grant("legacy@example.com", "old password")
        .await
        .is_ok());

    // Migration is not a login
    assert!(app.db.audit_events().is_empty());
}

#[tokio::test]
async fn test_migrate_twice_conflicts() {
    let app = create_test_app();
    seed_legacy_account(&app.db, "legacy@example.com", "old password").await;

    post_json(
        &app.router,
        "/auth/migration",
        migrate_body("legacy@example.com", "old password"),
        IP,
    )
    .await;
    let (status, body) = post_json(
        &app.router,
        "/auth/migration",
        migrate_body("legacy@example.com", "old password"),
        IP,
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_migrated");
}

#[tokio::test]
async fn test_migrate_rejects_bad_credentials() {
    let app = create_test_app();
    seed_legacy_account(&app.db, "legacy@example.com", "old password").await;

    let (status, body) = post_json(
        &app.router,
        "/auth/migration",
        migrate_body("legacy@example.com", "wrong"),
        IP,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");

    let (status, _) = post_json(
        &app.router,
        "/auth/migration",
        migrate_body("nobody@example.com", "wrong"),
        IP,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.idp.user_id("legacy@example.com"), None);
}

#[tokio::test]
async fn test_existing_idp_user_is_reused() {
    let app = create_test_app();
    let seeded = seed_legacy_account(&app.db, "legacy@example.com", "old password").await;
    let existing = app.idp.add_user("legacy@example.com", "old password");

    let (status, _) = post_json(
        &app.router,
        "/auth/migration",
        migrate_body("legacy@example.com", "old password"),
        IP,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let account = app.db.find_by_id(seeded.id).await.unwrap().unwrap();
    assert_eq!(account.external_id, Some(existing));
}

#[tokio::test]
async fn test_idp_outage_leaves_account_untouched() {
    let app = create_test_app();
    let seeded = seed_legacy_account(&app.db, "legacy@example.com", "old password").await;
    app.idp.set_behavior(IdpBehavior::Down);

    let (status, body) = post_json(
        &app.router,
        "/auth/migration",
        migrate_body("legacy@example.com", "old password"),
        IP,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "idp_error");

    let account = app.db.find_by_id(seeded.id).await.unwrap().unwrap();
    assert!(!account.is_migrated());
    assert!(account.has_legacy_password());
}

#[tokio::test]
async fn test_migration_disabled_in_local_mode() {
    let mut config = Config::test_default();
    config.auth_mode = AuthMode::Local;
    let app = create_test_app_with(config, None);
    seed_legacy_account(&app.db, "legacy@example.com", "old password").await;

    let (status, body) = post_json(
        &app.router,
        "/auth/migration",
        migrate_body("legacy@example.com", "old password"),
        IP,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
