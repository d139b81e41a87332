// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token format tests.
//!
//! Downstream services decode these tokens on their own, so the claim
//! layout and algorithm are part of the public contract.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storefront_auth::db::MemoryDb;
use storefront_auth::error::AppError;
use storefront_auth::models::Account;
use storefront_auth::services::TokenIssuer;

const SIGNING_KEY: &[u8] = b"test_signing_key_32_bytes_long!!";

/// Claims a downstream consumer relies on.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    username: String,
    staff: bool,
    superuser: bool,
    exp: usize,
    iat: usize,
}

fn issuer() -> TokenIssuer {
    TokenIssuer::new(
        SIGNING_KEY,
        Duration::from_secs(15 * 60),
        Duration::from_secs(3600),
        Arc::new(MemoryDb::new()),
    )
}

fn account() -> Account {
    Account {
        id: 12345678,
        username: "shopper".to_string(),
        email: "shopper@example.com".to_string(),
        password_hash: String::new(),
        is_active: true,
        is_staff: false,
        is_superuser: true,
        external_id: None,
        date_joined: "2020-05-01T00:00:00Z".to_string(),
        last_login: None,
        migrated_at: None,
    }
}

fn now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize
}

#[test]
fn test_access_token_decodes_with_shared_key() {
    let token = issuer().issue_access_token(&account()).unwrap();

    let key = DecodingKey::from_secret(SIGNING_KEY);
    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<Claims>(&token, &key, &validation)
        .expect("Failed to decode access token - check Claims compatibility");

    assert_eq!(token_data.header.alg, Algorithm::HS256);
    assert_eq!(token_data.claims.sub.parse::<u64>().unwrap(), 12345678);
    assert_eq!(token_data.claims.email, "shopper@example.com");
    assert_eq!(token_data.claims.username, "shopper");
    assert!(!token_data.claims.staff);
    assert!(token_data.claims.superuser);
}

#[test]
fn test_access_token_lifetime() {
    let token = issuer().issue_access_token(&account()).unwrap();
    let claims = issuer().validate_access_token(&token).unwrap();

    assert_eq!(claims.exp - claims.iat, 15 * 60);
    assert!(claims.exp > now());
}

#[test]
fn test_expired_token_is_rejected() {
    let issued = now() - 7200;
    let claims = Claims {
        sub: "1".to_string(),
        email: "shopper@example.com".to_string(),
        username: "shopper".to_string(),
        staff: false,
        superuser: false,
        iat: issued,
        exp: issued + 900,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SIGNING_KEY),
    )
    .unwrap();

    assert!(matches!(
        issuer().validate_access_token(&token),
        Err(AppError::InvalidToken)
    ));
}

#[test]
fn test_other_algorithm_is_rejected() {
    let claims = Claims {
        sub: "1".to_string(),
        email: "shopper@example.com".to_string(),
        username: "shopper".to_string(),
        staff: true,
        superuser: true,
        iat: now(),
        exp: now() + 900,
    };
    let token = encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(SIGNING_KEY),
    )
    .unwrap();

    assert!(issuer().validate_access_token(&token).is_err());
}
