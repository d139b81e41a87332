// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage layer: account store, audit log and key-value session store.
//!
//! Each concern is a trait so the auth flows can run against Firestore in
//! deployment and against the in-memory backend in tests.

pub mod firestore;
pub mod keys;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{Account, LoginAuditEvent, NewAccount};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Collection names as constants.
pub mod collections {
    pub const ACCOUNTS: &str = "accounts";
    /// Email -> account ID index (enforces email uniqueness)
    pub const ACCOUNT_EMAILS: &str = "account_emails";
    pub const LOGIN_AUDIT: &str = "login_audit";
    /// Expiring key-value entries (sessions, locks, counters)
    pub const KV: &str = "kv";
}

/// Relational-style account store with a unique email index.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError>;

    async fn find_by_id(&self, id: u64) -> Result<Option<Account>, AppError>;

    /// Insert a new account. Fails with `EmailAlreadyExists` on a duplicate email.
    async fn insert(&self, account: NewAccount) -> Result<Account, AppError>;

    async fn update(&self, account: &Account) -> Result<(), AppError>;
}

/// Append-only sink for login audit events.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: &LoginAuditEvent) -> Result<(), AppError>;
}

/// Key-value store with per-key TTL. All operations are single-key.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;

    /// Set only if the key is absent (or expired). Returns whether it was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError>;

    /// Delete a key. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Increment a counter, starting the TTL when the counter is created.
    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64, AppError>;
}

/// Read and deserialize a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn SessionStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AppError::Database(format!("Corrupt session entry {}: {}", key, e))),
        None => Ok(None),
    }
}

/// Serialize and store a JSON value with a TTL.
pub async fn set_json<T: Serialize>(
    store: &dyn SessionStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), AppError> {
    let raw = serde_json::to_string(value)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Serialize session entry: {}", e)))?;
    store.set_ex(key, &raw, ttl).await
}
