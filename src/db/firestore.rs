// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Accounts (with an email index document enforcing uniqueness)
//! - Login audit events (append-only)
//! - Expiring key-value entries (refresh sessions, signup locks, counters)

use crate::db::{collections, AccountStore, AuditLog, SessionStore};
use crate::error::AppError;
use crate::models::{Account, LoginAuditEvent, NewAccount};
use crate::time_utils::now_rfc3339;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use firestore::errors::FirestoreError;
use firestore::FirestoreWritePrecondition;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempts to find a free random account ID before giving up.
const ACCOUNT_ID_ATTEMPTS: usize = 5;

/// Account IDs stay below 2^53 so they survive JSON number handling.
const ACCOUNT_ID_MASK: u64 = (1 << 53) - 1;

/// Email index document: `account_emails/{email}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailIndex {
    account_id: u64,
}

/// Key-value document: `kv/{encoded key}`.
///
/// `expires_at` is a native timestamp so a Firestore TTL policy on the
/// field can garbage-collect stale entries; reads check it as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvDocument {
    value: String,
    #[serde(with = "firestore::serialize_as_timestamp")]
    expires_at: DateTime<Utc>,
}

impl KvDocument {
    fn new(value: &str, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            value: value.to_string(),
            expires_at: Utc::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
    rng: SystemRandom,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
            rng: SystemRandom::new(),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
            rng: SystemRandom::new(),
        })
    }

    /// Create an offline client; every operation returns an error.
    pub fn new_mock() -> Self {
        Self {
            client: None,
            rng: SystemRandom::new(),
        }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    fn random_account_id(&self) -> Result<u64, AppError> {
        let mut bytes = [0u8; 8];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
        Ok((u64::from_be_bytes(bytes) & ACCOUNT_ID_MASK).max(1))
    }

    // ─── Key-Value Helpers ───────────────────────────────────────

    /// Document IDs may not contain `/`, so keys are URL-encoded.
    fn kv_doc_id(key: &str) -> String {
        urlencoding::encode(key).into_owned()
    }

    async fn get_kv(&self, key: &str) -> Result<Option<KvDocument>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::KV)
            .obj()
            .one(&Self::kv_doc_id(key))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_kv(&self, key: &str, doc: &KvDocument) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::KV)
            .document_id(Self::kv_doc_id(key))
            .object(doc)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Create-only write. Returns `false` if the document already exists.
    async fn create_kv(&self, key: &str, doc: &KvDocument) -> Result<bool, AppError> {
        let result: Result<(), FirestoreError> = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::KV)
            .document_id(Self::kv_doc_id(key))
            .object(doc)
            .execute()
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(FirestoreError::DataConflictError(_)) => Ok(false),
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    /// Delete only if the document still exists. Returns `false` when a
    /// concurrent writer removed it first.
    async fn delete_existing_kv(&self, key: &str) -> Result<bool, AppError> {
        let result: Result<(), FirestoreError> = self
            .get_client()?
            .fluent()
            .delete()
            .from(collections::KV)
            .document_id(Self::kv_doc_id(key))
            .precondition(FirestoreWritePrecondition::Exists(true))
            .execute()
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(FirestoreError::DataNotFoundError(_)) => Ok(false),
            Err(FirestoreError::DatabaseError(e)) if e.public.code == "FailedPrecondition" => {
                Ok(false)
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    async fn delete_kv(&self, key: &str) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::KV)
            .document_id(Self::kv_doc_id(key))
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for FirestoreDb {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let index: Option<EmailIndex> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACCOUNT_EMAILS)
            .obj()
            .one(email)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match index {
            Some(index) => self.find_by_id(index.account_id).await,
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<Account>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACCOUNTS)
            .obj()
            .one(&id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn insert(&self, new: NewAccount) -> Result<Account, AppError> {
        let client = self.get_client()?;

        for _ in 0..ACCOUNT_ID_ATTEMPTS {
            let id = self.random_account_id()?;

            let account = Account {
                id,
                username: new.username.clone(),
                email: new.email.clone(),
                password_hash: new.password_hash.clone(),
                is_active: true,
                is_staff: false,
                is_superuser: false,
                external_id: new.external_id,
                date_joined: now_rfc3339(),
                last_login: None,
                migrated_at: None,
            };

            let created: Result<(), FirestoreError> = client
                .fluent()
                .insert()
                .into(collections::ACCOUNTS)
                .document_id(id.to_string())
                .object(&account)
                .execute()
                .await;

            match created {
                Ok(()) => {}
                Err(FirestoreError::DataConflictError(_)) => continue,
                Err(e) => return Err(AppError::Database(e.to_string())),
            }

            // Claim the email; the create-only write is the uniqueness check
            let claimed: Result<(), FirestoreError> = client
                .fluent()
                .insert()
                .into(collections::ACCOUNT_EMAILS)
                .document_id(&account.email)
                .object(&EmailIndex { account_id: id })
                .execute()
                .await;

            if let Err(e) = claimed {
                // Roll back the orphaned account document
                if let Err(del_err) = client
                    .fluent()
                    .delete()
                    .from(collections::ACCOUNTS)
                    .document_id(id.to_string())
                    .execute()
                    .await
                {
                    tracing::error!(error = %del_err, account_id = id, "Failed to remove orphaned account");
                }

                return Err(match e {
                    FirestoreError::DataConflictError(_) => AppError::EmailAlreadyExists,
                    other => AppError::Database(other.to_string()),
                });
            }

            tracing::info!(account_id = id, "Account created");
            return Ok(account);
        }

        Err(AppError::Database(
            "Could not allocate a free account ID".to_string(),
        ))
    }

    async fn update(&self, account: &Account) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::ACCOUNTS)
            .document_id(account.id.to_string())
            .object(account)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for FirestoreDb {
    async fn record(&self, event: &LoginAuditEvent) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::LOGIN_AUDIT)
            .generate_document_id()
            .object(event)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FirestoreDb {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self
            .get_kv(key)
            .await?
            .filter(KvDocument::is_live)
            .map(|doc| doc.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.put_kv(key, &KvDocument::new(value, ttl)).await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        let doc = KvDocument::new(value, ttl);
        if self.create_kv(key, &doc).await? {
            return Ok(true);
        }

        // An expired entry the TTL policy has not collected yet does not count
        match self.get_kv(key).await? {
            Some(existing) if existing.is_live() => Ok(false),
            _ => {
                self.delete_kv(key).await?;
                self.create_kv(key, &doc).await
            }
        }
    }

    /// The conditional delete picks a single winner among concurrent
    /// callers, so refresh rotation stays take-once on this backend.
    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        match self.get_kv(key).await? {
            Some(doc) if doc.is_live() => self.delete_existing_kv(key).await,
            Some(_) => {
                self.delete_kv(key).await?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Read-modify-write; concurrent increments may be lost, which only
    /// makes rate limits slightly more lenient.
    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64, AppError> {
        let current = self.get_kv(key).await?.filter(KvDocument::is_live);

        let (next, doc) = match current {
            Some(mut doc) => {
                let next = doc.value.parse::<u64>().unwrap_or(0) + 1;
                doc.value = next.to_string();
                (next, doc)
            }
            None => (1, KvDocument::new("1", ttl)),
        };

        self.put_kv(key, &doc).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_doc_id_has_no_slashes() {
        let id = FirestoreDb::kv_doc_id("refresh:ab/cd");
        assert!(!id.contains('/'));
    }

    #[test]
    fn random_account_ids_fit_in_53_bits() {
        let db = FirestoreDb::new_mock();
        for _ in 0..100 {
            let id = db.random_account_id().unwrap();
            assert!(id >= 1 && id <= ACCOUNT_ID_MASK);
        }
    }

    #[tokio::test]
    async fn offline_client_reports_database_error() {
        let db = FirestoreDb::new_mock();
        let err = db.find_by_email("a@x.com").await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
