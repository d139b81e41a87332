// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process storage backend for local development and tests.
//!
//! Implements every storage trait on top of `DashMap`; expiry is checked
//! lazily on access.

use crate::db::{AccountStore, AuditLog, SessionStore};
use crate::error::AppError;
use crate::models::{Account, LoginAuditEvent, NewAccount};
use crate::time_utils::now_rfc3339;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
struct KvEntry {
    value: String,
    expires_at: Instant,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory database. Cloning shares the underlying maps.
#[derive(Clone, Default)]
pub struct MemoryDb {
    accounts: Arc<DashMap<u64, Account>>,
    emails: Arc<DashMap<String, u64>>,
    next_id: Arc<AtomicU64>,
    audit: Arc<Mutex<Vec<LoginAuditEvent>>>,
    kv: Arc<DashMap<String, KvEntry>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded audit events, oldest first.
    pub fn audit_events(&self) -> Vec<LoginAuditEvent> {
        self.audit
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Whether a live (unexpired) key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.kv
            .get(key)
            .is_some_and(|entry| entry.is_live(Instant::now()))
    }

    /// Live keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        self.kv
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[async_trait]
impl AccountStore for MemoryDb {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let Some(id) = self.emails.get(email).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.accounts.get(&id).map(|account| account.clone()))
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<Account>, AppError> {
        Ok(self.accounts.get(&id).map(|account| account.clone()))
    }

    async fn insert(&self, new: NewAccount) -> Result<Account, AppError> {
        // Claim the email first so concurrent inserts cannot both succeed
        let id = match self.emails.entry(new.email.clone()) {
            Entry::Occupied(_) => return Err(AppError::EmailAlreadyExists),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                slot.insert(id);
                id
            }
        };

        let account = Account {
            id,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            is_active: true,
            is_staff: false,
            is_superuser: false,
            external_id: new.external_id,
            date_joined: now_rfc3339(),
            last_login: None,
            migrated_at: None,
        };
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn update(&self, account: &Account) -> Result<(), AppError> {
        match self.accounts.get_mut(&account.id) {
            Some(mut existing) => {
                if existing.email != account.email {
                    return Err(AppError::BadRequest(
                        "Account email cannot be changed".to_string(),
                    ));
                }
                *existing = account.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Account {}", account.id))),
        }
    }
}

#[async_trait]
impl AuditLog for MemoryDb {
    async fn record(&self, event: &LoginAuditEvent) -> Result<(), AppError> {
        self.audit
            .lock()
            .map_err(|_| AppError::Database("Audit log lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryDb {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let now = Instant::now();
        if let Some(entry) = self.kv.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.kv.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        let now = Instant::now();
        let entry = KvEntry {
            value: value.to_string(),
            expires_at: now + ttl,
        };

        match self.kv.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_live(now) {
                    return Ok(false);
                }
                slot.insert(entry);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let now = Instant::now();
        Ok(self
            .kv
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64, AppError> {
        let now = Instant::now();
        let mut slot = self.kv.entry(key.to_string()).or_insert_with(|| KvEntry {
            value: "0".to_string(),
            expires_at: now + ttl,
        });

        if !slot.is_live(now) {
            *slot = KvEntry {
                value: "0".to_string(),
                expires_at: now + ttl,
            };
        }

        let next = slot.value.parse::<u64>().unwrap_or(0) + 1;
        slot.value = next.to_string();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            username: email.split('@').next().unwrap_or_default().to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            external_id: None,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email() {
        let db = MemoryDb::new();
        let first = db.insert(new_account("a@x.com")).await.unwrap();
        assert_eq!(first.id, 1);

        let err = db.insert(new_account("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::EmailAlreadyExists));
    }

    #[tokio::test]
    async fn update_round_trips_through_lookup() {
        let db = MemoryDb::new();
        let mut account = db.insert(new_account("a@x.com")).await.unwrap();
        account.is_staff = true;
        db.update(&account).await.unwrap();

        let found = db.find_by_email("a@x.com").await.unwrap().unwrap();
        assert!(found.is_staff);
        assert_eq!(db.find_by_id(account.id).await.unwrap(), Some(found));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let db = MemoryDb::new();
        db.set_ex("k", "v", Duration::from_millis(30)).await.unwrap();
        assert_eq!(db.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(db.get("k").await.unwrap(), None);
        assert!(!db.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn set_nx_only_sets_absent_or_expired_keys() {
        let db = MemoryDb::new();
        let ttl = Duration::from_millis(30);

        assert!(db.set_nx_ex("lock", "1", ttl).await.unwrap());
        assert!(!db.set_nx_ex("lock", "2", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(db.set_nx_ex("lock", "3", ttl).await.unwrap());
        assert_eq!(db.get("lock").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_live_entry_was_removed() {
        let db = MemoryDb::new();
        db.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();

        assert!(db.delete("k").await.unwrap());
        assert!(!db.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn incr_counts_within_window() {
        let db = MemoryDb::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(db.incr_ex("c", ttl).await.unwrap(), 1);
        assert_eq!(db.incr_ex("c", ttl).await.unwrap(), 2);
        assert_eq!(db.get("c").await.unwrap().as_deref(), Some("2"));
    }
}
