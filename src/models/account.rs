// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account model for storage and API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity record stored in the account store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Numeric account ID (also used as document ID)
    pub id: u64,
    pub username: String,
    /// Email address, unique and stored lowercase
    pub email: String,
    /// Legacy PBKDF2 hash; empty once the account is IdP-backed
    #[serde(default)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    /// Subject ID of the account in the identity provider
    #[serde(default)]
    pub external_id: Option<Uuid>,
    /// When the account was created (RFC 3339)
    pub date_joined: String,
    #[serde(default)]
    pub last_login: Option<String>,
    /// When the legacy credential was moved to the identity provider
    #[serde(default)]
    pub migrated_at: Option<String>,
}

impl Account {
    /// Whether the identity provider is the account's credential path.
    pub fn is_migrated(&self) -> bool {
        self.external_id.is_some()
    }

    pub fn has_legacy_password(&self) -> bool {
        !self.password_hash.is_empty()
    }

    /// Move the credential path to the identity provider.
    ///
    /// Clears the legacy hash; `migrated_at` is only stamped when a legacy
    /// credential existed.
    pub fn link_external_id(&mut self, external_id: Uuid, now: &str) {
        if self.has_legacy_password() {
            self.migrated_at = Some(now.to_string());
        }
        self.external_id = Some(external_id);
        self.password_hash.clear();
    }
}

/// Fields required to create an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub external_id: Option<Uuid>,
}

/// Canonical form of an email address used for lookups and keys.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_account() -> Account {
        Account {
            id: 1,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "pbkdf2_sha256$1000$salt$hash".to_string(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            external_id: None,
            date_joined: "2024-01-01T00:00:00Z".to_string(),
            last_login: None,
            migrated_at: None,
        }
    }

    #[test]
    fn link_external_id_clears_legacy_hash() {
        let mut account = legacy_account();
        let id = Uuid::new_v4();

        account.link_external_id(id, "2026-01-01T00:00:00Z");

        assert_eq!(account.external_id, Some(id));
        assert!(!account.has_legacy_password());
        assert_eq!(account.migrated_at.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn link_without_legacy_hash_is_not_a_migration() {
        let mut account = legacy_account();
        account.password_hash.clear();

        account.link_external_id(Uuid::new_v4(), "2026-01-01T00:00:00Z");

        assert!(account.is_migrated());
        assert_eq!(account.migrated_at, None);
    }

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}
