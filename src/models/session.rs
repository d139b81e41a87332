// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Records kept in the key-value session store.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A session record owned by exactly one account email.
pub trait SessionRecord: Serialize + DeserializeOwned + Send + Sync {
    fn email(&self) -> &str;
}

/// Locally issued refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSession {
    pub email: String,
    pub ip: String,
    pub issued_at: String,
}

impl SessionRecord for RefreshSession {
    fn email(&self) -> &str {
        &self.email
    }
}

/// Refresh token backed by an identity provider session.
///
/// The client only ever sees the opaque local token; the provider's own
/// refresh token stays server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpSession {
    pub email: String,
    pub ip: String,
    pub issued_at: String,
    pub idp_refresh_token: String,
}

impl SessionRecord for IdpSession {
    fn email(&self) -> &str {
        &self.email
    }
}

/// Signup waiting for email confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSignup {
    pub email: String,
    pub username: String,
    /// AES-GCM ciphertext of the chosen password (base64)
    pub password_encrypted: String,
    pub ip: String,
    pub requested_at: String,
}
