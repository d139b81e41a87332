// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local token issuance.
//!
//! Handles:
//! - Signed HS256 access tokens carrying account claims
//! - Opaque random refresh tokens
//! - Refresh session storage for both token families, with a per-email
//!   reverse index so a new session replaces the previous one

use crate::db::{get_json, keys, set_json, SessionStore};
use crate::error::AppError;
use crate::models::{Account, IdpSession, RefreshSession, SessionRecord};
use crate::time_utils::now_rfc3339;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const OPAQUE_TOKEN_BYTES: usize = 32;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (account ID)
    pub sub: String,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub staff: bool,
    #[serde(default)]
    pub superuser: bool,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

/// Which refresh token family a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFamily {
    Local,
    Idp,
}

impl TokenFamily {
    fn token_key(self, token: &str) -> String {
        match self {
            TokenFamily::Local => keys::refresh(token),
            TokenFamily::Idp => keys::idp_refresh(token),
        }
    }

    fn owner_key(self, email: &str) -> String {
        match self {
            TokenFamily::Local => keys::refresh_owner(email),
            TokenFamily::Idp => keys::idp_refresh_owner(email),
        }
    }
}

/// Access/refresh token pair returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Issues access tokens and manages refresh sessions.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store: Arc<dyn SessionStore>,
    rng: SystemRandom,
}

impl TokenIssuer {
    pub fn new(
        signing_key: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
            access_ttl,
            refresh_ttl,
            store,
            rng: SystemRandom::new(),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    // ─── Access Tokens ───────────────────────────────────────────────────────

    /// Create a signed access token for an account.
    pub fn issue_access_token(&self, account: &Account) -> Result<String, AppError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
            .as_secs() as usize;

        let claims = Claims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            username: account.username.clone(),
            staff: account.is_staff,
            superuser: account.is_superuser,
            iat: now,
            exp: now + self.access_ttl.as_secs() as usize,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))
    }

    /// Decode and validate an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AppError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::InvalidToken)
    }

    /// Build the client-facing pair for an account.
    pub fn token_pair(
        &self,
        account: &Account,
        refresh_token: Option<String>,
    ) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(account)?,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }

    // ─── Refresh Sessions ────────────────────────────────────────────────────

    /// Store a local refresh session, replacing the account's previous one.
    pub async fn issue_refresh_token(&self, email: &str, ip: &str) -> Result<String, AppError> {
        let session = RefreshSession {
            email: email.to_string(),
            ip: ip.to_string(),
            issued_at: now_rfc3339(),
        };
        self.store_session(TokenFamily::Local, &session).await
    }

    /// Store an IdP-backed session, replacing the account's previous one.
    ///
    /// Returns the opaque token handed to the client.
    pub async fn issue_idp_session(
        &self,
        email: &str,
        ip: &str,
        idp_refresh_token: &str,
    ) -> Result<String, AppError> {
        let session = IdpSession {
            email: email.to_string(),
            ip: ip.to_string(),
            issued_at: now_rfc3339(),
            idp_refresh_token: idp_refresh_token.to_string(),
        };
        self.store_session(TokenFamily::Idp, &session).await
    }

    pub async fn lookup_refresh_session(
        &self,
        token: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        get_json(self.store.as_ref(), &TokenFamily::Local.token_key(token)).await
    }

    /// Consume a local refresh session. Only one caller can take a token.
    pub async fn take_refresh_session(
        &self,
        token: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        self.take_session(TokenFamily::Local, token).await
    }

    /// Consume an IdP-backed session. Only one caller can take a token.
    pub async fn take_idp_session(&self, token: &str) -> Result<Option<IdpSession>, AppError> {
        self.take_session(TokenFamily::Idp, token).await
    }

    /// Delete whatever session either family holds for this token.
    pub async fn purge(&self, token: &str) -> Result<(), AppError> {
        self.store.delete(&TokenFamily::Local.token_key(token)).await?;
        self.store.delete(&TokenFamily::Idp.token_key(token)).await?;
        Ok(())
    }

    /// Invalidate the current session of both families for an account.
    pub async fn invalidate_for_email(&self, email: &str) -> Result<(), AppError> {
        for family in [TokenFamily::Local, TokenFamily::Idp] {
            let owner_key = family.owner_key(email);
            if let Some(token) = self.store.get(&owner_key).await? {
                self.store.delete(&family.token_key(&token)).await?;
            }
            self.store.delete(&owner_key).await?;
        }
        Ok(())
    }

    async fn store_session<T: SessionRecord>(
        &self,
        family: TokenFamily,
        session: &T,
    ) -> Result<String, AppError> {
        // One active session per account, across both families
        self.invalidate_for_email(session.email()).await?;

        let token = generate_opaque_token(&self.rng)?;
        set_json(
            self.store.as_ref(),
            &family.token_key(&token),
            session,
            self.refresh_ttl,
        )
        .await?;
        self.store
            .set_ex(&family.owner_key(session.email()), &token, self.refresh_ttl)
            .await?;

        Ok(token)
    }

    async fn take_session<T: SessionRecord>(
        &self,
        family: TokenFamily,
        token: &str,
    ) -> Result<Option<T>, AppError> {
        let key = family.token_key(token);
        let Some(session) = get_json::<T>(self.store.as_ref(), &key).await? else {
            return Ok(None);
        };

        // Whoever deletes the record owns the rotation
        if !self.store.delete(&key).await? {
            return Ok(None);
        }

        let owner_key = family.owner_key(session.email());
        if self.store.get(&owner_key).await?.as_deref() == Some(token) {
            self.store.delete(&owner_key).await?;
        }

        Ok(Some(session))
    }
}

/// Generate a random URL-safe token.
pub fn generate_opaque_token(rng: &SystemRandom) -> Result<String, AppError> {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
