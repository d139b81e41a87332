// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Legacy credential path: PBKDF2 hashes in the account store and locally
//! issued refresh sessions.

use super::{
    conclude, conclude_refresh, AuthDeps, AuthStrategy, ClientContext, CreateUserRequest,
    LoginRequest, Outcome, Rejected, Resolved,
};
use crate::config::AuthMode;
use crate::db::{AccountStore, AuditLog};
use crate::error::AppError;
use crate::models::{normalize_email, Account, AuthPath, NewAccount};
use crate::services::password::LegacyPasswordHasher;
use crate::services::tokens::{TokenIssuer, TokenPair};
use crate::time_utils::now_rfc3339;
use async_trait::async_trait;
use std::sync::Arc;

/// Building blocks shared by the local-only and hybrid strategies.
#[derive(Clone)]
pub(crate) struct LocalPath {
    accounts: Arc<dyn AccountStore>,
    tokens: TokenIssuer,
    hasher: LegacyPasswordHasher,
}

impl LocalPath {
    pub(crate) fn new(deps: &AuthDeps) -> Self {
        Self {
            accounts: deps.accounts.clone(),
            tokens: deps.tokens.clone(),
            hasher: deps.hasher.clone(),
        }
    }

    pub(crate) async fn find(&self, email: &str, path: AuthPath) -> Result<Account, Rejected> {
        match self.accounts.find_by_email(email).await {
            Ok(Some(account)) => Ok(account),
            Ok(None) => Err(Rejected::invalid_credentials(path, None, "unknown account")),
            Err(e) => Err(Rejected::system(path, None, e)),
        }
    }

    /// Check a password against the stored legacy hash.
    pub(crate) fn verify(
        &self,
        account: &Account,
        password: &str,
        path: AuthPath,
    ) -> Result<(), Rejected> {
        if !account.is_active {
            return Err(Rejected::invalid_credentials(
                path,
                Some(account.id),
                "inactive account",
            ));
        }
        if !account.has_legacy_password() {
            return Err(Rejected::invalid_credentials(
                path,
                Some(account.id),
                "no legacy password",
            ));
        }
        if !self.hasher.verify(password, &account.password_hash) {
            return Err(Rejected::invalid_credentials(
                path,
                Some(account.id),
                "password mismatch",
            ));
        }
        Ok(())
    }

    /// Record the login and issue local tokens.
    pub(crate) async fn start_session(
        &self,
        mut account: Account,
        remember_me: bool,
        ctx: &ClientContext,
        path: AuthPath,
    ) -> Outcome {
        let id = Some(account.id);
        account.last_login = Some(now_rfc3339());
        self.accounts
            .update(&account)
            .await
            .map_err(|e| Rejected::system(path, id, e))?;

        let refresh_token = if remember_me {
            Some(
                self.tokens
                    .issue_refresh_token(&account.email, &ctx.ip)
                    .await
                    .map_err(|e| Rejected::system(path, id, e))?,
            )
        } else {
            None
        };

        let pair = self
            .tokens
            .token_pair(&account, refresh_token)
            .map_err(|e| Rejected::system(path, id, e))?;

        Ok(Resolved {
            pair,
            account,
            path,
        })
    }

    /// Rotate a local refresh token. `Ok(None)` means the token is not a
    /// live local session.
    pub(crate) async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &ClientContext,
    ) -> Result<Option<Resolved>, Rejected> {
        let path = AuthPath::RefreshLocal;
        let session = match self.tokens.take_refresh_session(refresh_token).await {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(None),
            Err(e) => return Err(Rejected::system(path, None, e)),
        };

        let account = match self.accounts.find_by_email(&session.email).await {
            Ok(Some(account)) if account.is_active => account,
            Ok(account) => {
                return Err(Rejected::invalid_refresh(
                    path,
                    account.map(|a| a.id),
                    "account missing or inactive",
                )
                .with_email(&session.email))
            }
            Err(e) => return Err(Rejected::system(path, None, e).with_email(&session.email)),
        };

        let id = Some(account.id);
        let rotated = self
            .tokens
            .issue_refresh_token(&account.email, &ctx.ip)
            .await
            .map_err(|e| Rejected::system(path, id, e).with_email(&account.email))?;
        let pair = self
            .tokens
            .token_pair(&account, Some(rotated))
            .map_err(|e| Rejected::system(path, id, e).with_email(&account.email))?;

        Ok(Some(Resolved {
            pair,
            account,
            path,
        }))
    }

    pub(crate) async fn revoke(&self, refresh_token: &str) {
        if let Err(e) = self.tokens.take_refresh_session(refresh_token).await {
            tracing::warn!(error = %e, "Failed to revoke local refresh session");
        }
    }

    /// Create an account with a legacy hash and no provider link.
    pub(crate) async fn create(&self, req: &CreateUserRequest) -> Result<Account, AppError> {
        let email = normalize_email(&req.email);
        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(AppError::EmailAlreadyExists);
        }

        let account = self
            .accounts
            .insert(NewAccount {
                username: req.username.clone(),
                email,
                password_hash: self.hasher.hash(&req.password)?,
                external_id: None,
            })
            .await?;

        tracing::info!(account_id = account.id, "Created local account");
        Ok(account)
    }

    pub(crate) fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }
}

/// Local-only mode: no identity provider involved.
pub struct LocalAuth {
    local: LocalPath,
    audit: Arc<dyn AuditLog>,
}

impl LocalAuth {
    pub fn new(deps: AuthDeps) -> Self {
        Self {
            local: LocalPath::new(&deps),
            audit: deps.audit,
        }
    }
}

#[async_trait]
impl AuthStrategy for LocalAuth {
    fn mode(&self) -> AuthMode {
        AuthMode::Local
    }

    async fn login(&self, req: &LoginRequest, ctx: &ClientContext) -> Result<TokenPair, AppError> {
        let email = normalize_email(&req.email);
        let outcome = async {
            let account = self.local.find(&email, AuthPath::Local).await?;
            self.local.verify(&account, &req.password, AuthPath::Local)?;
            self.local
                .start_session(account, req.remember_me, ctx, AuthPath::Local)
                .await
        }
        .await;

        conclude(self.audit.as_ref(), &email, ctx, outcome).await
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &ClientContext,
    ) -> Result<TokenPair, AppError> {
        let outcome = match self.local.refresh(refresh_token, ctx).await {
            Ok(Some(resolved)) => Ok(resolved),
            Ok(None) => Err(Rejected::invalid_refresh(
                AuthPath::RefreshLocal,
                None,
                "unknown or expired refresh token",
            )),
            Err(rejected) => Err(rejected),
        };

        conclude_refresh(
            self.audit.as_ref(),
            self.local.tokens(),
            refresh_token,
            ctx,
            outcome,
        )
        .await
    }

    async fn logout(&self, refresh_token: &str) {
        self.local.revoke(refresh_token).await;
    }

    async fn create_user(&self, req: &CreateUserRequest) -> Result<Account, AppError> {
        self.local.create(req).await
    }
}
