// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login, refresh, logout and account creation across identity paths.
//!
//! One `AuthStrategy` implementation exists per deployment mode and is
//! chosen once at startup:
//! - `LocalAuth`: legacy hashes and local tokens only
//! - `IdpAuth`: identity provider only
//! - `HybridAuth`: identity provider first, legacy fallback with lazy
//!   migration into the provider
//!
//! Each step returns an explicit `Outcome`; `conclude` turns it into the
//! caller's result and records exactly one audit event per request.

pub mod hybrid;
pub mod idp;
pub mod local;

pub use hybrid::HybridAuth;
pub use idp::IdpAuth;
pub use local::LocalAuth;

use crate::config::{AuthMode, Config};
use crate::db::{AccountStore, AuditLog};
use crate::error::AppError;
use crate::models::{Account, AuthPath, LoginAuditEvent};
use crate::services::keycloak::IdentityProvider;
use crate::services::password::LegacyPasswordHasher;
use crate::services::tokens::{TokenIssuer, TokenPair};
use crate::time_utils::now_rfc3339;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

/// Who is calling, for audit and session records.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 150))]
    pub username: String,
    #[validate(length(min = 8, max = 256))]
    pub password: String,
}

/// Identity resolution for one deployment mode.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn mode(&self) -> AuthMode;

    async fn login(&self, req: &LoginRequest, ctx: &ClientContext)
        -> Result<TokenPair, AppError>;

    /// Rotate a refresh token. A token can be used successfully only once.
    async fn refresh(&self, refresh_token: &str, ctx: &ClientContext)
        -> Result<TokenPair, AppError>;

    /// Best-effort session teardown; never fails.
    async fn logout(&self, refresh_token: &str);

    async fn create_user(&self, req: &CreateUserRequest) -> Result<Account, AppError>;
}

/// Shared dependencies for every strategy.
#[derive(Clone)]
pub struct AuthDeps {
    pub accounts: Arc<dyn AccountStore>,
    pub audit: Arc<dyn AuditLog>,
    pub tokens: TokenIssuer,
    pub hasher: LegacyPasswordHasher,
}

/// Build the strategy for the configured mode.
pub fn build_strategy(
    config: &Config,
    deps: AuthDeps,
    idp: Option<Arc<dyn IdentityProvider>>,
) -> Result<Arc<dyn AuthStrategy>, AppError> {
    let strategy: Arc<dyn AuthStrategy> = match (config.auth_mode, idp) {
        (AuthMode::Local, _) => Arc::new(LocalAuth::new(deps)),
        (AuthMode::Idp, Some(idp)) => Arc::new(IdpAuth::new(deps, idp, config.auto_create_accounts)),
        (AuthMode::Hybrid, Some(idp)) => Arc::new(HybridAuth::new(
            deps,
            idp,
            config.auto_create_accounts,
            config.account_creation,
        )),
        (mode, None) => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "{:?} auth mode requires an identity provider",
                mode
            )))
        }
    };

    tracing::info!(mode = ?strategy.mode(), "Auth strategy selected");
    Ok(strategy)
}

/// Successful terminal step.
pub(crate) struct Resolved {
    pub pair: TokenPair,
    pub account: Account,
    pub path: AuthPath,
}

/// Failed terminal step, with what to audit and what to return.
pub(crate) struct Rejected {
    pub path: AuthPath,
    pub user_id: Option<u64>,
    /// Account email when it differs from what the caller presented
    pub email: Option<String>,
    pub reason: String,
    pub error: AppError,
}

impl Rejected {
    pub fn invalid_credentials(
        path: AuthPath,
        user_id: Option<u64>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            path,
            user_id,
            email: None,
            reason: reason.into(),
            error: AppError::InvalidCredentials,
        }
    }

    pub fn invalid_refresh(path: AuthPath, user_id: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            path,
            user_id,
            email: None,
            reason: reason.into(),
            error: AppError::InvalidRefreshToken,
        }
    }

    pub fn system(path: AuthPath, user_id: Option<u64>, error: AppError) -> Self {
        Self {
            path,
            user_id,
            email: None,
            reason: error.to_string(),
            error,
        }
    }

    /// Attribute the failure to the account owning a refresh session.
    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }
}

pub(crate) type Outcome = Result<Resolved, Rejected>;

/// Record the audit event for a finished request and produce its result.
pub(crate) async fn conclude(
    audit: &dyn AuditLog,
    email: &str,
    ctx: &ClientContext,
    outcome: Outcome,
) -> Result<TokenPair, AppError> {
    let event = match &outcome {
        Ok(resolved) => LoginAuditEvent {
            timestamp: now_rfc3339(),
            ip: ctx.ip.clone(),
            user_id: Some(resolved.account.id),
            email: resolved.account.email.clone(),
            user_agent: ctx.user_agent.clone(),
            success: true,
            path: resolved.path,
            reason: "ok".to_string(),
        },
        Err(rejected) => LoginAuditEvent {
            timestamp: now_rfc3339(),
            ip: ctx.ip.clone(),
            user_id: rejected.user_id,
            email: rejected.email.clone().unwrap_or_else(|| email.to_string()),
            user_agent: ctx.user_agent.clone(),
            success: false,
            path: rejected.path,
            reason: rejected.reason.clone(),
        },
    };

    if let Err(e) = audit.record(&event).await {
        tracing::error!(error = %e, "Failed to record login audit event");
    }

    match outcome {
        Ok(resolved) => {
            tracing::info!(
                account_id = resolved.account.id,
                path = ?resolved.path,
                "Authentication succeeded"
            );
            Ok(resolved.pair)
        }
        Err(rejected) => {
            tracing::info!(
                user_id = ?rejected.user_id,
                path = ?rejected.path,
                reason = %rejected.reason,
                "Authentication failed"
            );
            Err(rejected.error)
        }
    }
}

/// Like `conclude`, but purges the presented token when the refresh failed.
pub(crate) async fn conclude_refresh(
    audit: &dyn AuditLog,
    tokens: &TokenIssuer,
    refresh_token: &str,
    ctx: &ClientContext,
    outcome: Outcome,
) -> Result<TokenPair, AppError> {
    if outcome.is_err() {
        if let Err(e) = tokens.purge(refresh_token).await {
            tracing::warn!(error = %e, "Failed to purge stale refresh token");
        }
    }
    conclude(audit, "", ctx, outcome).await
}
