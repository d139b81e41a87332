// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User-initiated move of a legacy account into the identity provider.

use crate::db::AccountStore;
use crate::error::AppError;
use crate::models::normalize_email;
use crate::services::bot_check::BotCheck;
use crate::services::keycloak::{ensure_user, IdentityProvider, IdpNewUser};
use crate::services::password::LegacyPasswordHasher;
use crate::time_utils::now_rfc3339;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MigrationRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
    #[serde(default)]
    pub captcha_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub email: String,
    pub migrated_at: String,
}

pub struct MigrationService {
    accounts: Arc<dyn AccountStore>,
    idp: Arc<dyn IdentityProvider>,
    hasher: LegacyPasswordHasher,
    bot_check: Arc<dyn BotCheck>,
}

impl MigrationService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        idp: Arc<dyn IdentityProvider>,
        hasher: LegacyPasswordHasher,
        bot_check: Arc<dyn BotCheck>,
    ) -> Self {
        Self {
            accounts,
            idp,
            hasher,
            bot_check,
        }
    }

    /// Prove ownership with the legacy password, then create the provider
    /// user and link it. Does not log the caller in.
    pub async fn migrate(&self, req: &MigrationRequest, ip: &str) -> Result<MigrationResult, AppError> {
        self.bot_check.verify(&req.captcha_token, ip).await?;

        let email = normalize_email(&req.email);
        let mut account = match self.accounts.find_by_email(&email).await? {
            Some(account) if account.is_active => account,
            _ => return Err(AppError::InvalidCredentials),
        };

        if account.is_migrated() {
            return Err(AppError::AlreadyMigrated);
        }

        if !account.has_legacy_password() || !self.hasher.verify(&req.password, &account.password_hash) {
            tracing::info!(account_id = account.id, "Migration rejected: password mismatch");
            return Err(AppError::InvalidCredentials);
        }

        let external_id = ensure_user(
            self.idp.as_ref(),
            &IdpNewUser {
                username: account.username.clone(),
                email: account.email.clone(),
                password: req.password.clone(),
            },
        )
        .await
        .map_err(|e| {
            tracing::error!(account_id = account.id, error = %e, "Migration failed at identity provider");
            AppError::from(e)
        })?;

        let now = now_rfc3339();
        account.link_external_id(external_id, &now);
        self.accounts.update(&account).await?;

        tracing::info!(account_id = account.id, "Account migrated to identity provider");
        Ok(MigrationResult {
            email: account.email,
            migrated_at: account.migrated_at.unwrap_or(now),
        })
    }
}
