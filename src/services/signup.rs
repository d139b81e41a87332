// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Two-phase signup: request with email confirmation, then account
//! creation when the confirmation link is followed.
//!
//! Between the phases the chosen password lives in the session store,
//! encrypted and bound to the signup email.

use crate::auth::{AuthStrategy, CreateUserRequest};
use crate::db::{get_json, keys, set_json, AccountStore, SessionStore};
use crate::error::AppError;
use crate::models::{normalize_email, Account, PendingSignup};
use crate::services::bot_check::BotCheck;
use crate::services::cipher::PayloadCipher;
use crate::services::mailer::Mailer;
use crate::services::tokens::generate_opaque_token;
use crate::time_utils::now_rfc3339;
use ring::rand::SystemRandom;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 150))]
    pub username: String,
    #[validate(length(min = 8, max = 256))]
    pub password: String,
    #[serde(default)]
    pub captcha_token: String,
}

#[derive(Debug, Clone)]
pub struct SignupSettings {
    /// Lowercase email domains allowed to sign up; empty allows all
    pub allowed_domains: Vec<String>,
    pub max_per_ip: u64,
    pub ip_window: Duration,
    /// Lifetime of the pending record and the per-email lock
    pub pending_ttl: Duration,
    /// Link prefix; the confirmation token is appended
    pub confirm_base_url: String,
}

pub struct SignupService {
    settings: SignupSettings,
    accounts: Arc<dyn AccountStore>,
    store: Arc<dyn SessionStore>,
    cipher: PayloadCipher,
    /// Creates confirmed accounts the way the deployment's mode dictates
    auth: Arc<dyn AuthStrategy>,
    bot_check: Arc<dyn BotCheck>,
    mailer: Arc<dyn Mailer>,
    rng: SystemRandom,
}

impl SignupService {
    pub fn new(
        settings: SignupSettings,
        accounts: Arc<dyn AccountStore>,
        store: Arc<dyn SessionStore>,
        cipher: PayloadCipher,
        auth: Arc<dyn AuthStrategy>,
        bot_check: Arc<dyn BotCheck>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            settings,
            accounts,
            store,
            cipher,
            auth,
            bot_check,
            mailer,
            rng: SystemRandom::new(),
        }
    }

    fn domain_allowed(&self, email: &str) -> bool {
        if self.settings.allowed_domains.is_empty() {
            return true;
        }
        email
            .rsplit_once('@')
            .is_some_and(|(_, domain)| self.settings.allowed_domains.iter().any(|d| d == domain))
    }

    /// Phase one: validate, park the request and send the confirmation link.
    pub async fn request(&self, req: &SignupRequest, ip: &str) -> Result<(), AppError> {
        self.bot_check.verify(&req.captcha_token, ip).await?;

        let email = normalize_email(&req.email);
        if !self.domain_allowed(&email) {
            return Err(AppError::BadRequest(
                "Email domain is not allowed to sign up".to_string(),
            ));
        }

        let ip_key = keys::signup_ip(ip);
        let attempts = self
            .store
            .get(&ip_key)
            .await?
            .and_then(|count| count.parse::<u64>().ok())
            .unwrap_or(0);
        if attempts >= self.settings.max_per_ip {
            tracing::warn!(ip, attempts, "Signup rate limit reached");
            return Err(AppError::TooManyRequests);
        }

        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(AppError::EmailAlreadyExists);
        }

        let token = generate_opaque_token(&self.rng)?;
        let lock_key = keys::signup_lock(&email);
        if !self
            .store
            .set_nx_ex(&lock_key, &token, self.settings.pending_ttl)
            .await?
        {
            return Err(AppError::SignupInProgress);
        }

        if let Err(e) = self.park(&email, req, ip, &token).await {
            if let Err(release) = self.store.delete(&lock_key).await {
                tracing::warn!(error = %release, "Failed to release signup lock");
            }
            return Err(e);
        }

        if let Err(e) = self.store.incr_ex(&ip_key, self.settings.ip_window).await {
            tracing::warn!(error = %e, "Failed to count signup attempt");
        }

        tracing::info!(email = %email, "Signup requested");
        Ok(())
    }

    async fn park(
        &self,
        email: &str,
        req: &SignupRequest,
        ip: &str,
        token: &str,
    ) -> Result<(), AppError> {
        let confirm_url = format!("{}{}", self.settings.confirm_base_url, token);
        self.mailer
            .send_signup_confirmation(email, &confirm_url)
            .await?;

        let pending = PendingSignup {
            email: email.to_string(),
            username: req.username.clone(),
            password_encrypted: self.cipher.encrypt(&req.password, email.as_bytes())?,
            ip: ip.to_string(),
            requested_at: now_rfc3339(),
        };
        set_json(
            self.store.as_ref(),
            &keys::pending_signup(token),
            &pending,
            self.settings.pending_ttl,
        )
        .await
    }

    /// Phase two: turn a pending signup into an account.
    ///
    /// The pending record is consumed before anything is created, so a
    /// confirmation link works at most once.
    pub async fn confirm(&self, token: &str) -> Result<Account, AppError> {
        let pending_key = keys::pending_signup(token);
        let Some(pending) = get_json::<PendingSignup>(self.store.as_ref(), &pending_key).await?
        else {
            return Err(AppError::InvalidSignupToken);
        };
        if !self.store.delete(&pending_key).await? {
            return Err(AppError::InvalidSignupToken);
        }

        let result = self.create_account(&pending).await;

        let lock_key = keys::signup_lock(&pending.email);
        if let Err(e) = self.store.delete(&lock_key).await {
            tracing::warn!(error = %e, "Failed to release signup lock");
        }

        let account = result?;
        tracing::info!(account_id = account.id, "Signup confirmed");

        if let Err(e) = self
            .mailer
            .send_welcome(&account.email, &account.username)
            .await
        {
            tracing::warn!(error = %e, account_id = account.id, "Failed to send welcome email");
        }

        Ok(account)
    }

    async fn create_account(&self, pending: &PendingSignup) -> Result<Account, AppError> {
        let password = self
            .cipher
            .decrypt(&pending.password_encrypted, pending.email.as_bytes())
            .map_err(|e| {
                tracing::warn!(error = %e, "Pending signup payload did not decrypt");
                AppError::InvalidSignupToken
            })?;

        self.auth
            .create_user(&CreateUserRequest {
                email: pending.email.clone(),
                username: pending.username.clone(),
                password,
            })
            .await
    }
}
