// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storefront authentication service.
//!
//! Resolves sign-in, refresh, logout, signup and account migration across
//! a legacy password store, locally issued tokens and an external
//! Keycloak-compatible identity provider, moving legacy accounts into the
//! provider as they log in.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use auth::{build_strategy, AuthDeps, AuthStrategy};
use config::Config;
use db::{AccountStore, AuditLog, SessionStore};
use error::AppError;
use services::{
    BotCheck, IdentityProvider, LegacyPasswordHasher, Mailer, MigrationService, PayloadCipher,
    SignupService, SignupSettings, TokenIssuer,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub accounts: Arc<dyn AccountStore>,
    pub tokens: TokenIssuer,
    pub auth: Arc<dyn AuthStrategy>,
    pub signup: SignupService,
    /// Present only when an identity provider is configured.
    pub migration: Option<MigrationService>,
}

/// Storage backends, usually all served by one database handle.
pub struct Backends {
    pub accounts: Arc<dyn AccountStore>,
    pub audit: Arc<dyn AuditLog>,
    pub sessions: Arc<dyn SessionStore>,
}

/// External collaborators.
pub struct Collaborators {
    pub idp: Option<Arc<dyn IdentityProvider>>,
    pub bot_check: Arc<dyn BotCheck>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn build(
        config: Config,
        backends: Backends,
        collaborators: Collaborators,
    ) -> Result<Self, AppError> {
        let Backends {
            accounts,
            audit,
            sessions,
        } = backends;
        let Collaborators {
            idp,
            bot_check,
            mailer,
        } = collaborators;

        // Local mode never talks to the provider, even if one is configured
        let idp = match config.auth_mode {
            config::AuthMode::Local => None,
            _ => idp,
        };

        let hasher = LegacyPasswordHasher::new(config.legacy_hash_iterations);
        let tokens = TokenIssuer::new(
            &config.jwt_signing_key,
            config.access_token_ttl,
            config.refresh_token_ttl,
            sessions.clone(),
        );

        let auth = build_strategy(
            &config,
            AuthDeps {
                accounts: accounts.clone(),
                audit,
                tokens: tokens.clone(),
                hasher: hasher.clone(),
            },
            idp.clone(),
        )?;

        let signup = SignupService::new(
            SignupSettings {
                allowed_domains: config.signup_allowed_domains.clone(),
                max_per_ip: config.signup_max_per_ip,
                ip_window: config.signup_ip_window,
                pending_ttl: config.signup_pending_ttl,
                confirm_base_url: format!(
                    "{}/signup/confirm?token=",
                    config.frontend_url.trim_end_matches('/')
                ),
            },
            accounts.clone(),
            sessions,
            PayloadCipher::new(&config.signup_encryption_key)?,
            auth.clone(),
            bot_check.clone(),
            mailer,
        );

        let migration =
            idp.map(|idp| MigrationService::new(accounts.clone(), idp, hasher, bot_check));

        Ok(Self {
            config,
            accounts,
            tokens,
            auth,
            signup,
            migration,
        })
    }
}
