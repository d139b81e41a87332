// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Hybrid mode: the identity provider is tried first, legacy hashes are the
//! fallback, and a successful legacy login moves the account into the
//! provider.

use super::idp::{log_fallthrough, IdpPath};
use super::local::LocalPath;
use super::{
    conclude, conclude_refresh, AuthDeps, AuthStrategy, ClientContext, CreateUserRequest,
    LoginRequest, Outcome, Rejected,
};
use crate::config::{AccountCreation, AuthMode};
use crate::db::AuditLog;
use crate::error::AppError;
use crate::models::{normalize_email, Account, AuthPath};
use crate::services::keycloak::{ensure_user, IdentityProvider, IdpError, IdpNewUser, IdpTokens};
use crate::services::tokens::TokenPair;
use crate::time_utils::now_rfc3339;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub struct HybridAuth {
    idp: IdpPath,
    local: LocalPath,
    audit: Arc<dyn AuditLog>,
    account_creation: AccountCreation,
}

impl HybridAuth {
    pub fn new(
        deps: AuthDeps,
        idp: Arc<dyn IdentityProvider>,
        auto_create: bool,
        account_creation: AccountCreation,
    ) -> Self {
        Self {
            idp: IdpPath::new(&deps, idp, auto_create),
            local: LocalPath::new(&deps),
            audit: deps.audit,
            account_creation,
        }
    }

    async fn resolve_login(&self, email: &str, req: &LoginRequest, ctx: &ClientContext) -> Outcome {
        match self.idp.password_grant(email, &req.password).await {
            Ok(idp_tokens) => {
                return self
                    .idp
                    .complete_login(email, idp_tokens, req.remember_me, ctx, AuthPath::Idp)
                    .await
            }
            Err(e) => log_fallthrough(&e, "password grant"),
        }

        let account = self.local.find(email, AuthPath::Legacy).await?;

        // Once linked, only the provider may vouch for the account
        if account.is_migrated() {
            return Err(Rejected::invalid_credentials(
                AuthPath::Idp,
                Some(account.id),
                "linked account rejected by identity provider",
            ));
        }

        self.local
            .verify(&account, &req.password, AuthPath::Legacy)?;
        self.lazy_migrate(account, req, ctx).await
    }

    /// Move a legacy-authenticated account into the provider.
    ///
    /// The link is only written once the provider accepts the same password.
    /// If the provider cannot take the account now, the user still gets a
    /// local session and migration is retried on the next login.
    async fn lazy_migrate(&self, mut account: Account, req: &LoginRequest, ctx: &ClientContext) -> Outcome {
        let user = IdpNewUser {
            username: account.username.clone(),
            email: account.email.clone(),
            password: req.password.clone(),
        };

        match self.provision_and_login(&user).await {
            Ok((external_id, idp_tokens)) => {
                account.link_external_id(external_id, &now_rfc3339());
                tracing::info!(account_id = account.id, "Migrated legacy account to identity provider");
                self.idp
                    .start_session(
                        account,
                        idp_tokens.refresh_token.as_deref(),
                        req.remember_me,
                        ctx,
                        AuthPath::LazyMigration,
                    )
                    .await
            }
            Err(e) => {
                log_fallthrough(&e, "lazy migration");
                tracing::warn!(account_id = account.id, "Lazy migration deferred, issuing local session");
                self.local
                    .start_session(account, req.remember_me, ctx, AuthPath::Legacy)
                    .await
            }
        }
    }

    async fn provision_and_login(&self, user: &IdpNewUser) -> Result<(Uuid, IdpTokens), IdpError> {
        let external_id = ensure_user(self.idp.provider(), user).await?;
        let idp_tokens = self.idp.password_grant(&user.email, &user.password).await?;
        Ok((external_id, idp_tokens))
    }
}

#[async_trait]
impl AuthStrategy for HybridAuth {
    fn mode(&self) -> AuthMode {
        AuthMode::Hybrid
    }

    async fn login(&self, req: &LoginRequest, ctx: &ClientContext) -> Result<TokenPair, AppError> {
        let email = normalize_email(&req.email);
        let outcome = self.resolve_login(&email, req, ctx).await;
        conclude(self.audit.as_ref(), &email, ctx, outcome).await
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &ClientContext,
    ) -> Result<TokenPair, AppError> {
        let outcome = match self.idp.refresh(refresh_token, ctx).await {
            Ok(Some(resolved)) => Ok(resolved),
            Ok(None) => match self.local.refresh(refresh_token, ctx).await {
                Ok(Some(resolved)) => Ok(resolved),
                Ok(None) => Err(Rejected::invalid_refresh(
                    AuthPath::RefreshLocal,
                    None,
                    "unknown or expired refresh token",
                )),
                Err(rejected) => Err(rejected),
            },
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
        tokio::join!(
            self.idp.revoke(refresh_token),
            self.local.revoke(refresh_token)
        );
    }

    async fn create_user(&self, req: &CreateUserRequest) -> Result<Account, AppError> {
        match self.account_creation {
            AccountCreation::IdpFirst => self.idp.create(req).await,
            AccountCreation::LocalFirst => {
                let account = self.local.create(req).await?;

                let idp = self.idp.clone();
                let account_id = account.id;
                let user = IdpNewUser {
                    username: account.username.clone(),
                    email: account.email.clone(),
                    password: req.password.clone(),
                };
                tokio::spawn(async move {
                    idp.sync_account(account_id, user).await;
                });

                Ok(account)
            }
        }
    }
}
