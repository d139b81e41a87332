// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity provider path: password grants, local account linking and
//! provider-backed refresh sessions.

use super::{
    conclude, conclude_refresh, AuthDeps, AuthStrategy, ClientContext, CreateUserRequest,
    LoginRequest, Outcome, Rejected, Resolved,
};
use crate::config::AuthMode;
use crate::db::{AccountStore, AuditLog};
use crate::error::AppError;
use crate::models::{normalize_email, Account, AuthPath, NewAccount};
use crate::services::keycloak::{
    ensure_user, FailureKind, IdentityProvider, IdpError, IdpNewUser, IdpTokens, IdpUserInfo,
};
use crate::services::tokens::{TokenIssuer, TokenPair};
use crate::time_utils::now_rfc3339;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Log a provider failure that the caller is about to fall through.
///
/// Rejections are routine; outages are not.
pub(crate) fn log_fallthrough(err: &IdpError, step: &str) {
    match (err, err.kind()) {
        (_, FailureKind::Rejected) => {
            tracing::debug!(error = %err, step, "Identity provider rejected request")
        }
        (IdpError::Timeout, _) => {
            tracing::warn!(step, "Identity provider timed out")
        }
        (_, FailureKind::Unavailable) => {
            tracing::error!(error = %err, step, "Identity provider unavailable")
        }
    }
}

/// Building blocks shared by the provider-only and hybrid strategies.
#[derive(Clone)]
pub(crate) struct IdpPath {
    idp: Arc<dyn IdentityProvider>,
    accounts: Arc<dyn AccountStore>,
    tokens: TokenIssuer,
    auto_create: bool,
}

impl IdpPath {
    pub(crate) fn new(deps: &AuthDeps, idp: Arc<dyn IdentityProvider>, auto_create: bool) -> Self {
        Self {
            idp,
            accounts: deps.accounts.clone(),
            tokens: deps.tokens.clone(),
            auto_create,
        }
    }

    pub(crate) fn provider(&self) -> &dyn IdentityProvider {
        self.idp.as_ref()
    }

    pub(crate) async fn password_grant(
        &self,
        email: &str,
        password: &str,
    ) -> Result<IdpTokens, IdpError> {
        self.idp.password_grant(email, password).await
    }

    /// Turn a successful password grant into a local session.
    pub(crate) async fn complete_login(
        &self,
        email: &str,
        idp_tokens: IdpTokens,
        remember_me: bool,
        ctx: &ClientContext,
        path: AuthPath,
    ) -> Outcome {
        let info = self
            .idp
            .userinfo(&idp_tokens.access_token)
            .await
            .map_err(|e| Rejected::system(path, None, e.into()))?;

        let email = info
            .email
            .as_deref()
            .map(normalize_email)
            .unwrap_or_else(|| email.to_string());

        let mut account = self.find_or_create(&email, &info, path).await?;
        let id = Some(account.id);

        if !account.is_active {
            return Err(Rejected::invalid_credentials(path, id, "inactive account"));
        }

        match account.external_id {
            None => {
                account.link_external_id(info.sub, &now_rfc3339());
                tracing::info!(account_id = account.id, "Linked account to identity provider");
            }
            Some(external_id) if external_id != info.sub => {
                tracing::warn!(
                    account_id = account.id,
                    "Identity provider subject does not match linked account"
                );
                return Err(Rejected::invalid_credentials(
                    path,
                    id,
                    "identity provider subject mismatch",
                ));
            }
            Some(_) => {}
        }

        self.start_session(account, idp_tokens.refresh_token.as_deref(), remember_me, ctx, path)
            .await
    }

    /// Record the login and issue tokens; the refresh token (if any) wraps
    /// the provider's refresh token.
    pub(crate) async fn start_session(
        &self,
        mut account: Account,
        idp_refresh_token: Option<&str>,
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

        let refresh_token = match (remember_me, idp_refresh_token) {
            (true, Some(idp_refresh_token)) => Some(
                self.tokens
                    .issue_idp_session(&account.email, &ctx.ip, idp_refresh_token)
                    .await
                    .map_err(|e| Rejected::system(path, id, e))?,
            ),
            (true, None) => {
                tracing::warn!(
                    account_id = account.id,
                    "Identity provider returned no refresh token"
                );
                None
            }
            (false, _) => None,
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

    async fn find_or_create(
        &self,
        email: &str,
        info: &IdpUserInfo,
        path: AuthPath,
    ) -> Result<Account, Rejected> {
        match self.accounts.find_by_email(email).await {
            Ok(Some(account)) => return Ok(account),
            Ok(None) if self.auto_create => {}
            Ok(None) => {
                return Err(Rejected::invalid_credentials(
                    path,
                    None,
                    "no local account for identity provider user",
                ))
            }
            Err(e) => return Err(Rejected::system(path, None, e)),
        }

        let new = NewAccount {
            username: info
                .preferred_username
                .clone()
                .unwrap_or_else(|| email.to_string()),
            email: email.to_string(),
            password_hash: String::new(),
            external_id: Some(info.sub),
        };

        match self.accounts.insert(new).await {
            Ok(account) => {
                tracing::info!(account_id = account.id, "Auto-created account for provider user");
                Ok(account)
            }
            // Lost a race with a concurrent first login
            Err(AppError::EmailAlreadyExists) => match self.accounts.find_by_email(email).await {
                Ok(Some(account)) => Ok(account),
                Ok(None) => Err(Rejected::system(
                    path,
                    None,
                    AppError::Database("Account vanished after conflict".to_string()),
                )),
                Err(e) => Err(Rejected::system(path, None, e)),
            },
            Err(e) => Err(Rejected::system(path, None, e)),
        }
    }

    /// Rotate a provider-backed refresh token. `Ok(None)` means the token
    /// is not a live provider session.
    pub(crate) async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &ClientContext,
    ) -> Result<Option<Resolved>, Rejected> {
        let path = AuthPath::RefreshIdp;
        let session = match self.tokens.take_idp_session(refresh_token).await {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(None),
            Err(e) => return Err(Rejected::system(path, None, e)),
        };

        let renewed = self
            .idp
            .refresh_grant(&session.idp_refresh_token)
            .await
            .map_err(|e| {
                log_fallthrough(&e, "refresh grant");
                Rejected::invalid_refresh(path, None, format!("identity provider refresh: {}", e))
                    .with_email(&session.email)
            })?;

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

        // Providers without rotation keep the old refresh token valid
        let idp_refresh_token = renewed
            .refresh_token
            .unwrap_or(session.idp_refresh_token);

        let id = Some(account.id);
        let rotated = self
            .tokens
            .issue_idp_session(&account.email, &ctx.ip, &idp_refresh_token)
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

    /// End the provider session behind a token, if there is one.
    pub(crate) async fn revoke(&self, refresh_token: &str) {
        match self.tokens.take_idp_session(refresh_token).await {
            Ok(Some(session)) => {
                if let Err(e) = self.idp.logout(&session.idp_refresh_token).await {
                    log_fallthrough(&e, "logout");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to revoke provider session"),
        }
    }

    /// Create the provider user first, then the linked local account.
    ///
    /// A provider user this call created is deleted again when the local
    /// insert fails. One that already existed is left alone.
    pub(crate) async fn create(&self, req: &CreateUserRequest) -> Result<Account, AppError> {
        let email = normalize_email(&req.email);
        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(AppError::EmailAlreadyExists);
        }

        let user = IdpNewUser {
            username: req.username.clone(),
            email: email.clone(),
            password: req.password.clone(),
        };
        let (external_id, created) = self.provision(&user).await?;

        let inserted = self
            .accounts
            .insert(NewAccount {
                username: req.username.clone(),
                email,
                password_hash: String::new(),
                external_id: Some(external_id),
            })
            .await;

        match inserted {
            Ok(account) => {
                tracing::info!(account_id = account.id, "Created provider-backed account");
                Ok(account)
            }
            Err(e) => {
                if created {
                    self.compensate(external_id).await;
                }
                Err(e)
            }
        }
    }

    /// Returns the provider user ID and whether this call created it.
    async fn provision(&self, user: &IdpNewUser) -> Result<(Uuid, bool), AppError> {
        match self.idp.create_user(user).await {
            Ok(id) => Ok((id, true)),
            Err(IdpError::Conflict) => {
                let id = self
                    .idp
                    .find_user_by_email(&user.email)
                    .await?
                    .ok_or(IdpError::NotFound)?;
                Ok((id, false))
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to create identity provider user");
                Err(e.into())
            }
        }
    }

    async fn compensate(&self, external_id: Uuid) {
        match self.idp.delete_user(external_id).await {
            Ok(()) => tracing::info!(%external_id, "Rolled back identity provider user"),
            Err(e) => tracing::error!(
                %external_id,
                error = %e,
                "Failed to roll back identity provider user"
            ),
        }
    }

    /// Mirror an existing local account into the provider and link it.
    pub(crate) async fn sync_account(&self, account_id: u64, user: IdpNewUser) {
        let external_id = match ensure_user(self.idp.as_ref(), &user).await {
            Ok(id) => id,
            Err(e) => {
                log_fallthrough(&e, "account sync");
                return;
            }
        };

        let result = async {
            let Some(mut account) = self.accounts.find_by_id(account_id).await? else {
                return Err(AppError::NotFound(format!("Account {}", account_id)));
            };
            if account.external_id.is_none() {
                account.link_external_id(external_id, &now_rfc3339());
                self.accounts.update(&account).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => tracing::info!(account_id, "Synced account to identity provider"),
            Err(e) => tracing::warn!(account_id, error = %e, "Failed to link synced account"),
        }
    }

    pub(crate) fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }
}

/// Provider-only mode: the identity provider is the sole credential check.
pub struct IdpAuth {
    idp: IdpPath,
    audit: Arc<dyn AuditLog>,
}

impl IdpAuth {
    pub fn new(deps: AuthDeps, idp: Arc<dyn IdentityProvider>, auto_create: bool) -> Self {
        Self {
            idp: IdpPath::new(&deps, idp, auto_create),
            audit: deps.audit,
        }
    }
}

#[async_trait]
impl AuthStrategy for IdpAuth {
    fn mode(&self) -> AuthMode {
        AuthMode::Idp
    }

    async fn login(&self, req: &LoginRequest, ctx: &ClientContext) -> Result<TokenPair, AppError> {
        let email = normalize_email(&req.email);
        let outcome = match self.idp.password_grant(&email, &req.password).await {
            Ok(idp_tokens) => {
                self.idp
                    .complete_login(&email, idp_tokens, req.remember_me, ctx, AuthPath::Idp)
                    .await
            }
            Err(e) => {
                log_fallthrough(&e, "password grant");
                Err(match e.kind() {
                    FailureKind::Rejected => Rejected::invalid_credentials(
                        AuthPath::Idp,
                        None,
                        "identity provider rejected credentials",
                    ),
                    FailureKind::Unavailable => Rejected::system(AuthPath::Idp, None, e.into()),
                })
            }
        };

        conclude(self.audit.as_ref(), &email, ctx, outcome).await
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &ClientContext,
    ) -> Result<TokenPair, AppError> {
        let outcome = match self.idp.refresh(refresh_token, ctx).await {
            Ok(Some(resolved)) => Ok(resolved),
            Ok(None) => Err(Rejected::invalid_refresh(
                AuthPath::RefreshIdp,
                None,
                "unknown or expired refresh token",
            )),
            Err(rejected) => Err(rejected),
        };

        conclude_refresh(
            self.audit.as_ref(),
            self.idp.tokens(),
            refresh_token,
            ctx,
            outcome,
        )
        .await
    }

    async fn logout(&self, refresh_token: &str) {
        self.idp.revoke(refresh_token).await;
    }

    async fn create_user(&self, req: &CreateUserRequest) -> Result<Account, AppError> {
        self.idp.create(req).await
    }
}
