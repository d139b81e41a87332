// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity provider client (Keycloak-compatible OIDC).
//!
//! Handles:
//! - Password, refresh-token and client-credentials grants
//! - Userinfo lookup
//! - Session logout (refresh token revocation)
//! - Admin user creation, lookup and deletion
//!
//! Every call is bounded by the configured timeout. Failures come back as
//! `IdpError` so callers can decide whether to fall through to another
//! identity path.

use crate::config::IdpConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Service token is refreshed this long before it expires.
const ADMIN_TOKEN_MARGIN: Duration = Duration::from_secs(30);

/// Identity provider failure categories.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdpError {
    /// Credentials or refresh token rejected.
    #[error("invalid grant")]
    InvalidGrant,

    #[error("user already exists")]
    Conflict,

    #[error("not found")]
    NotFound,

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

/// How an identity provider failure should be reported while falling through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The provider answered and said no.
    Rejected,
    /// The provider could not give an answer.
    Unavailable,
}

impl IdpError {
    pub fn kind(&self) -> FailureKind {
        match self {
            IdpError::InvalidGrant | IdpError::NotFound | IdpError::Conflict => {
                FailureKind::Rejected
            }
            IdpError::Http { status, .. } if *status < 500 => FailureKind::Rejected,
            IdpError::Timeout
            | IdpError::Http { .. }
            | IdpError::Transport(_)
            | IdpError::Decode(_) => FailureKind::Unavailable,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IdpError::Timeout
        } else {
            IdpError::Transport(err.to_string())
        }
    }
}

/// Tokens returned by the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
}

/// Subset of the OIDC userinfo response.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpUserInfo {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
}

/// User to create in the provider.
#[derive(Debug, Clone)]
pub struct IdpNewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Operations the auth flows need from an identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn password_grant(&self, username: &str, password: &str)
        -> Result<IdpTokens, IdpError>;

    async fn refresh_grant(&self, refresh_token: &str) -> Result<IdpTokens, IdpError>;

    async fn userinfo(&self, access_token: &str) -> Result<IdpUserInfo, IdpError>;

    /// End the provider session behind a refresh token.
    async fn logout(&self, refresh_token: &str) -> Result<(), IdpError>;

    /// Create a user. Returns `Conflict` if the user already exists.
    async fn create_user(&self, user: &IdpNewUser) -> Result<Uuid, IdpError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<Uuid>, IdpError>;

    async fn delete_user(&self, id: Uuid) -> Result<(), IdpError>;
}

/// Create a user, treating "already exists" as success.
///
/// Returns the provider ID of the new or existing user, which keeps retried
/// and concurrent migrations idempotent.
pub async fn ensure_user(idp: &dyn IdentityProvider, user: &IdpNewUser) -> Result<Uuid, IdpError> {
    match idp.create_user(user).await {
        Ok(id) => Ok(id),
        Err(IdpError::Conflict) => {
            tracing::info!("Identity provider user already exists, reusing it");
            idp.find_user_by_email(&user.email)
                .await?
                .ok_or(IdpError::NotFound)
        }
        Err(e) => Err(e),
    }
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Keycloak REST client.
pub struct KeycloakClient {
    http: reqwest::Client,
    /// `{base}/realms/{realm}/protocol/openid-connect`
    oidc_url: String,
    /// `{base}/admin/realms/{realm}`
    admin_url: String,
    client_id: String,
    client_secret: String,
    /// Client-credentials token for admin calls.
    admin_token: Mutex<Option<CachedToken>>,
}

impl KeycloakClient {
    pub fn new(config: &IdpConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed building identity provider HTTP client: {e}"))?;

        let base = config.base_url.trim_end_matches('/');
        let realm = urlencoding::encode(&config.realm);

        tracing::info!(base_url = %base, realm = %config.realm, "Initialized identity provider client");

        Ok(Self {
            http,
            oidc_url: format!("{}/realms/{}/protocol/openid-connect", base, realm),
            admin_url: format!("{}/admin/realms/{}", base, realm),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            admin_token: Mutex::new(None),
        })
    }

    async fn token_request(&self, grant: &[(&str, &str)]) -> Result<IdpTokens, IdpError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let response = self
            .http
            .post(format!("{}/token", self.oidc_url))
            .form(&form)
            .send()
            .await
            .map_err(IdpError::from_reqwest)?;

        check_response_json(response).await
    }

    /// Service-account token for admin endpoints, cached until near expiry.
    async fn admin_access_token(&self) -> Result<String, IdpError> {
        let mut cached = self.admin_token.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() + ADMIN_TOKEN_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let tokens = self
            .token_request(&[("grant_type", "client_credentials"), ("scope", "openid")])
            .await?;

        *cached = Some(CachedToken {
            access_token: tokens.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(tokens.expires_in),
        });

        Ok(tokens.access_token)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserBody<'a> {
    username: &'a str,
    email: &'a str,
    enabled: bool,
    email_verified: bool,
    credentials: [CredentialBody<'a>; 1],
}

#[derive(Serialize)]
struct CredentialBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
    temporary: bool,
}

#[derive(Deserialize)]
struct UserRepresentation {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

#[async_trait]
impl IdentityProvider for KeycloakClient {
    async fn password_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<IdpTokens, IdpError> {
        self.token_request(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", "openid"),
        ])
        .await
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<IdpTokens, IdpError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn userinfo(&self, access_token: &str) -> Result<IdpUserInfo, IdpError> {
        let response = self
            .http
            .get(format!("{}/userinfo", self.oidc_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(IdpError::from_reqwest)?;

        check_response_json(response).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), IdpError> {
        let response = self
            .http
            .post(format!("{}/logout", self.oidc_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(IdpError::from_reqwest)?;

        check_response(response).await.map(|_| ())
    }

    async fn create_user(&self, user: &IdpNewUser) -> Result<Uuid, IdpError> {
        let admin_token = self.admin_access_token().await?;

        let body = CreateUserBody {
            username: &user.username,
            email: &user.email,
            enabled: true,
            email_verified: true,
            credentials: [CredentialBody {
                kind: "password",
                value: &user.password,
                temporary: false,
            }],
        };

        let response = self
            .http
            .post(format!("{}/users", self.admin_url))
            .bearer_auth(&admin_token)
            .json(&body)
            .send()
            .await
            .map_err(IdpError::from_reqwest)?;

        let response = check_response(response).await?;

        // 201 Created carries the new user's URL in Location
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| IdpError::Decode("missing Location header".to_string()))?;

        parse_user_id_from_location(location)
            .ok_or_else(|| IdpError::Decode(format!("unexpected Location: {location}")))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<Uuid>, IdpError> {
        let admin_token = self.admin_access_token().await?;

        let response = self
            .http
            .get(format!("{}/users", self.admin_url))
            .bearer_auth(&admin_token)
            .query(&[("email", email), ("exact", "true")])
            .send()
            .await
            .map_err(IdpError::from_reqwest)?;

        let users: Vec<UserRepresentation> = check_response_json(response).await?;

        Ok(users
            .into_iter()
            .find(|u| {
                u.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .map(|u| u.id))
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), IdpError> {
        let admin_token = self.admin_access_token().await?;

        let response = self
            .http
            .delete(format!("{}/users/{}", self.admin_url, id))
            .bearer_auth(&admin_token)
            .send()
            .await
            .map_err(IdpError::from_reqwest)?;

        check_response(response).await.map(|_| ())
    }
}

/// Check response status and map failures to `IdpError`.
async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, IdpError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    Err(match status {
        401 => IdpError::InvalidGrant,
        400 if body.contains("invalid_grant") => IdpError::InvalidGrant,
        404 => IdpError::NotFound,
        409 => IdpError::Conflict,
        _ => IdpError::Http { status, body },
    })
}

/// Check response and parse JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, IdpError> {
    check_response(response)
        .await?
        .json()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                IdpError::Timeout
            } else {
                IdpError::Decode(e.to_string())
            }
        })
}

fn parse_user_id_from_location(location: &str) -> Option<Uuid> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|id| Uuid::parse_str(id).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_id_from_location() {
        let id = Uuid::new_v4();
        let location = format!("https://sso.example.com/admin/realms/shop/users/{id}");
        assert_eq!(parse_user_id_from_location(&location), Some(id));
        assert_eq!(parse_user_id_from_location(&format!("{location}/")), Some(id));
        assert_eq!(parse_user_id_from_location("https://sso/users/not-a-uuid"), None);
    }

    #[test]
    fn failure_kinds() {
        assert_eq!(IdpError::InvalidGrant.kind(), FailureKind::Rejected);
        assert_eq!(IdpError::Timeout.kind(), FailureKind::Unavailable);
        assert_eq!(
            IdpError::Http {
                status: 503,
                body: String::new()
            }
            .kind(),
            FailureKind::Unavailable
        );
        assert_eq!(
            IdpError::Http {
                status: 403,
                body: String::new()
            }
            .kind(),
            FailureKind::Rejected
        );
        assert_eq!(
            IdpError::Transport("refused".to_string()).kind(),
            FailureKind::Unavailable
        );
    }
}
