// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sign-in, token refresh and logout routes.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::auth::{ClientContext, LoginRequest};
use crate::error::Result;
use crate::middleware::auth::ACCESS_TOKEN_COOKIE;
use crate::services::TokenPair;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/signin", post(signin))
        .route("/auth/token/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

#[derive(Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, max = 512))]
    pub refresh_token: String,
}

fn access_cookie(pair: &TokenPair) -> Cookie<'static> {
    Cookie::build((ACCESS_TOKEN_COOKIE, pair.access_token.clone()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Authenticate with email and password.
async fn signin(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<TokenPair>)> {
    req.validate()?;

    let pair = state.auth.login(&req, &ctx).await?;
    Ok((jar.add(access_cookie(&pair)), Json(pair)))
}

/// Exchange a refresh token for a new token pair.
async fn refresh(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    jar: CookieJar,
    Json(req): Json<RefreshRequest>,
) -> Result<(CookieJar, Json<TokenPair>)> {
    req.validate()?;

    let pair = state.auth.refresh(&req.refresh_token, &ctx).await?;
    Ok((jar.add(access_cookie(&pair)), Json(pair)))
}

/// End the session. Always succeeds, whatever the body holds.
async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Bytes,
) -> (CookieJar, StatusCode) {
    match serde_json::from_slice::<RefreshRequest>(&body) {
        Ok(req) if !req.refresh_token.is_empty() => state.auth.logout(&req.refresh_token).await,
        _ => tracing::debug!("Logout without refresh token"),
    }

    (
        jar.remove(Cookie::build(ACCESS_TOKEN_COOKIE).path("/")),
        StatusCode::NO_CONTENT,
    )
}
