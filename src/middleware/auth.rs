// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token authentication middleware.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

/// Cookie carrying the access token for browser clients.
pub const ACCESS_TOKEN_COOKIE: &str = "storefront_token";

/// Authenticated account extracted from the access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub account_id: u64,
    pub email: String,
    pub is_staff: bool,
}

/// Middleware that requires a valid access token.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Cookie first, then header
    let token = if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        cookie.value().to_string()
    } else {
        let auth_header = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) => token.to_string(),
            None => return Err(StatusCode::UNAUTHORIZED),
        }
    };

    let claims = state
        .tokens
        .validate_access_token(&token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let account_id: u64 = claims.sub.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(AuthUser {
        account_id,
        email: claims.email,
        is_staff: claims.staff,
    });

    Ok(next.run(request).await)
}
