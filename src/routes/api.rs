// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::AppState;
use axum::{extract::State, routing::get, Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;

/// API routes (require authentication via access token).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/me", get(get_me))
}

/// Current account response.
#[derive(Serialize)]
pub struct MeResponse {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    /// Whether the identity provider manages this account's credentials
    pub migrated: bool,
    pub date_joined: String,
    pub last_login: Option<String>,
}

/// Get the current account. Reads the store so deactivation takes effect
/// before the access token expires.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MeResponse>> {
    let account = state
        .accounts
        .find_by_id(user.account_id)
        .await?
        .filter(|account| account.is_active)
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(MeResponse {
        id: account.id,
        migrated: account.is_migrated(),
        username: account.username,
        email: account.email,
        is_staff: account.is_staff,
        is_superuser: account.is_superuser,
        date_joined: account.date_joined,
        last_login: account.last_login,
    }))
}
