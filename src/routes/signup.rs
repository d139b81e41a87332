// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Two-phase signup routes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::auth::ClientContext;
use crate::error::Result;
use crate::models::Account;
use crate::services::SignupRequest;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/signup", post(request_signup))
        .route("/auth/signup/confirm", get(confirm_signup))
}

#[derive(Serialize)]
pub struct SignupAccepted {
    pub status: &'static str,
}

#[derive(Deserialize)]
pub struct ConfirmParams {
    #[serde(default)]
    token: String,
}

/// Account summary returned once signup is confirmed.
#[derive(Serialize)]
pub struct AccountSummary {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub date_joined: String,
}

impl From<Account> for AccountSummary {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            date_joined: account.date_joined,
        }
    }
}

/// Start a signup; the account is created when the emailed link is used.
async fn request_signup(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupAccepted>)> {
    req.validate()?;

    state.signup.request(&req, &ctx.ip).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SignupAccepted {
            status: "confirmation_sent",
        }),
    ))
}

async fn confirm_signup(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConfirmParams>,
) -> Result<(StatusCode, Json<AccountSummary>)> {
    if params.token.is_empty() {
        return Err(crate::error::AppError::InvalidSignupToken);
    }

    let account = state.signup.confirm(&params.token).await?;
    Ok((StatusCode::CREATED, Json(account.into())))
}
