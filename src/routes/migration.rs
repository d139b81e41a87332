// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Explicit account migration route.

use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;
use validator::Validate;

use crate::auth::ClientContext;
use crate::error::{AppError, Result};
use crate::services::{MigrationRequest, MigrationResult};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/migration", post(migrate))
}

async fn migrate(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    Json(req): Json<MigrationRequest>,
) -> Result<Json<MigrationResult>> {
    req.validate()?;

    let Some(migration) = &state.migration else {
        return Err(AppError::NotFound(
            "Account migration is not enabled".to_string(),
        ));
    };

    Ok(Json(migration.migrate(&req, &ctx.ip).await?))
}
