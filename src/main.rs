// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storefront authentication API server.

use std::net::SocketAddr;
use std::sync::Arc;
use storefront_auth::{
    config::{Config, StorageBackend},
    db::{FirestoreDb, MemoryDb},
    services::{
        BotCheck, DisabledBotCheck, IdentityProvider, KeycloakClient, LogMailer,
        RecaptchaVerifier,
    },
    AppState, Backends, Collaborators,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        auth_mode = ?config.auth_mode,
        "Starting storefront auth API"
    );

    let backends = match config.storage_backend {
        StorageBackend::Firestore => {
            let db = FirestoreDb::new(&config.gcp_project_id).await?;
            Backends {
                accounts: Arc::new(db.clone()),
                audit: Arc::new(db.clone()),
                sessions: Arc::new(db),
            }
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            let db = MemoryDb::new();
            Backends {
                accounts: Arc::new(db.clone()),
                audit: Arc::new(db.clone()),
                sessions: Arc::new(db),
            }
        }
    };

    let idp: Option<Arc<dyn IdentityProvider>> = match &config.idp {
        Some(idp_config) => {
            tracing::info!(
                base_url = %idp_config.base_url,
                realm = %idp_config.realm,
                "Identity provider configured"
            );
            Some(Arc::new(KeycloakClient::new(idp_config)?))
        }
        None => None,
    };

    let bot_check: Arc<dyn BotCheck> = match &config.recaptcha_secret {
        Some(secret) => Arc::new(RecaptchaVerifier::new(secret.clone())?),
        None => {
            tracing::warn!("RECAPTCHA_SECRET not set, bot checks disabled");
            Arc::new(DisabledBotCheck)
        }
    };

    let state = Arc::new(AppState::build(
        config.clone(),
        backends,
        Collaborators {
            idp,
            bot_check,
            mailer: Arc::new(LogMailer),
        },
    )?);

    // Build router
    let app = storefront_auth::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("storefront_auth=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
