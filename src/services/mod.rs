// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod bot_check;
pub mod cipher;
pub mod keycloak;
pub mod mailer;
pub mod migration;
pub mod password;
pub mod signup;
pub mod tokens;

pub use bot_check::{BotCheck, DisabledBotCheck, RecaptchaVerifier};
pub use cipher::PayloadCipher;
pub use keycloak::{IdentityProvider, IdpError, KeycloakClient};
pub use mailer::{LogMailer, Mailer};
pub use migration::{MigrationRequest, MigrationResult, MigrationService};
pub use password::LegacyPasswordHasher;
pub use signup::{SignupRequest, SignupService, SignupSettings};
pub use tokens::{Claims, TokenIssuer, TokenPair};
