// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound account emails.

use crate::error::AppError;
use async_trait::async_trait;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_signup_confirmation(&self, email: &str, confirm_url: &str)
        -> Result<(), AppError>;

    async fn send_welcome(&self, email: &str, username: &str) -> Result<(), AppError>;
}

/// Writes emails to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_signup_confirmation(
        &self,
        email: &str,
        confirm_url: &str,
    ) -> Result<(), AppError> {
        tracing::info!(email, confirm_url, "Signup confirmation email");
        Ok(())
    }

    async fn send_welcome(&self, email: &str, username: &str) -> Result<(), AppError> {
        tracing::info!(email, username, "Welcome email");
        Ok(())
    }
}
