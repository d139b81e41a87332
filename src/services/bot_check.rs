// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bot checks for public signup and migration endpoints.

use crate::error::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait BotCheck: Send + Sync {
    /// Verify a client-supplied challenge token. Fails with `BotCheckFailed`.
    async fn verify(&self, token: &str, ip: &str) -> Result<(), AppError>;
}

/// Accepts every request. Used when no reCAPTCHA secret is configured.
pub struct DisabledBotCheck;

#[async_trait]
impl BotCheck for DisabledBotCheck {
    async fn verify(&self, _token: &str, _ip: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Google reCAPTCHA `siteverify` client.
pub struct RecaptchaVerifier {
    http: reqwest::Client,
    verify_url: String,
    secret: String,
}

#[derive(Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl RecaptchaVerifier {
    pub fn new(secret: String) -> anyhow::Result<Self> {
        Self::with_url(secret, RECAPTCHA_VERIFY_URL.to_string())
    }

    /// Verifier against a custom endpoint (tests, self-hosted proxies).
    pub fn with_url(secret: String, verify_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("failed building bot check HTTP client: {e}"))?;

        Ok(Self {
            http,
            verify_url,
            secret,
        })
    }
}

#[async_trait]
impl BotCheck for RecaptchaVerifier {
    async fn verify(&self, token: &str, ip: &str) -> Result<(), AppError> {
        if token.is_empty() {
            return Err(AppError::BotCheckFailed);
        }

        let response = self
            .http
            .post(&self.verify_url)
            .form(&[
                ("secret", self.secret.as_str()),
                ("response", token),
                ("remoteip", ip),
            ])
            .send()
            .await
            .map_err(|e| AppError::SystemError(format!("Bot check request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::SystemError(format!(
                "Bot check returned status {}",
                response.status()
            )));
        }

        let result: SiteVerifyResponse = response
            .json()
            .await
            .map_err(|e| AppError::SystemError(format!("Invalid bot check response: {}", e)))?;

        if !result.success {
            tracing::info!(errors = ?result.error_codes, "Bot check rejected request");
            return Err(AppError::BotCheckFailed);
        }

        Ok(())
    }
}
