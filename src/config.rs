// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the deployment, so
//! everything is read once at startup and kept in memory.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which identity paths the service resolves logins through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Legacy password hashes and locally issued tokens only.
    Local,
    /// External identity provider only.
    Idp,
    /// Identity provider first, legacy fallback with lazy migration.
    Hybrid,
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "jwt" => Ok(AuthMode::Local),
            "idp" | "keycloak" => Ok(AuthMode::Idp),
            "hybrid" => Ok(AuthMode::Hybrid),
            _ => Err(ConfigError::Invalid("AUTH_MODE")),
        }
    }
}

/// Where new accounts are created first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountCreation {
    /// Identity provider first (fatal on failure), then local row.
    IdpFirst,
    /// Local row first, identity provider sync in the background.
    LocalFirst,
}

impl FromStr for AccountCreation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idp_first" | "migration" => Ok(AccountCreation::IdpFirst),
            "local_first" | "legacy" => Ok(AccountCreation::LocalFirst),
            _ => Err(ConfigError::Invalid("ACCOUNT_CREATION_MODE")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(StorageBackend::Firestore),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(ConfigError::Invalid("STORAGE_BACKEND")),
        }
    }
}

/// Identity provider (Keycloak-compatible) connection settings.
#[derive(Debug, Clone)]
pub struct IdpConfig {
    /// Base URL, e.g. `https://sso.example.com`
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
    /// Upper bound for every call to the identity provider.
    pub timeout: Duration,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Service ---
    /// Frontend URL used for CORS and confirmation links
    pub frontend_url: String,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    pub storage_backend: StorageBackend,

    // --- Authentication behaviour ---
    pub auth_mode: AuthMode,
    pub account_creation: AccountCreation,
    /// Create a local account on first IdP login when none exists.
    pub auto_create_accounts: bool,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// PBKDF2 iterations for newly hashed legacy passwords.
    pub legacy_hash_iterations: u32,
    pub idp: Option<IdpConfig>,

    // --- Signup ---
    /// Allowed email domains for signup (empty = any domain)
    pub signup_allowed_domains: Vec<String>,
    pub signup_max_per_ip: u64,
    pub signup_ip_window: Duration,
    /// Lifetime of a pending signup (and its per-email lock)
    pub signup_pending_ttl: Duration,

    // --- Secrets ---
    /// JWT signing key for access tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Key material for encrypting pending signup payloads
    pub signup_encryption_key: Vec<u8>,
    /// reCAPTCHA secret; bot checks are disabled when unset
    pub recaptcha_secret: Option<String>,
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            storage_backend: StorageBackend::Memory,
            auth_mode: AuthMode::Hybrid,
            account_creation: AccountCreation::IdpFirst,
            auto_create_accounts: true,
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(14 * 24 * 60 * 60),
            legacy_hash_iterations: 1_000,
            idp: Some(IdpConfig {
                base_url: "http://localhost:8081".to_string(),
                realm: "storefront".to_string(),
                client_id: "storefront-api".to_string(),
                client_secret: "test_secret".to_string(),
                timeout: Duration::from_secs(5),
            }),
            signup_allowed_domains: Vec::new(),
            signup_max_per_ip: 5,
            signup_ip_window: Duration::from_secs(60 * 60),
            signup_pending_ttl: Duration::from_secs(30 * 60),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            signup_encryption_key: b"test_signup_key_32_bytes_minimum".to_vec(),
            recaptcha_secret: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let auth_mode: AuthMode = env_or("AUTH_MODE", "hybrid").parse()?;

        // The identity provider is mandatory unless running purely local
        let idp = if auth_mode == AuthMode::Local {
            None
        } else {
            Some(IdpConfig {
                base_url: required("IDP_BASE_URL")?
                    .trim_end_matches('/')
                    .to_string(),
                realm: required("IDP_REALM")?,
                client_id: required("IDP_CLIENT_ID")?,
                client_secret: required("IDP_CLIENT_SECRET")?,
                timeout: Duration::from_secs(parse_or("IDP_TIMEOUT_SECS", 5)?),
            })
        };

        Ok(Self {
            frontend_url: env_or("FRONTEND_URL", "http://localhost:5173"),
            gcp_project_id: env_or("GCP_PROJECT_ID", "local-dev"),
            port: parse_or("PORT", 8080)?,
            storage_backend: env_or("STORAGE_BACKEND", "firestore").parse()?,
            auth_mode,
            account_creation: env_or("ACCOUNT_CREATION_MODE", "idp_first").parse()?,
            auto_create_accounts: parse_or("AUTH_AUTO_CREATE_ACCOUNTS", true)?,
            access_token_ttl: Duration::from_secs(parse_or("ACCESS_TOKEN_TTL_SECS", 15 * 60)?),
            refresh_token_ttl: Duration::from_secs(parse_or(
                "REFRESH_TOKEN_TTL_SECS",
                14 * 24 * 60 * 60,
            )?),
            legacy_hash_iterations: parse_or("LEGACY_HASH_ITERATIONS", 260_000)?,
            idp,
            signup_allowed_domains: parse_domains(&env_or("SIGNUP_ALLOWED_DOMAINS", "")),
            signup_max_per_ip: parse_or("SIGNUP_MAX_PER_IP", 5)?,
            signup_ip_window: Duration::from_secs(parse_or("SIGNUP_IP_WINDOW_SECS", 60 * 60)?),
            signup_pending_ttl: Duration::from_secs(parse_or("SIGNUP_PENDING_TTL_SECS", 30 * 60)?),

            // Secrets
            jwt_signing_key: required("JWT_SIGNING_KEY")?.into_bytes(),
            signup_encryption_key: required("SIGNUP_ENCRYPTION_KEY")?.into_bytes(),
            recaptcha_secret: env::var("RECAPTCHA_SECRET")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated domain list into normalized lowercase entries.
fn parse_domains(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().trim_start_matches('@').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("AUTH_MODE", "hybrid");
        env::set_var("IDP_BASE_URL", "https://sso.example.com/");
        env::set_var("IDP_REALM", "storefront");
        env::set_var("IDP_CLIENT_ID", "storefront-api");
        env::set_var("IDP_CLIENT_SECRET", "test_secret");
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("SIGNUP_ENCRYPTION_KEY", "test_signup_key");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.auth_mode, AuthMode::Hybrid);
        let idp = config.idp.expect("idp config for hybrid mode");
        assert_eq!(idp.base_url, "https://sso.example.com");
        assert_eq!(idp.timeout, Duration::from_secs(5));
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_auth_mode_parsing() {
        assert_eq!("JWT".parse::<AuthMode>().unwrap(), AuthMode::Local);
        assert_eq!("keycloak".parse::<AuthMode>().unwrap(), AuthMode::Idp);
        assert_eq!(" hybrid ".parse::<AuthMode>().unwrap(), AuthMode::Hybrid);
        assert!("ldap".parse::<AuthMode>().is_err());
    }

    #[test]
    fn test_parse_domains() {
        assert_eq!(
            parse_domains("Example.com, @shop.io ,,"),
            vec!["example.com".to_string(), "shop.io".to_string()]
        );
        assert!(parse_domains("").is_empty());
    }
}
