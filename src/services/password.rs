// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Legacy password hashes.
//!
//! Hashes use the `pbkdf2_sha256$<iterations>$<salt>$<base64 digest>` format
//! written by the legacy user table. Verification is constant-time.

use crate::error::AppError;
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine as _,
};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

const ALGORITHM_TAG: &str = "pbkdf2_sha256";
const DIGEST_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 hasher compatible with the legacy credential store.
#[derive(Clone)]
pub struct LegacyPasswordHasher {
    iterations: NonZeroU32,
    rng: SystemRandom,
}

impl LegacyPasswordHasher {
    /// Create a hasher; `iterations` only affects newly created hashes.
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN),
            rng: SystemRandom::new(),
        }
    }

    /// Check a password against an encoded hash.
    ///
    /// Malformed or empty hashes never verify.
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        let Some(parsed) = ParsedHash::parse(encoded) else {
            return false;
        };

        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            parsed.iterations,
            parsed.salt.as_bytes(),
            password.as_bytes(),
            &parsed.digest,
        )
        .is_ok()
    }

    /// Hash a password with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let mut salt_bytes = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
        // URL-safe alphabet never contains the `$` separator
        let salt = URL_SAFE_NO_PAD.encode(salt_bytes);

        let mut digest = [0u8; DIGEST_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt.as_bytes(),
            password.as_bytes(),
            &mut digest,
        );

        Ok(format!(
            "{}${}${}${}",
            ALGORITHM_TAG,
            self.iterations,
            salt,
            BASE64.encode(digest)
        ))
    }
}

struct ParsedHash<'a> {
    iterations: NonZeroU32,
    salt: &'a str,
    digest: Vec<u8>,
}

impl<'a> ParsedHash<'a> {
    fn parse(encoded: &'a str) -> Option<Self> {
        let mut parts = encoded.splitn(4, '$');
        let algorithm = parts.next()?;
        let iterations = parts.next()?;
        let salt = parts.next()?;
        let digest = parts.next()?;

        if algorithm != ALGORITHM_TAG || salt.is_empty() {
            return None;
        }

        Some(Self {
            iterations: iterations.parse().ok()?,
            salt,
            digest: BASE64.decode(digest).ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference values generated with Python's hashlib.pbkdf2_hmac
    const KNOWN_HASH: &str =
        "pbkdf2_sha256$1000$seasalt$mQnueSakb748zqBAC1tmWVZsZbi2zPGZarEzTGdfmso=";

    #[test]
    fn verifies_reference_hash() {
        let hasher = LegacyPasswordHasher::new(1_000);
        assert!(hasher.verify("correct horse", KNOWN_HASH));
        assert!(!hasher.verify("correct horse!", KNOWN_HASH));
    }

    #[test]
    fn verifies_with_iterations_from_the_hash() {
        // The configured iteration count does not matter for verification
        let hasher = LegacyPasswordHasher::new(260_000);
        let encoded = "pbkdf2_sha256$2$abc123$K5Vl/h9/7EoYqdMm9zj7oLEq8ucMBWbS9tOekC/EFuI=";
        assert!(hasher.verify("hunter2", encoded));
    }

    #[test]
    fn hash_then_verify() {
        let hasher = LegacyPasswordHasher::new(1_000);
        let encoded = hasher.hash("s3cret-pass").unwrap();

        assert!(encoded.starts_with("pbkdf2_sha256$1000$"));
        assert!(hasher.verify("s3cret-pass", &encoded));
        assert!(!hasher.verify("other", &encoded));
    }

    #[test]
    fn salts_are_unique() {
        let hasher = LegacyPasswordHasher::new(1_000);
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn malformed_hashes_never_verify() {
        let hasher = LegacyPasswordHasher::new(1_000);
        for encoded in [
            "",
            "pbkdf2_sha256$1000$seasalt",
            "bcrypt$1000$seasalt$mQnueSakb748zqBAC1tmWVZsZbi2zPGZarEzTGdfmso=",
            "pbkdf2_sha256$0$seasalt$mQnueSakb748zqBAC1tmWVZsZbi2zPGZarEzTGdfmso=",
            "pbkdf2_sha256$abc$seasalt$mQnueSakb748zqBAC1tmWVZsZbi2zPGZarEzTGdfmso=",
            "pbkdf2_sha256$1000$seasalt$not base64",
        ] {
            assert!(!hasher.verify("correct horse", encoded), "{encoded}");
        }
    }
}
