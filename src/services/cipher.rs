// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Symmetric encryption for secrets parked in the session store.
//!
//! AES-256-GCM with a key derived from the configured secret via HKDF.
//! Ciphertexts are `base64(nonce || sealed)`; the associated data binds a
//! ciphertext to its owner (e.g. the signup email) so it cannot be
//! replayed under another record.

use crate::error::AppError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use std::sync::Arc;

const KEY_INFO: &[u8] = b"storefront-auth/pending-signup/v1";

/// AEAD cipher service.
#[derive(Clone)]
pub struct PayloadCipher {
    key: Arc<LessSafeKey>,
    rng: SystemRandom,
}

impl PayloadCipher {
    /// Derive the encryption key from secret key material.
    pub fn new(secret: &[u8]) -> Result<Self, AppError> {
        if secret.is_empty() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Encryption secret must not be empty"
            )));
        }

        let mut key_bytes = [0u8; 32];
        Hkdf::<Sha256>::new(None, secret)
            .expand(KEY_INFO, &mut key_bytes)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HKDF expand failed: {}", e)))?;

        let unbound = UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid AES key")))?;

        Ok(Self {
            key: Arc::new(LessSafeKey::new(unbound)),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt plaintext bound to `aad`. Returns base64-encoded ciphertext.
    pub fn encrypt(&self, plaintext: &str, aad: &[u8]) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Encryption failed")))?;

        let mut output = nonce_bytes.to_vec();
        output.extend_from_slice(&in_out);
        Ok(BASE64.encode(output))
    }

    /// Decrypt base64 ciphertext. Fails if `aad` differs from encryption time.
    pub fn decrypt(&self, ciphertext_b64: &str, aad: &[u8]) -> Result<String, AppError> {
        let data = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Base64 decode failed: {}", e)))?;

        if data.len() < NONCE_LEN {
            return Err(AppError::Internal(anyhow::anyhow!("Ciphertext too short")));
        }

        let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid nonce")))?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Decryption failed")))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("UTF-8 decode failed: {}", e)))
    }
}
