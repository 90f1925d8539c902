// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-client key derivation.
//!
//! Keys are derived with PBKDF2-HMAC-SHA256. The salt is `SHA-256(client_id)`:
//! not secret, it only separates clients that happen to share secret
//! material. Derivation is deterministic, so a key can be rebuilt after a
//! restart from the secret material held in a [`SecretStore`].
//!
//! [`SecretStore`]: super::keystore::SecretStore

use std::num::NonZeroU32;

use ring::digest;
use ring::pbkdf2;

use super::error::EngineError;
use super::keystore::AES_256_KEY_SIZE;

/// Lowest PBKDF2 iteration count accepted.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Shortest secret material accepted for derivation.
pub const MIN_SECRET_LEN: usize = 16;

/// Size of freshly generated secret material.
pub const SECRET_MATERIAL_SIZE: usize = 32;

/// PBKDF2 key deriver bound to an iteration count.
#[derive(Debug, Clone, Copy)]
pub struct KeyDerivation {
    iterations: NonZeroU32,
}

impl KeyDerivation {
    /// Creates a deriver with the given iteration count.
    pub fn new(iterations: u32) -> Result<Self, EngineError> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(EngineError::InvalidInput(format!(
                "kdf iterations {} below minimum {}",
                iterations, MIN_KDF_ITERATIONS
            )));
        }
        let iterations = NonZeroU32::new(iterations)
            .ok_or_else(|| EngineError::InvalidInput("kdf iterations must be non-zero".into()))?;
        Ok(Self { iterations })
    }

    /// Returns the iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations.get()
    }

    /// Derives the 32-byte key for `client_id` from `secret_material`.
    pub fn derive(
        &self,
        client_id: &str,
        secret_material: &[u8],
    ) -> Result<[u8; AES_256_KEY_SIZE], EngineError> {
        if secret_material.len() < MIN_SECRET_LEN {
            return Err(EngineError::InvalidInput(format!(
                "secret material must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                secret_material.len()
            )));
        }

        let salt = client_salt(client_id);
        let mut key = [0u8; AES_256_KEY_SIZE];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt.as_ref(),
            secret_material,
            &mut key,
        );
        Ok(key)
    }
}

impl Default for KeyDerivation {
    fn default() -> Self {
        Self {
            iterations: NonZeroU32::MIN.saturating_add(MIN_KDF_ITERATIONS - 1),
        }
    }
}

/// Domain-separation salt for a client.
pub fn client_salt(client_id: &str) -> digest::Digest {
    digest::digest(&digest::SHA256, client_id.as_bytes())
}
