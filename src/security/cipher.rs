// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! AES-256-GCM encryption bound to client metadata.
//!
//! Every call draws a fresh random 12-byte IV. The associated data encodes
//! the owning client, the privilege level and the encryption time, so a
//! ciphertext cannot be replayed under different metadata.

use chrono::{SubsecRound, Utc};
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use super::context::PrivilegeLevel;
use super::envelope::{canonical_associated_data, EncryptedEnvelope, ALGORITHM_AES_256_GCM};
use super::error::EngineError;
use super::keystore::ClientKey;

/// Size of AES-GCM nonce in bytes.
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// Size of AES-GCM authentication tag in bytes.
pub const AES_GCM_TAG_SIZE: usize = 16;

/// Nonce sequence that yields its nonce exactly once.
struct SingleUseNonce {
    nonce: Option<[u8; NONCE_LEN]>,
}

impl SingleUseNonce {
    fn new(nonce: [u8; NONCE_LEN]) -> Self {
        Self { nonce: Some(nonce) }
    }
}

impl NonceSequence for SingleUseNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.nonce
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Authenticated encryption of client data.
pub struct AuthenticatedCipher {
    rng: SystemRandom,
}

impl Default for AuthenticatedCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticatedCipher {
    /// Creates a cipher backed by the system RNG.
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// Encrypts `plaintext` for `client_id` with that client's key.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        key: &ClientKey,
        client_id: &str,
        privilege_level: PrivilegeLevel,
    ) -> Result<EncryptedEnvelope, EngineError> {
        if key.client_id() != client_id {
            return Err(EngineError::AccessDenied(format!(
                "key of client {} cannot encrypt for client {}",
                key.client_id(),
                client_id
            )));
        }

        let mut iv = [0u8; AES_GCM_NONCE_SIZE];
        self.rng
            .fill(&mut iv)
            .map_err(|_| EngineError::Crypto("failed to generate IV".into()))?;

        let created_at = Utc::now().trunc_subsecs(6);
        let aad = canonical_associated_data(client_id, privilege_level, created_at)?;

        let unbound_key = aead::UnboundKey::new(&aead::AES_256_GCM, key.key())?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleUseNonce::new(iv));

        let mut in_out = plaintext.to_vec();
        let tag = sealing_key
            .seal_in_place_separate_tag(Aad::from(aad.as_slice()), &mut in_out)
            .map_err(|_| EngineError::Crypto("AES-GCM seal failed".into()))?;

        Ok(EncryptedEnvelope::new(
            in_out,
            tag.as_ref().to_vec(),
            iv.to_vec(),
            client_id.to_string(),
            privilege_level,
            created_at,
            aad,
        ))
    }

    /// Decrypts `envelope` for `requested_client_id`.
    ///
    /// The client check runs before any cryptographic work. Nothing is
    /// returned unless both the associated data and the tag verify.
    pub fn decrypt(
        &self,
        envelope: &EncryptedEnvelope,
        key: &ClientKey,
        requested_client_id: &str,
    ) -> Result<Vec<u8>, EngineError> {
        if envelope.client_id() != requested_client_id {
            return Err(EngineError::AccessDenied(format!(
                "envelope of client {} requested for client {}",
                envelope.client_id(),
                requested_client_id
            )));
        }
        if key.client_id() != requested_client_id {
            return Err(EngineError::AccessDenied(format!(
                "key of client {} cannot decrypt for client {}",
                key.client_id(),
                requested_client_id
            )));
        }

        Self::validate_format(envelope)?;

        let aad = canonical_associated_data(
            envelope.client_id(),
            envelope.privilege_level(),
            envelope.created_at(),
        )?;
        if aad != envelope.associated_data() {
            return Err(EngineError::TamperedOrInvalid(
                "associated data does not match envelope metadata".into(),
            ));
        }

        let mut iv = [0u8; AES_GCM_NONCE_SIZE];
        iv.copy_from_slice(envelope.iv());

        let unbound_key = aead::UnboundKey::new(&aead::AES_256_GCM, key.key())?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleUseNonce::new(iv));

        let mut in_out = Vec::with_capacity(envelope.ciphertext().len() + AES_GCM_TAG_SIZE);
        in_out.extend_from_slice(envelope.ciphertext());
        in_out.extend_from_slice(envelope.auth_tag());

        let plaintext = opening_key
            .open_in_place(Aad::from(aad.as_slice()), &mut in_out)
            .map_err(|_| EngineError::TamperedOrInvalid("authentication tag mismatch".into()))?;

        Ok(plaintext.to_vec())
    }

    /// Rejects envelopes whose shape cannot be AES-256-GCM output.
    fn validate_format(envelope: &EncryptedEnvelope) -> Result<(), EngineError> {
        if envelope.algorithm_id() != ALGORITHM_AES_256_GCM {
            return Err(EngineError::InvalidInput(format!(
                "unsupported algorithm {}",
                envelope.algorithm_id()
            )));
        }
        if envelope.iv().len() != AES_GCM_NONCE_SIZE {
            return Err(EngineError::InvalidInput(format!(
                "iv must be {} bytes, got {}",
                AES_GCM_NONCE_SIZE,
                envelope.iv().len()
            )));
        }
        if envelope.auth_tag().len() != AES_GCM_TAG_SIZE {
            return Err(EngineError::InvalidInput(format!(
                "auth tag must be {} bytes, got {}",
                AES_GCM_TAG_SIZE,
                envelope.auth_tag().len()
            )));
        }
        Ok(())
    }
}
