// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Engine error types.
//!
//! Messages carry identifiers only. Key bytes and plaintext never appear in
//! an error.

/// Errors that can occur in the privilege engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A client key or security context does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cross-client access attempt, or a context that is no longer live.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Authentication tag or associated-data verification failed.
    #[error("ciphertext tampered or invalid: {0}")]
    TamperedOrInvalid(String),

    /// Malformed input rejected before any cryptographic primitive runs.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// The audit chain failed verification at `index`.
    #[error("audit chain integrity violated at index {index}")]
    ChainIntegrity { index: u64 },

    /// A secret or audit store backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A background codec task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// Ring crypto error.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl EngineError {
    /// Returns true if this error is a cross-tenant or revoked-access denial.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, EngineError::AccessDenied(_))
    }
}

impl From<ring::error::Unspecified> for EngineError {
    fn from(_: ring::error::Unspecified) -> Self {
        EngineError::Crypto("unspecified cryptographic error".to_string())
    }
}

impl From<base64::DecodeError> for EngineError {
    fn from(err: base64::DecodeError) -> Self {
        EngineError::InvalidInput(format!("invalid base64: {}", err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidInput(format!("invalid json: {}", err))
    }
}
