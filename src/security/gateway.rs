// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Orchestrates access checks, key lookup, encryption and auditing.
//!
//! Each request moves through fixed stages and stops at the first failure:
//!
//! ```text
//! Received ─► ContextValidated ─► KeyResolved ─► CryptoDone ─► Audited ─► Returned
//! ```
//!
//! Nothing is retried. An encryption whose audit entry cannot be written is
//! discarded, so no ciphertext leaves the gateway unaudited.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::audit::{AuditChain, AuditEventType, AuditRecord, AuditStore, ChainVerification};

use super::cipher::AuthenticatedCipher;
use super::config::EngineConfig;
use super::context::{PrivilegeLevel, SecurityContext, SecurityContextManager, SecurityLevel};
use super::derivation::KeyDerivation;
use super::envelope::EncryptedEnvelope;
use super::error::EngineError;
use super::keystore::{ClientKeyStore, InMemorySecretStore, SecretStore};
use super::validator::PrivilegeAccessValidator;

/// Progress of one gateway request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestStage {
    /// Request accepted, nothing checked yet.
    Received,
    /// Context is live, owns the client and has clearance.
    ContextValidated,
    /// The client's key was found.
    KeyResolved,
    /// Encryption or decryption succeeded.
    CryptoDone,
    /// The audit entry was appended.
    Audited,
    /// Result handed back to the caller.
    Returned,
}

/// Façade encrypting and decrypting client data on behalf of callers.
pub struct EncryptionGateway {
    config: EngineConfig,
    audit: Arc<AuditChain>,
    keys: Arc<ClientKeyStore>,
    contexts: Arc<SecurityContextManager>,
    validator: PrivilegeAccessValidator,
    cipher: AuthenticatedCipher,
}

impl EncryptionGateway {
    /// Creates a gateway with in-memory secret and audit storage.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let audit = Self::configure_chain(AuditChain::new(), &config);
        Self::with_stores(
            config,
            Arc::new(InMemorySecretStore::new()),
            Arc::new(audit),
        )
    }

    /// Creates a gateway whose audit chain is loaded from, and persisted to,
    /// `audit_store`. The chain takes its service name and mirroring
    /// threshold from `config`.
    pub fn with_audit_store(
        config: EngineConfig,
        secrets: Arc<dyn SecretStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Result<Self, EngineError> {
        let audit = Self::configure_chain(AuditChain::open(audit_store)?, &config);
        Self::with_stores(config, secrets, Arc::new(audit))
    }

    /// Creates a gateway over caller-supplied storage.
    ///
    /// `audit` is used as given: its service name and mirroring threshold
    /// are its own, and `config.service_name` and `config.audit_min_severity`
    /// do not apply to it. Use [`with_audit_store`](Self::with_audit_store)
    /// to have them applied.
    pub fn with_stores(
        config: EngineConfig,
        secrets: Arc<dyn SecretStore>,
        audit: Arc<AuditChain>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let kdf = KeyDerivation::new(config.kdf_iterations)?;
        let keys = Arc::new(ClientKeyStore::new(secrets, kdf, Arc::clone(&audit)));
        let contexts = Arc::new(
            SecurityContextManager::new(Arc::clone(&keys), Arc::clone(&audit))
                .with_ttl(config.context_ttl),
        );
        let validator = PrivilegeAccessValidator::new(Arc::clone(&audit));

        Ok(Self {
            config,
            audit,
            keys,
            contexts,
            validator,
            cipher: AuthenticatedCipher::new(),
        })
    }

    fn configure_chain(chain: AuditChain, config: &EngineConfig) -> AuditChain {
        chain
            .with_service_name(config.service_name.clone())
            .with_min_severity(config.audit_min_severity)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the audit chain.
    pub fn audit(&self) -> &Arc<AuditChain> {
        &self.audit
    }

    /// Returns the client key store.
    pub fn keys(&self) -> &Arc<ClientKeyStore> {
        &self.keys
    }

    /// Returns the security context manager.
    pub fn contexts(&self) -> &Arc<SecurityContextManager> {
        &self.contexts
    }

    /// Opens a security context for an authenticated user.
    pub fn create_context(
        &self,
        user_id: &str,
        client_id: &str,
        security_level: SecurityLevel,
        privilege_level: PrivilegeLevel,
    ) -> Result<SecurityContext, EngineError> {
        self.contexts
            .create(user_id, client_id, security_level, privilege_level)
    }

    /// Encrypts `plaintext` for `requested_client_id` within `context`.
    #[instrument(
        skip(self, context, plaintext),
        fields(user_id = %context.user_id, client_id = %requested_client_id)
    )]
    pub fn encrypt_for(
        &self,
        context: &SecurityContext,
        requested_client_id: &str,
        plaintext: &[u8],
        privilege_level: PrivilegeLevel,
    ) -> Result<EncryptedEnvelope, EngineError> {
        let mut stage = RequestStage::Received;
        let result = self.run_encrypt(
            &mut stage,
            context,
            requested_client_id,
            plaintext,
            privilege_level,
        );
        if let Err(e) = &result {
            warn!(stage = ?stage, error = %e, "Encryption request failed");
        }
        result
    }

    /// Decrypts `envelope` for `requested_client_id` within `context`.
    #[instrument(
        skip(self, context, envelope),
        fields(user_id = %context.user_id, client_id = %requested_client_id)
    )]
    pub fn decrypt_for(
        &self,
        context: &SecurityContext,
        requested_client_id: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, EngineError> {
        let mut stage = RequestStage::Received;
        let result = self.run_decrypt(&mut stage, context, requested_client_id, envelope);
        if let Err(e) = &result {
            warn!(stage = ?stage, error = %e, "Decryption request failed");
        }
        result
    }

    /// Revokes a client: destroys its key and closes all of its contexts.
    ///
    /// Returns the number of contexts closed. Once the key store has marked
    /// the client revoked, its contexts are closed even if deleting the
    /// secret material failed; that failure is still returned.
    #[instrument(skip(self))]
    pub fn revoke_client(&self, client_id: &str) -> Result<usize, EngineError> {
        let revoked = match self.keys.revoke(client_id) {
            Err(e) if !self.keys.is_revoked(client_id) => return Err(e),
            other => other,
        };

        let closed = self.contexts.invalidate_all_for_client(client_id)?;
        warn!(closed_contexts = closed, "Client access revoked");
        revoked.map(|()| closed)
    }

    /// Sweeps expired security contexts, returning how many were removed.
    pub fn purge_expired_contexts(&self) -> Result<usize, EngineError> {
        self.contexts.purge_expired()
    }

    /// Verifies the audit chain from genesis.
    pub fn verify_audit_chain(&self) -> ChainVerification {
        self.audit.verify()
    }

    /// Hash of the newest audit entry, for external anchoring.
    pub fn audit_tail_hash(&self) -> String {
        self.audit.tail_hash()
    }

    fn run_encrypt(
        &self,
        stage: &mut RequestStage,
        context: &SecurityContext,
        requested_client_id: &str,
        plaintext: &[u8],
        privilege_level: PrivilegeLevel,
    ) -> Result<EncryptedEnvelope, EngineError> {
        self.validate_context(context, requested_client_id)?;
        *stage = RequestStage::ContextValidated;

        let key = self.keys.get(requested_client_id)?;
        *stage = RequestStage::KeyResolved;

        let envelope = self
            .cipher
            .encrypt(plaintext, &key, requested_client_id, privilege_level)?;
        *stage = RequestStage::CryptoDone;

        self.audit.append(
            AuditRecord::new(AuditEventType::DataEncrypted, context.user_id.as_str())
                .with_client(requested_client_id)
                .with_session(context.session_id.as_str())
                .with_details(json!({
                    "algorithm": envelope.algorithm_id(),
                    "privilege_level": privilege_level.as_str(),
                    "plaintext_bytes": plaintext.len(),
                })),
        )?;
        *stage = RequestStage::Audited;

        debug!("Encrypted value");
        *stage = RequestStage::Returned;
        Ok(envelope)
    }

    fn run_decrypt(
        &self,
        stage: &mut RequestStage,
        context: &SecurityContext,
        requested_client_id: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, EngineError> {
        self.validate_context(context, requested_client_id)?;
        if envelope.client_id() != requested_client_id {
            return Err(self.validator.deny(
                context,
                requested_client_id,
                "envelope_client_mismatch",
            ));
        }
        *stage = RequestStage::ContextValidated;

        let key = self.keys.get(requested_client_id)?;
        *stage = RequestStage::KeyResolved;

        let plaintext = match self.cipher.decrypt(envelope, &key, requested_client_id) {
            Ok(plaintext) => plaintext,
            Err(e @ (EngineError::TamperedOrInvalid(_) | EngineError::InvalidInput(_))) => {
                let reason = match &e {
                    EngineError::TamperedOrInvalid(_) => "authentication_failed",
                    _ => "malformed_envelope",
                };
                self.audit.append(
                    AuditRecord::new(AuditEventType::DecryptionFailed, context.user_id.as_str())
                        .with_client(requested_client_id)
                        .with_session(context.session_id.as_str())
                        .with_detail("reason", reason)
                        .with_detail("envelope_created_at", envelope.created_at().to_rfc3339()),
                )?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        *stage = RequestStage::CryptoDone;

        self.audit.append(
            AuditRecord::new(AuditEventType::DataDecrypted, context.user_id.as_str())
                .with_client(requested_client_id)
                .with_session(context.session_id.as_str())
                .with_details(json!({
                    "algorithm": envelope.algorithm_id(),
                    "privilege_level": envelope.privilege_level().as_str(),
                    "envelope_created_at": envelope.created_at().to_rfc3339(),
                })),
        )?;
        *stage = RequestStage::Audited;

        debug!("Decrypted value");
        *stage = RequestStage::Returned;
        Ok(plaintext)
    }

    /// Client match, revocation, liveness and clearance, in that order.
    fn validate_context(
        &self,
        context: &SecurityContext,
        requested_client_id: &str,
    ) -> Result<(), EngineError> {
        self.validator.ensure(context, requested_client_id)?;

        if self.keys.is_revoked(requested_client_id) {
            return Err(self
                .validator
                .deny(context, requested_client_id, "client_revoked"));
        }

        let live = match self.contexts.lookup(&context.context_id) {
            Ok(live) => live,
            Err(_) => {
                return Err(self
                    .validator
                    .deny(context, requested_client_id, "context_not_live"))
            }
        };
        if live != *context {
            return Err(self
                .validator
                .deny(context, requested_client_id, "context_mismatch"));
        }

        self.validator
            .ensure_clearance(&live, self.config.required_security_level)
    }
}
