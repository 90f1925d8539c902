// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! PrivilegeVault: per-client cryptographic isolation and a tamper-evident
//! audit trail for attorney-client privileged data
//!
//! This crate keeps each client's data under its own key, refuses every
//! cross-client access, and records each security-relevant event in a
//! hash-chained audit log that can be verified independently.

pub mod audit;
pub mod security;

pub use audit::{
    AuditChain, AuditEntry, AuditEventType, AuditRecord, AuditSeverity, AuditStore,
    ChainVerification, InMemoryAuditStore, GENESIS_HASH,
};
pub use security::{
    EncryptedEnvelope, EncryptionGateway, EngineConfig, EngineError, FieldCodec, PrivilegeLevel,
    SecurityContext, SecurityLevel,
};
