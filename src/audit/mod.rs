// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Tamper-evident audit trail.
//!
//! Every security-relevant action appends one [`AuditEntry`] to an
//! [`AuditChain`]. Each entry carries the SHA-256 of its own canonical JSON
//! and the hash of its predecessor:
//!
//! ```text
//!  genesis ◄── prev ┌─────────┐ ◄── prev ┌─────────┐ ◄── prev ┌─────────┐
//!                   │ entry 0 │          │ entry 1 │          │ entry 2 │ ◄── tail_hash()
//!                   │  hash ──┼──────────┼► prev   │          │         │
//!                   └─────────┘          └─────────┘          └─────────┘
//! ```
//!
//! Rewriting any historical entry changes its hash and breaks the link to
//! the next one, which [`AuditChain::verify`] reports by index. The chain
//! only protects what it holds: anchor [`AuditChain::tail_hash`] externally
//! to detect a wholesale rewrite.
//!
//! # Example
//!
//! ```rust
//! use privilege_vault::audit::{AuditChain, AuditEventType, AuditRecord};
//!
//! let chain = AuditChain::new();
//! chain
//!     .append(AuditRecord::new(AuditEventType::KeyIssued, "system").with_client("client-1"))
//!     .unwrap();
//! assert!(chain.verify().valid);
//! ```

mod chain;
mod store;

pub use chain::{
    AuditChain, AuditEntry, AuditEventType, AuditRecord, AuditSeverity, ChainVerification,
    GENESIS_HASH,
};
pub use store::{AuditStore, InMemoryAuditStore};
