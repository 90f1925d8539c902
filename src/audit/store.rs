// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Durable storage seam for audit entries.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::security::EngineError;

use super::chain::AuditEntry;

/// Append-only backing store for the audit chain.
///
/// `persist` is called while the chain's append lock is held; an error
/// aborts the append and leaves the chain untouched.
pub trait AuditStore: Send + Sync {
    /// Durably records one entry.
    fn persist(&self, entry: &AuditEntry) -> Result<(), EngineError>;

    /// Returns every stored entry in chain order.
    fn load_all(&self) -> Result<Vec<AuditEntry>, EngineError>;
}

/// In-process [`AuditStore`].
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryAuditStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `persist` fail, simulating a backend outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn persist(&self, entry: &AuditEntry) -> Result<(), EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Storage("audit store unavailable".into()));
        }
        self.entries.write().push(entry.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AuditEntry>, EngineError> {
        Ok(self.entries.read().clone())
    }
}
