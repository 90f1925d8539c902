// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hash-linked audit chain.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use ring::digest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::security::EngineError;

use super::store::AuditStore;

/// `previous_hash` of the first entry in every chain.
pub const GENESIS_HASH: &str = "genesis";

/// Types of security events recorded in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A client key was derived and activated.
    KeyIssued,
    /// A client key was destroyed.
    KeyRevoked,
    /// A security context was opened.
    ContextCreated,
    /// One or more security contexts were closed.
    ContextInvalidated,
    /// A value was encrypted for a client.
    DataEncrypted,
    /// A value was decrypted for a client.
    DataDecrypted,
    /// A caller tried to reach a client outside its context.
    PrivilegeViolation,
    /// Authentication of a ciphertext failed.
    DecryptionFailed,
}

impl AuditEventType {
    /// Returns the event name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::KeyIssued => "key_issued",
            AuditEventType::KeyRevoked => "key_revoked",
            AuditEventType::ContextCreated => "context_created",
            AuditEventType::ContextInvalidated => "context_invalidated",
            AuditEventType::DataEncrypted => "data_encrypted",
            AuditEventType::DataDecrypted => "data_decrypted",
            AuditEventType::PrivilegeViolation => "privilege_violation",
            AuditEventType::DecryptionFailed => "decryption_failed",
        }
    }

    /// Returns the severity level for this event.
    pub fn severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::KeyIssued => AuditSeverity::Info,
            AuditEventType::KeyRevoked => AuditSeverity::Warning,
            AuditEventType::ContextCreated => AuditSeverity::Info,
            AuditEventType::ContextInvalidated => AuditSeverity::Info,
            AuditEventType::DataEncrypted => AuditSeverity::Info,
            AuditEventType::DataDecrypted => AuditSeverity::Info,
            AuditEventType::PrivilegeViolation => AuditSeverity::Critical,
            AuditEventType::DecryptionFailed => AuditSeverity::Critical,
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity levels for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    /// Informational event.
    Info,
    /// Warning event - unusual but not critical.
    Warning,
    /// Critical event - security violation.
    Critical,
}

impl AuditSeverity {
    /// Returns the severity as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "INFO",
            AuditSeverity::Warning => "WARN",
            AuditSeverity::Critical => "CRITICAL",
        }
    }
}

/// An event waiting to be appended to the chain.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// The event that occurred.
    pub event_type: AuditEventType,
    /// The acting user or service.
    pub user_id: String,
    /// The client the event concerns.
    pub client_id: Option<String>,
    /// The session the event happened in.
    pub session_id: Option<String>,
    /// Structured, non-sensitive details.
    pub details: Value,
}

impl AuditRecord {
    /// Creates a new record with empty details.
    pub fn new(event_type: AuditEventType, user_id: impl Into<String>) -> Self {
        Self {
            event_type,
            user_id: user_id.into(),
            client_id: None,
            session_id: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the client the event concerns.
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the session the event happened in.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Replaces the details object.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Adds one detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.into(), value.into());
        }
        self
    }
}

/// One appended, hash-linked entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID.
    pub id: String,
    /// Position in the chain, starting at 0.
    pub chain_index: u64,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// The event recorded.
    pub event_type: AuditEventType,
    /// The acting user or service.
    pub user_id: String,
    /// The client concerned, if any.
    pub client_id: Option<String>,
    /// The session concerned, if any.
    pub session_id: Option<String>,
    /// Structured, non-sensitive details.
    pub details: Value,
    /// Hash of the previous entry, or [`GENESIS_HASH`].
    pub previous_hash: String,
    /// SHA-256 of every other field, hex encoded.
    pub hash: String,
}

/// Every field of an entry except `hash`, in canonical order.
#[derive(Serialize)]
struct HashedFields<'a> {
    id: &'a str,
    chain_index: u64,
    timestamp: &'a DateTime<Utc>,
    event_type: AuditEventType,
    user_id: &'a str,
    client_id: Option<&'a str>,
    session_id: Option<&'a str>,
    details: &'a Value,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Recomputes the SHA-256 hash of this entry's canonical JSON, as hex.
    pub fn compute_hash(&self) -> Result<String, EngineError> {
        let canonical = serde_json::to_vec(&HashedFields {
            id: &self.id,
            chain_index: self.chain_index,
            timestamp: &self.timestamp,
            event_type: self.event_type,
            user_id: &self.user_id,
            client_id: self.client_id.as_deref(),
            session_id: self.session_id.as_deref(),
            details: &self.details,
            previous_hash: &self.previous_hash,
        })?;
        Ok(hex::encode(
            digest::digest(&digest::SHA256, &canonical).as_ref(),
        ))
    }

    /// Returns the severity of this entry's event.
    pub fn severity(&self) -> AuditSeverity {
        self.event_type.severity()
    }
}

/// Outcome of walking a chain from genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// True if every entry hashes and links correctly.
    pub valid: bool,
    /// Index of the first entry that failed, if any.
    pub first_invalid_index: Option<u64>,
    /// Number of entries examined.
    pub entries_checked: u64,
}

impl ChainVerification {
    /// Converts the report into a `Result`.
    pub fn into_result(self) -> Result<(), EngineError> {
        match self.first_invalid_index {
            Some(index) => Err(EngineError::ChainIntegrity { index }),
            None => Ok(()),
        }
    }
}

struct ChainState {
    entries: Vec<AuditEntry>,
    tail_hash: String,
}

/// Append-only, hash-linked log of security events.
///
/// A single mutex covers tail selection, persistence and the append, so two
/// writers never link against the same tail. Each entry is also mirrored to
/// the `audit` tracing target.
pub struct AuditChain {
    state: Mutex<ChainState>,
    store: Option<Arc<dyn AuditStore>>,
    service_name: String,
    min_severity: AuditSeverity,
}

impl Default for AuditChain {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditChain {
    /// Creates an empty, memory-only chain.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                entries: Vec::new(),
                tail_hash: GENESIS_HASH.to_string(),
            }),
            store: None,
            service_name: "privilege-vault".to_string(),
            min_severity: AuditSeverity::Info,
        }
    }

    /// Rebuilds a chain from previously exported entries.
    ///
    /// Refuses entries that do not verify from genesis.
    pub fn resume(entries: Vec<AuditEntry>) -> Result<Self, EngineError> {
        Self::verify_entries(&entries).into_result()?;

        let chain = Self::new();
        {
            let mut state = chain.state.lock();
            state.tail_hash = entries
                .last()
                .map(|e| e.hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            state.entries = entries;
        }
        Ok(chain)
    }

    /// Loads and resumes the chain held by `store`, persisting new entries to it.
    pub fn open(store: Arc<dyn AuditStore>) -> Result<Self, EngineError> {
        let entries = store.load_all()?;
        Ok(Self::resume(entries)?.with_store(store))
    }

    /// Persists every appended entry to `store` before it joins the chain.
    pub fn with_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the service name attached to mirrored log lines.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Sets the minimum severity mirrored to tracing.
    pub fn with_min_severity(mut self, severity: AuditSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Service name attached to mirrored log lines.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Minimum severity mirrored to tracing.
    pub fn min_severity(&self) -> AuditSeverity {
        self.min_severity
    }

    /// Appends a record, linking it to the current tail.
    ///
    /// If the store rejects the entry, the chain is left unchanged.
    pub fn append(&self, record: AuditRecord) -> Result<AuditEntry, EngineError> {
        let entry = {
            let mut state = self.state.lock();

            let mut entry = AuditEntry {
                id: uuid::Uuid::new_v4().to_string(),
                chain_index: state.entries.len() as u64,
                timestamp: Utc::now().trunc_subsecs(6),
                event_type: record.event_type,
                user_id: record.user_id,
                client_id: record.client_id,
                session_id: record.session_id,
                details: record.details,
                previous_hash: state.tail_hash.clone(),
                hash: String::new(),
            };
            entry.hash = entry.compute_hash()?;

            if let Some(store) = &self.store {
                store.persist(&entry)?;
            }

            state.tail_hash = entry.hash.clone();
            state.entries.push(entry.clone());
            entry
        };

        self.mirror(&entry);
        Ok(entry)
    }

    /// Verifies the whole chain.
    ///
    /// Works on a snapshot, so appends are only blocked while it is copied.
    pub fn verify(&self) -> ChainVerification {
        let snapshot = self.entries();
        let report = Self::verify_entries(&snapshot);
        if let Some(index) = report.first_invalid_index {
            error!(
                target: "audit",
                service = %self.service_name,
                first_invalid_index = index,
                "Audit chain integrity check failed"
            );
        }
        report
    }

    /// Verifies the whole chain, reporting a break as an error.
    pub fn verify_strict(&self) -> Result<(), EngineError> {
        self.verify().into_result()
    }

    /// Verifies an exported run of entries starting at genesis.
    ///
    /// Only detects modification of the entries given. Entries removed from
    /// the end of an export by an untrusted exporter go unnoticed.
    pub fn verify_entries(entries: &[AuditEntry]) -> ChainVerification {
        let mut expected_prev = GENESIS_HASH;

        for (i, entry) in entries.iter().enumerate() {
            let index = i as u64;
            let hash_ok = entry
                .compute_hash()
                .map(|h| h == entry.hash)
                .unwrap_or(false);

            if entry.chain_index != index || entry.previous_hash != expected_prev || !hash_ok {
                return ChainVerification {
                    valid: false,
                    first_invalid_index: Some(index),
                    entries_checked: index + 1,
                };
            }
            expected_prev = entry.hash.as_str();
        }

        ChainVerification {
            valid: true,
            first_invalid_index: None,
            entries_checked: entries.len() as u64,
        }
    }

    /// Hash of the newest entry, for anchoring in an external medium.
    pub fn tail_hash(&self) -> String {
        self.state.lock().tail_hash.clone()
    }

    /// Read-only copy of every entry, in chain order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.state.lock().entries.clone()
    }

    /// Entries concerning one client.
    pub fn entries_for_client(&self, client_id: &str) -> Vec<AuditEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.client_id.as_deref() == Some(client_id))
            .cloned()
            .collect()
    }

    /// Entries of one event type.
    pub fn entries_by_type(&self, event_type: AuditEventType) -> Vec<AuditEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Number of entries in the chain.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Rewrites a stored entry in place, bypassing hashing.
    #[cfg(test)]
    pub(crate) fn tamper(&self, index: usize, f: impl FnOnce(&mut AuditEntry)) {
        if let Some(entry) = self.state.lock().entries.get_mut(index) {
            f(entry);
        }
    }

    fn mirror(&self, entry: &AuditEntry) {
        let severity = entry.severity();
        if severity < self.min_severity {
            return;
        }

        let client_id = entry.client_id.as_deref().unwrap_or("-");
        let session_id = entry.session_id.as_deref().unwrap_or("-");

        match severity {
            AuditSeverity::Info => {
                info!(
                    target: "audit",
                    chain_index = entry.chain_index,
                    service = %self.service_name,
                    event_type = entry.event_type.as_str(),
                    user_id = %entry.user_id,
                    client_id = %client_id,
                    session_id = %session_id,
                    hash = %entry.hash,
                    "Security event recorded"
                );
            }
            AuditSeverity::Warning => {
                warn!(
                    target: "audit",
                    chain_index = entry.chain_index,
                    service = %self.service_name,
                    event_type = entry.event_type.as_str(),
                    user_id = %entry.user_id,
                    client_id = %client_id,
                    session_id = %session_id,
                    hash = %entry.hash,
                    "Security event warning"
                );
            }
            AuditSeverity::Critical => {
                error!(
                    target: "audit",
                    chain_index = entry.chain_index,
                    service = %self.service_name,
                    event_type = entry.event_type.as_str(),
                    user_id = %entry.user_id,
                    client_id = %client_id,
                    session_id = %session_id,
                    details = %entry.details,
                    severity = severity.as_str(),
                    "Security violation recorded"
                );
            }
        }
    }
}
