// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Security contexts: scoped authorization for one (user, client, session).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::{AuditChain, AuditEventType, AuditRecord};

use super::error::EngineError;
use super::keystore::{ClientKeyStore, SYSTEM_ACTOR};

/// Clearance of a context, totally ordered `Standard < Elevated < Max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Default clearance.
    Standard,
    /// Raised clearance.
    Elevated,
    /// Highest clearance.
    Max,
}

impl SecurityLevel {
    /// Returns the level name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Standard => "standard",
            SecurityLevel::Elevated => "elevated",
            SecurityLevel::Max => "max",
        }
    }

    /// Returns true if this clearance is at least `required`.
    pub fn satisfies(&self, required: SecurityLevel) -> bool {
        *self >= required
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensitivity classification of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeLevel {
    /// Not privileged.
    Public,
    /// Confidential business information.
    Confidential,
    /// Attorney-client privileged communication.
    AttorneyClient,
    /// Attorney work product.
    WorkProduct,
}

impl PrivilegeLevel {
    /// Returns the level name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivilegeLevel::Public => "public",
            PrivilegeLevel::Confidential => "confidential",
            PrivilegeLevel::AttorneyClient => "attorney_client",
            PrivilegeLevel::WorkProduct => "work_product",
        }
    }
}

impl std::fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live authorization binding a user, a client and a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Lookup key of this context.
    pub context_id: String,
    /// The authenticated user.
    pub user_id: String,
    /// The only client this context may touch.
    pub client_id: String,
    /// Session recorded on audit entries.
    pub session_id: String,
    /// Clearance of the user for this context.
    pub security_level: SecurityLevel,
    /// Default classification of content written in this context.
    pub privilege_level: PrivilegeLevel,
    /// When the context was opened.
    pub created_at: DateTime<Utc>,
    /// When the context stops being valid, if it expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SecurityContext {
    /// Returns true if the context has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Creates, looks up and tears down security contexts.
pub struct SecurityContextManager {
    contexts: RwLock<HashMap<String, SecurityContext>>,
    keys: Arc<ClientKeyStore>,
    audit: Arc<AuditChain>,
    ttl: Option<Duration>,
}

impl SecurityContextManager {
    /// Creates a manager that issues client keys through `keys`.
    pub fn new(keys: Arc<ClientKeyStore>, audit: Arc<AuditChain>) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            keys,
            audit,
            ttl: None,
        }
    }

    /// Expires contexts `ttl` after creation.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Opens a context, issuing the client's key if it has none yet.
    ///
    /// Expired contexts are swept first, so abandoned sessions do not
    /// accumulate. A revoked client is refused with `AccessDenied`.
    pub fn create(
        &self,
        user_id: &str,
        client_id: &str,
        security_level: SecurityLevel,
        privilege_level: PrivilegeLevel,
    ) -> Result<SecurityContext, EngineError> {
        if user_id.is_empty() {
            return Err(EngineError::InvalidInput("user_id is empty".into()));
        }
        self.purge_expired()?;
        self.keys.issue_as(user_id, client_id)?;

        let now = Utc::now().trunc_subsecs(6);
        let context = SecurityContext {
            context_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            security_level,
            privilege_level,
            created_at: now,
            expires_at: self.ttl.map(|ttl| now + ttl),
        };

        let mut contexts = self.contexts.write();
        // A concurrent revocation may have removed the key since issuance.
        if self.keys.is_revoked(client_id) {
            return Err(EngineError::AccessDenied(format!(
                "client {} has been revoked",
                client_id
            )));
        }
        if !self.keys.contains(client_id) {
            return Err(EngineError::NotFound(format!(
                "no key issued for client {}",
                client_id
            )));
        }

        self.audit.append(
            AuditRecord::new(AuditEventType::ContextCreated, user_id)
                .with_client(client_id)
                .with_session(context.session_id.as_str())
                .with_detail("context_id", context.context_id.as_str())
                .with_detail("security_level", security_level.as_str())
                .with_detail("privilege_level", privilege_level.as_str()),
        )?;

        contexts.insert(context.context_id.clone(), context.clone());
        debug!(context_id = %context.context_id, client_id = %client_id, "Created security context");
        Ok(context)
    }

    /// Returns the live context with `context_id`.
    ///
    /// An expired context is removed and reported as not found.
    pub fn lookup(&self, context_id: &str) -> Result<SecurityContext, EngineError> {
        let found = self.contexts.read().get(context_id).cloned();
        let context = found.ok_or_else(|| {
            EngineError::NotFound(format!("no live security context {}", context_id))
        })?;

        if context.is_expired_at(Utc::now()) {
            self.remove_where(SYSTEM_ACTOR, "expired", |c| c.context_id == context_id)?;
            return Err(EngineError::NotFound(format!(
                "security context {} expired",
                context_id
            )));
        }
        Ok(context)
    }

    /// Closes one context (logout).
    pub fn invalidate(&self, context_id: &str) -> Result<(), EngineError> {
        let context = self.lookup(context_id)?;
        let removed =
            self.remove_where(&context.user_id, "logout", |c| c.context_id == context_id)?;
        if removed == 0 {
            return Err(EngineError::NotFound(format!(
                "no live security context {}",
                context_id
            )));
        }
        Ok(())
    }

    /// Closes every context of `client_id`, returning how many were live.
    pub fn invalidate_all_for_client(&self, client_id: &str) -> Result<usize, EngineError> {
        self.remove_where(SYSTEM_ACTOR, "client_revoked", |c| c.client_id == client_id)
    }

    /// Removes every expired context, returning how many were removed.
    ///
    /// Records one `context_invalidated` entry with reason `expired` when any
    /// were removed. Callers without steady `create` traffic should run this
    /// periodically.
    pub fn purge_expired(&self) -> Result<usize, EngineError> {
        if self.ttl.is_none() {
            return Ok(0);
        }
        let now = Utc::now();
        self.remove_where(SYSTEM_ACTOR, "expired", |c| c.is_expired_at(now))
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    /// Returns true if no context is live.
    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }

    /// Removes matching contexts, recording one audit entry when any match.
    fn remove_where(
        &self,
        actor: &str,
        reason: &str,
        predicate: impl Fn(&SecurityContext) -> bool,
    ) -> Result<usize, EngineError> {
        let mut contexts = self.contexts.write();
        let doomed: Vec<&SecurityContext> = contexts.values().filter(|c| predicate(*c)).collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let mut record = AuditRecord::new(AuditEventType::ContextInvalidated, actor)
            .with_detail("reason", reason)
            .with_detail("count", doomed.len());
        if let [only] = doomed.as_slice() {
            record = record
                .with_client(only.client_id.as_str())
                .with_session(only.session_id.as_str())
                .with_detail("context_id", only.context_id.as_str());
        } else if let Some(first) = doomed.first() {
            record = record.with_client(first.client_id.as_str());
        }
        self.audit.append(record)?;

        let before = contexts.len();
        contexts.retain(|_, c| !predicate(&*c));
        Ok(before - contexts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::derivation::KeyDerivation;
    use crate::security::keystore::{InMemorySecretStore, SecretStore};

    fn manager() -> (SecurityContextManager, Arc<ClientKeyStore>, Arc<AuditChain>) {
        let audit = Arc::new(AuditChain::new());
        let keys = Arc::new(ClientKeyStore::new(
            Arc::new(InMemorySecretStore::new()) as Arc<dyn SecretStore>,
            KeyDerivation::default(),
            Arc::clone(&audit),
        ));
        let manager = SecurityContextManager::new(Arc::clone(&keys), Arc::clone(&audit));
        (manager, keys, audit)
    }

    #[test]
    fn test_security_level_order() {
        assert!(SecurityLevel::Standard < SecurityLevel::Elevated);
        assert!(SecurityLevel::Elevated < SecurityLevel::Max);
        assert!(SecurityLevel::Max.satisfies(SecurityLevel::Elevated));
        assert!(!SecurityLevel::Standard.satisfies(SecurityLevel::Elevated));
    }

    #[test]
    fn test_level_serde_names() {
        assert_eq!(
            serde_json::to_string(&PrivilegeLevel::AttorneyClient).unwrap(),
            "\"attorney_client\""
        );
        assert_eq!(serde_json::to_string(&SecurityLevel::Max).unwrap(), "\"max\"");
    }

    #[test]
    fn test_create_issues_key_and_audits() {
        let (manager, keys, audit) = manager();
        let ctx = manager
            .create("u1", "client-1", SecurityLevel::Standard, PrivilegeLevel::AttorneyClient)
            .unwrap();

        assert!(keys.contains("client-1"));
        assert_eq!(ctx.client_id, "client-1");
        assert_ne!(ctx.context_id, ctx.session_id);

        let entries = audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, AuditEventType::KeyIssued);
        assert_eq!(entries[1].event_type, AuditEventType::ContextCreated);
        assert_eq!(entries[1].session_id.as_deref(), Some(ctx.session_id.as_str()));
    }

    #[test]
    fn test_create_reuses_existing_key() {
        let (manager, keys, audit) = manager();
        keys.issue("client-1").unwrap();
        manager
            .create("u1", "client-1", SecurityLevel::Standard, PrivilegeLevel::Public)
            .unwrap();

        assert_eq!(audit.entries_by_type(AuditEventType::KeyIssued).len(), 1);
    }

    #[test]
    fn test_lookup_and_invalidate() {
        let (manager, _, _) = manager();
        let ctx = manager
            .create("u1", "client-1", SecurityLevel::Elevated, PrivilegeLevel::WorkProduct)
            .unwrap();

        assert_eq!(manager.lookup(&ctx.context_id).unwrap(), ctx);
        manager.invalidate(&ctx.context_id).unwrap();
        assert!(matches!(
            manager.lookup(&ctx.context_id),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            manager.invalidate(&ctx.context_id),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalidate_all_for_client() {
        let (manager, _, audit) = manager();
        let a1 = manager
            .create("u1", "client-a", SecurityLevel::Standard, PrivilegeLevel::Public)
            .unwrap();
        let a2 = manager
            .create("u2", "client-a", SecurityLevel::Standard, PrivilegeLevel::Public)
            .unwrap();
        let b = manager
            .create("u3", "client-b", SecurityLevel::Standard, PrivilegeLevel::Public)
            .unwrap();

        assert_eq!(manager.invalidate_all_for_client("client-a").unwrap(), 2);
        assert!(manager.lookup(&a1.context_id).is_err());
        assert!(manager.lookup(&a2.context_id).is_err());
        assert!(manager.lookup(&b.context_id).is_ok());

        let invalidations = audit.entries_by_type(AuditEventType::ContextInvalidated);
        assert_eq!(invalidations.len(), 1);
        assert_eq!(invalidations[0].details["count"], 2);
        assert_eq!(manager.invalidate_all_for_client("client-a").unwrap(), 0);
    }

    #[test]
    fn test_expired_context_not_found() {
        let (_, keys, audit) = manager();
        let manager = SecurityContextManager::new(keys, audit).with_ttl(Some(Duration::zero()));

        let ctx = manager
            .create("u1", "client-1", SecurityLevel::Standard, PrivilegeLevel::Public)
            .unwrap();
        assert!(ctx.expires_at.is_some());
        assert!(matches!(
            manager.lookup(&ctx.context_id),
            Err(EngineError::NotFound(_))
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_empty_user_rejected() {
        let (manager, _, _) = manager();
        assert!(matches!(
            manager.create("", "client-1", SecurityLevel::Standard, PrivilegeLevel::Public),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_purge_expired_sweeps_abandoned_contexts() {
        let (_, keys, audit) = manager();
        let manager = SecurityContextManager::new(keys, Arc::clone(&audit))
            .with_ttl(Some(Duration::zero()));

        for i in 0..50 {
            manager
                .create(&format!("u{}", i), "client-1", SecurityLevel::Standard, PrivilegeLevel::Public)
                .unwrap();
        }
        // Each create sweeps the contexts that expired before it.
        assert_eq!(manager.len(), 1);

        assert_eq!(manager.purge_expired().unwrap(), 1);
        assert!(manager.is_empty());
        assert_eq!(manager.purge_expired().unwrap(), 0);

        let swept = audit.entries_by_type(AuditEventType::ContextInvalidated);
        assert_eq!(swept.len(), 50);
        assert!(swept.iter().all(|e| e.details["reason"] == "expired"));
    }

    #[test]
    fn test_purge_without_ttl_keeps_contexts() {
        let (manager, _, audit) = manager();
        manager
            .create("u1", "client-1", SecurityLevel::Standard, PrivilegeLevel::Public)
            .unwrap();
        let before = audit.len();

        assert_eq!(manager.purge_expired().unwrap(), 0);
        assert_eq!(manager.len(), 1);
        assert_eq!(audit.len(), before);
    }

    #[test]
    fn test_create_for_revoked_client_denied() {
        let (manager, keys, _) = manager();
        manager
            .create("u1", "client-1", SecurityLevel::Standard, PrivilegeLevel::Public)
            .unwrap();
        keys.revoke("client-1").unwrap();

        let result =
            manager.create("u2", "client-1", SecurityLevel::Max, PrivilegeLevel::Public);
        assert!(result.unwrap_err().is_access_denied());
        assert!(!keys.contains("client-1"));
    }
}
