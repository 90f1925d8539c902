// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Cross-client access checks.
//!
//! Every denial is written to the audit chain as a `privilege_violation`
//! before the caller sees it.

use std::sync::Arc;

use tracing::error;

use crate::audit::{AuditChain, AuditEventType, AuditRecord};

use super::context::{SecurityContext, SecurityLevel};
use super::error::EngineError;

/// Checks that an operation stays inside its caller's client.
pub struct PrivilegeAccessValidator {
    audit: Arc<AuditChain>,
}

impl PrivilegeAccessValidator {
    /// Creates a validator recording violations in `audit`.
    pub fn new(audit: Arc<AuditChain>) -> Self {
        Self { audit }
    }

    /// Returns true iff `context` belongs to `requested_client_id`.
    ///
    /// A mismatch is audited. If the audit append itself fails the answer is
    /// still `false`.
    pub fn check(&self, context: &SecurityContext, requested_client_id: &str) -> bool {
        if context.client_id == requested_client_id {
            return true;
        }

        self.record_violation(
            context,
            AuditRecord::new(AuditEventType::PrivilegeViolation, context.user_id.as_str())
                .with_client(requested_client_id)
                .with_session(context.session_id.as_str())
                .with_detail("reason", "cross_client_access")
                .with_detail("context_client_id", context.client_id.as_str())
                .with_detail("requested_client_id", requested_client_id),
        );
        false
    }

    /// Error-returning form of [`check`](Self::check).
    pub fn ensure(
        &self,
        context: &SecurityContext,
        requested_client_id: &str,
    ) -> Result<(), EngineError> {
        if self.check(context, requested_client_id) {
            Ok(())
        } else {
            Err(EngineError::AccessDenied(format!(
                "user {} may not access client {} from a context for client {}",
                context.user_id, requested_client_id, context.client_id
            )))
        }
    }

    /// Requires the context's clearance to be at least `required`.
    pub fn ensure_clearance(
        &self,
        context: &SecurityContext,
        required: SecurityLevel,
    ) -> Result<(), EngineError> {
        if context.security_level.satisfies(required) {
            return Ok(());
        }

        self.record_violation(
            context,
            AuditRecord::new(AuditEventType::PrivilegeViolation, context.user_id.as_str())
                .with_client(context.client_id.as_str())
                .with_session(context.session_id.as_str())
                .with_detail("reason", "insufficient_clearance")
                .with_detail("security_level", context.security_level.as_str())
                .with_detail("required_security_level", required.as_str()),
        );
        Err(EngineError::AccessDenied(format!(
            "user {} holds {} clearance, {} required",
            context.user_id, context.security_level, required
        )))
    }

    /// Records a denial that was detected elsewhere, such as a revoked context
    /// or an envelope addressed to another client.
    pub fn deny(
        &self,
        context: &SecurityContext,
        requested_client_id: &str,
        reason: &str,
    ) -> EngineError {
        self.record_violation(
            context,
            AuditRecord::new(AuditEventType::PrivilegeViolation, context.user_id.as_str())
                .with_client(requested_client_id)
                .with_session(context.session_id.as_str())
                .with_detail("reason", reason)
                .with_detail("context_client_id", context.client_id.as_str())
                .with_detail("requested_client_id", requested_client_id),
        );
        EngineError::AccessDenied(format!(
            "user {} denied access to client {}: {}",
            context.user_id, requested_client_id, reason
        ))
    }

    fn record_violation(&self, context: &SecurityContext, record: AuditRecord) {
        if let Err(e) = self.audit.append(record) {
            error!(
                user_id = %context.user_id,
                client_id = %context.client_id,
                error = %e,
                "Failed to record privilege violation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::context::PrivilegeLevel;
    use chrono::Utc;

    fn context(client_id: &str, level: SecurityLevel) -> SecurityContext {
        SecurityContext {
            context_id: "ctx-1".into(),
            user_id: "u1".into(),
            client_id: client_id.into(),
            session_id: "session-1".into(),
            security_level: level,
            privilege_level: PrivilegeLevel::AttorneyClient,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_matching_client_allowed_without_audit() {
        let audit = Arc::new(AuditChain::new());
        let validator = PrivilegeAccessValidator::new(Arc::clone(&audit));

        assert!(validator.check(&context("client-a", SecurityLevel::Standard), "client-a"));
        assert!(audit.is_empty());
    }

    #[test]
    fn test_cross_client_denied_and_audited() {
        let audit = Arc::new(AuditChain::new());
        let validator = PrivilegeAccessValidator::new(Arc::clone(&audit));
        let ctx = context("client-a", SecurityLevel::Max);

        let result = validator.ensure(&ctx, "client-b");
        assert!(matches!(result, Err(EngineError::AccessDenied(_))));

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.event_type, AuditEventType::PrivilegeViolation);
        assert_eq!(entry.user_id, "u1");
        assert_eq!(entry.details["context_client_id"], "client-a");
        assert_eq!(entry.details["requested_client_id"], "client-b");
    }

    #[test]
    fn test_clearance() {
        let audit = Arc::new(AuditChain::new());
        let validator = PrivilegeAccessValidator::new(Arc::clone(&audit));

        assert!(validator
            .ensure_clearance(&context("client-a", SecurityLevel::Max), SecurityLevel::Elevated)
            .is_ok());
        assert!(validator
            .ensure_clearance(
                &context("client-a", SecurityLevel::Standard),
                SecurityLevel::Elevated
            )
            .unwrap_err()
            .is_access_denied());
        assert_eq!(audit.len(), 1);
        assert_eq!(audit.entries()[0].details["reason"], "insufficient_clearance");
    }
}
