// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the privilege engine.

use chrono::Duration;

use crate::audit::AuditSeverity;

use super::context::SecurityLevel;
use super::derivation::MIN_KDF_ITERATIONS;
use super::error::EngineError;

/// Fields the request/response codec encrypts by default.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "content",
    "document",
    "notes",
    "correspondence",
    "legal_advice",
    "strategy",
    "client_information",
];

/// Configuration for engine initialization.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Service name attached to audit log lines.
    pub service_name: String,
    /// PBKDF2 iteration count for per-client key derivation.
    pub kdf_iterations: u32,
    /// Lifetime of a security context (None = until invalidated).
    pub context_ttl: Option<Duration>,
    /// Minimum clearance a context needs to use the gateway.
    pub required_security_level: SecurityLevel,
    /// Minimum severity mirrored to the tracing audit target.
    pub audit_min_severity: AuditSeverity,
    /// Payload fields encrypted by the field codec.
    pub sensitive_fields: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "privilege-vault".to_string(),
            kdf_iterations: MIN_KDF_ITERATIONS,
            context_ttl: None,
            required_security_level: SecurityLevel::Standard,
            audit_min_severity: AuditSeverity::Info,
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Sets the service name used in audit log lines.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Sets the PBKDF2 iteration count.
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Expires security contexts `ttl` after creation.
    pub fn with_context_ttl(mut self, ttl: Duration) -> Self {
        self.context_ttl = Some(ttl);
        self
    }

    /// Sets the clearance required for gateway operations.
    pub fn with_required_security_level(mut self, level: SecurityLevel) -> Self {
        self.required_security_level = level;
        self
    }

    /// Sets the minimum severity mirrored to tracing.
    pub fn with_audit_min_severity(mut self, severity: AuditSeverity) -> Self {
        self.audit_min_severity = severity;
        self
    }

    /// Replaces the sensitive field list.
    pub fn with_sensitive_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the configuration before any component is built from it.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(EngineError::InvalidInput(format!(
                "kdf_iterations must be at least {}, got {}",
                MIN_KDF_ITERATIONS, self.kdf_iterations
            )));
        }
        if let Some(ttl) = self.context_ttl {
            if ttl < Duration::zero() {
                return Err(EngineError::InvalidInput(
                    "context_ttl must not be negative".into(),
                ));
            }
        }
        if self.service_name.is_empty() {
            return Err(EngineError::InvalidInput("service_name is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.kdf_iterations, 100_000);
        assert_eq!(config.sensitive_fields.len(), DEFAULT_SENSITIVE_FIELDS.len());
    }

    #[test]
    fn test_weak_kdf_rejected() {
        let config = EngineConfig::default().with_kdf_iterations(10_000);
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_negative_ttl_rejected() {
        let config = EngineConfig::default().with_context_ttl(Duration::seconds(-1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_service_name("matters")
            .with_required_security_level(SecurityLevel::Elevated)
            .with_sensitive_fields(["memo"]);

        assert_eq!(config.service_name, "matters");
        assert_eq!(config.required_security_level, SecurityLevel::Elevated);
        assert_eq!(config.sensitive_fields, vec!["memo".to_string()]);
    }
}
