// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Wire representation of one encrypted value.
//!
//! # Format
//!
//! ```text
//! {
//!   "ciphertext":      base64,
//!   "auth_tag":        base64 (16 bytes),
//!   "iv":              base64 (12 bytes),
//!   "algorithm_id":    "AES-256-GCM",
//!   "client_id":       string,
//!   "privilege_level": "public" | "confidential" | "attorney_client" | "work_product",
//!   "created_at":      ISO-8601 UTC,
//!   "associated_data": base64 (canonical JSON of the three fields above)
//! }
//! ```
//!
//! The associated data is not secret. It is bound to the ciphertext by the
//! AEAD tag and re-derived from the cleartext metadata on every decryption.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::context::PrivilegeLevel;
use super::error::EngineError;

/// Algorithm identifier carried by every envelope.
pub const ALGORITHM_AES_256_GCM: &str = "AES-256-GCM";

/// An authenticated ciphertext and the metadata it is bound to.
///
/// Envelopes are immutable; re-encryption produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    #[serde(with = "base64_bytes")]
    ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    auth_tag: Vec<u8>,
    #[serde(with = "base64_bytes")]
    iv: Vec<u8>,
    algorithm_id: String,
    client_id: String,
    privilege_level: PrivilegeLevel,
    created_at: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    associated_data: Vec<u8>,
}

impl EncryptedEnvelope {
    pub(crate) fn new(
        ciphertext: Vec<u8>,
        auth_tag: Vec<u8>,
        iv: Vec<u8>,
        client_id: String,
        privilege_level: PrivilegeLevel,
        created_at: DateTime<Utc>,
        associated_data: Vec<u8>,
    ) -> Self {
        Self {
            ciphertext,
            auth_tag,
            iv,
            algorithm_id: ALGORITHM_AES_256_GCM.to_string(),
            client_id,
            privilege_level,
            created_at,
            associated_data,
        }
    }

    /// Parses an envelope from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses an envelope from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EngineError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Serializes the envelope to JSON.
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serializes the envelope to a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::to_value(self)?)
    }

    /// The encrypted bytes, without tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// The AEAD authentication tag.
    pub fn auth_tag(&self) -> &[u8] {
        &self.auth_tag
    }

    /// The initialization vector used for this value only.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// The algorithm identifier.
    pub fn algorithm_id(&self) -> &str {
        &self.algorithm_id
    }

    /// The client this value belongs to.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The classification of this value.
    pub fn privilege_level(&self) -> PrivilegeLevel {
        self.privilege_level
    }

    /// When this value was encrypted.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The associated data stored alongside the ciphertext.
    pub fn associated_data(&self) -> &[u8] {
        &self.associated_data
    }

    #[cfg(test)]
    pub(crate) fn fields_mut(&mut self) -> EnvelopeFieldsMut<'_> {
        EnvelopeFieldsMut {
            ciphertext: &mut self.ciphertext,
            auth_tag: &mut self.auth_tag,
            iv: &mut self.iv,
            algorithm_id: &mut self.algorithm_id,
            client_id: &mut self.client_id,
            privilege_level: &mut self.privilege_level,
            associated_data: &mut self.associated_data,
        }
    }
}

#[cfg(test)]
pub(crate) struct EnvelopeFieldsMut<'a> {
    pub ciphertext: &'a mut Vec<u8>,
    pub auth_tag: &'a mut Vec<u8>,
    pub iv: &'a mut Vec<u8>,
    pub algorithm_id: &'a mut String,
    pub client_id: &'a mut String,
    pub privilege_level: &'a mut PrivilegeLevel,
    pub associated_data: &'a mut Vec<u8>,
}

#[derive(Serialize)]
struct AssociatedData<'a> {
    client_id: &'a str,
    privilege_level: PrivilegeLevel,
    timestamp: String,
}

/// Canonical associated data for `{client_id, privilege_level, created_at}`.
///
/// Field order and timestamp precision are fixed, so equal inputs always
/// encode to identical bytes.
pub fn canonical_associated_data(
    client_id: &str,
    privilege_level: PrivilegeLevel,
    created_at: DateTime<Utc>,
) -> Result<Vec<u8>, EngineError> {
    Ok(serde_json::to_vec(&AssociatedData {
        client_id,
        privilege_level,
        timestamp: created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    })?)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_associated_data_is_canonical() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        let aad = canonical_associated_data("client-1", PrivilegeLevel::AttorneyClient, at).unwrap();

        assert_eq!(
            String::from_utf8(aad).unwrap(),
            r#"{"client_id":"client-1","privilege_level":"attorney_client","timestamp":"2025-03-01T12:30:00.000000Z"}"#
        );
    }

    #[test]
    fn test_json_uses_base64() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        let envelope = EncryptedEnvelope::new(
            vec![0xde, 0xad],
            vec![0u8; 16],
            vec![1u8; 12],
            "client-1".into(),
            PrivilegeLevel::WorkProduct,
            at,
            b"aad".to_vec(),
        );

        let value = envelope.to_value().unwrap();
        assert_eq!(value["ciphertext"], "3q0=");
        assert_eq!(value["iv"], "AQEBAQEBAQEBAQEB");
        assert_eq!(value["algorithm_id"], "AES-256-GCM");
        assert_eq!(value["privilege_level"], "work_product");
        assert_eq!(value["created_at"], "2025-03-01T12:30:00Z");

        let parsed = EncryptedEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_bad_base64_rejected() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        let envelope = EncryptedEnvelope::new(
            vec![1],
            vec![0u8; 16],
            vec![1u8; 12],
            "client-1".into(),
            PrivilegeLevel::Public,
            at,
            Vec::new(),
        );
        let mut value = envelope.to_value().unwrap();
        value["iv"] = serde_json::Value::String("not base64!".into());

        assert!(matches!(
            EncryptedEnvelope::from_value(value),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
