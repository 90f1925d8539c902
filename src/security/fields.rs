// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Payload field encryption for request and response bodies.
//!
//! A configured field `notes` is replaced by `notes_encrypted`, holding the
//! envelope's JSON form. Decryption reverses the rename. Values that are not
//! strings are encrypted as their JSON text and come back as that text.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::context::SecurityContext;
use super::envelope::EncryptedEnvelope;
use super::error::EngineError;
use super::gateway::EncryptionGateway;

/// Suffix marking an encrypted field.
pub const ENCRYPTED_SUFFIX: &str = "_encrypted";

/// Encrypts and decrypts sensitive fields of JSON objects.
#[derive(Clone)]
pub struct FieldCodec {
    gateway: Arc<EncryptionGateway>,
    fields: Arc<[String]>,
}

impl FieldCodec {
    /// Creates a codec for the gateway's configured sensitive fields.
    pub fn new(gateway: Arc<EncryptionGateway>) -> Self {
        let fields = gateway.config().sensitive_fields.clone().into();
        Self { gateway, fields }
    }

    /// Creates a codec for an explicit field list.
    pub fn with_fields<I, S>(gateway: Arc<EncryptionGateway>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gateway,
            fields: fields.into_iter().map(Into::<String>::into).collect(),
        }
    }

    /// The fields this codec encrypts.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Encrypts every configured field present in `data`.
    ///
    /// Empty values (null, `""`, `[]`, `{}`) are left as they are. Values are
    /// encrypted for the context's own client at its privilege level.
    pub fn encrypt_fields(
        &self,
        context: &SecurityContext,
        data: &Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let mut out = data.clone();

        for field in self.fields.iter() {
            let Some(value) = data.get(field) else {
                continue;
            };
            if is_empty(value) {
                continue;
            }

            let plaintext = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let envelope = self.gateway.encrypt_for(
                context,
                &context.client_id,
                plaintext.as_bytes(),
                context.privilege_level,
            )?;

            out.remove(field);
            out.insert(format!("{field}{ENCRYPTED_SUFFIX}"), envelope.to_value()?);
        }

        debug!(client_id = %context.client_id, "Encrypted payload fields");
        Ok(out)
    }

    /// Decrypts every `*_encrypted` field in `data`.
    pub fn decrypt_fields(
        &self,
        context: &SecurityContext,
        data: &Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let mut out = data.clone();

        for (key, value) in data {
            let Some(field) = key.strip_suffix(ENCRYPTED_SUFFIX) else {
                continue;
            };
            if field.is_empty() {
                continue;
            }

            let envelope = EncryptedEnvelope::from_value(value.clone())?;
            let plaintext = self
                .gateway
                .decrypt_for(context, &context.client_id, &envelope)?;
            let text = String::from_utf8(plaintext).map_err(|_| {
                EngineError::InvalidInput(format!("field {} is not valid UTF-8", field))
            })?;

            out.remove(key);
            out.insert(field.to_string(), Value::String(text));
        }

        debug!(client_id = %context.client_id, "Decrypted payload fields");
        Ok(out)
    }

    /// Async form of [`encrypt_fields`](Self::encrypt_fields) for request bodies.
    ///
    /// Runs on the blocking pool; dropping the future does not interrupt an
    /// encryption and its audit entry half way.
    pub async fn encrypt_request(
        &self,
        context: SecurityContext,
        data: Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let codec = self.clone();
        tokio::task::spawn_blocking(move || codec.encrypt_fields(&context, &data))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?
    }

    /// Async form of [`decrypt_fields`](Self::decrypt_fields) for response bodies.
    pub async fn decrypt_response(
        &self,
        context: SecurityContext,
        data: Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let codec = self.clone();
        tokio::task::spawn_blocking(move || codec.decrypt_fields(&context, &data))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
