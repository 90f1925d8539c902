// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-client cryptographic isolation.
//!
//! Every client gets its own AES-256 key, derived with PBKDF2-HMAC-SHA256
//! from per-client secret material. Values are sealed with AES-256-GCM and
//! bound to `{client_id, privilege_level, created_at}` as associated data, so
//! one client's key can never open another client's data.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      EncryptionGateway                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │   Context    │  │  Privilege   │  │   Authenticated    │  │
//! │  │   Manager    │  │  Validator   │  │      Cipher        │  │
//! │  └──────┬───────┘  └──────┬───────┘  └─────────┬──────────┘  │
//! │         │                 │                    │             │
//! │  ┌──────┴───────┐         │          ┌─────────┴──────────┐  │
//! │  │  Client Key  │         │          │  EncryptedEnvelope │  │
//! │  │    Store     │         │          │  (AES-256-GCM)     │  │
//! │  └──────┬───────┘         │          └────────────────────┘  │
//! └─────────┼─────────────────┼──────────────────────────────────┘
//!           │                 │
//!    ┌──────┴──────┐   ┌──────┴──────┐
//!    │ SecretStore │   │ AuditChain  │
//!    └─────────────┘   └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use privilege_vault::security::{
//!     EncryptionGateway, EngineConfig, PrivilegeLevel, SecurityLevel,
//! };
//!
//! let gateway = EncryptionGateway::new(EngineConfig::default()).unwrap();
//! let ctx = gateway
//!     .create_context("attorney-1", "client-1", SecurityLevel::Elevated, PrivilegeLevel::AttorneyClient)
//!     .unwrap();
//!
//! let envelope = gateway
//!     .encrypt_for(&ctx, "client-1", b"privileged note", PrivilegeLevel::AttorneyClient)
//!     .unwrap();
//! let plaintext = gateway.decrypt_for(&ctx, "client-1", &envelope).unwrap();
//!
//! assert_eq!(plaintext, b"privileged note");
//! assert!(gateway.verify_audit_chain().valid);
//! ```

mod cipher;
mod config;
mod context;
mod derivation;
mod envelope;
mod error;
mod fields;
mod gateway;
mod keystore;
mod validator;

pub use cipher::{AuthenticatedCipher, AES_GCM_NONCE_SIZE, AES_GCM_TAG_SIZE};
pub use config::{EngineConfig, DEFAULT_SENSITIVE_FIELDS};
pub use context::{PrivilegeLevel, SecurityContext, SecurityContextManager, SecurityLevel};
pub use derivation::{
    client_salt, KeyDerivation, MIN_KDF_ITERATIONS, MIN_SECRET_LEN, SECRET_MATERIAL_SIZE,
};
pub use envelope::{canonical_associated_data, EncryptedEnvelope, ALGORITHM_AES_256_GCM};
pub use error::EngineError;
pub use fields::{FieldCodec, ENCRYPTED_SUFFIX};
pub use gateway::{EncryptionGateway, RequestStage};
pub use keystore::{
    ClientKey, ClientKeyStore, InMemorySecretStore, SecretMaterial, SecretStore,
    AES_256_KEY_SIZE, SYSTEM_ACTOR,
};
pub use validator::PrivilegeAccessValidator;
