// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-client key issuance, lookup and revocation.
//!
//! The store caches derived keys in memory. Only the secret material a key
//! was derived from is handed to the [`SecretStore`], so a restarted process
//! rebuilds identical keys instead of losing access to existing ciphertext.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::json;
use tracing::{debug, error, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::audit::{AuditChain, AuditEventType, AuditRecord};

use super::derivation::{KeyDerivation, SECRET_MATERIAL_SIZE};
use super::error::EngineError;

/// Size of AES-256 keys in bytes.
pub const AES_256_KEY_SIZE: usize = 32;

/// Actor recorded for operations not attributed to a user.
pub const SYSTEM_ACTOR: &str = "system";

/// Secret material a client key is derived from.
pub type SecretMaterial = Zeroizing<Vec<u8>>;

/// A derived per-client encryption key.
///
/// Key bytes are zeroized on drop and redacted from `Debug` output.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ClientKey {
    key: [u8; AES_256_KEY_SIZE],
    #[zeroize(skip)]
    client_id: String,
    #[zeroize(skip)]
    created_at: DateTime<Utc>,
}

impl ClientKey {
    /// Creates a key for `client_id` from raw key material.
    pub fn new(client_id: impl Into<String>, key: [u8; AES_256_KEY_SIZE]) -> Self {
        Self {
            key,
            client_id: client_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Creates a key from a slice, checking its length.
    pub fn from_slice(client_id: impl Into<String>, bytes: &[u8]) -> Result<Self, EngineError> {
        let key: [u8; AES_256_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| EngineError::InvalidKeyLength {
                    expected: AES_256_KEY_SIZE,
                    got: bytes.len(),
                })?;
        Ok(Self::new(client_id, key))
    }

    /// Returns the key material.
    #[inline]
    pub fn key(&self) -> &[u8; AES_256_KEY_SIZE] {
        &self.key
    }

    /// Returns the owning client.
    #[inline]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns when this key was derived.
    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl std::fmt::Debug for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKey")
            .field("client_id", &self.client_id)
            .field("created_at", &self.created_at)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Durable, access-controlled storage for per-client secret material.
///
/// The engine depends only on these three operations. Issuance calls `get`
/// and `put` holding only a per-client slot; revocation calls `get` inside the
/// key table's write lock, so implementations must not block for long.
pub trait SecretStore: Send + Sync {
    /// Returns the secret material for `client_id`, if any.
    fn get(&self, client_id: &str) -> Result<Option<SecretMaterial>, EngineError>;

    /// Stores secret material for `client_id`, replacing any previous value.
    fn put(&self, client_id: &str, secret: &[u8]) -> Result<(), EngineError>;

    /// Deletes the secret material for `client_id`. Returns whether it existed.
    fn delete(&self, client_id: &str) -> Result<bool, EngineError>;
}

/// In-process [`SecretStore`]. Contents are lost when the process exits.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<String, SecretMaterial>>,
}

impl InMemorySecretStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of clients with stored material.
    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    /// Returns true if no material is stored.
    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, client_id: &str) -> Result<Option<SecretMaterial>, EngineError> {
        Ok(self.secrets.read().get(client_id).cloned())
    }

    fn put(&self, client_id: &str, secret: &[u8]) -> Result<(), EngineError> {
        self.secrets
            .write()
            .insert(client_id.to_string(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn delete(&self, client_id: &str) -> Result<bool, EngineError> {
        Ok(self.secrets.write().remove(client_id).is_some())
    }
}

#[derive(Default)]
struct KeyTable {
    active: HashMap<String, Arc<ClientKey>>,
    revoked: HashSet<String>,
}

/// Holds the active key of every client.
///
/// Revoked clients are remembered for the lifetime of the store and can
/// never be issued a key again.
pub struct ClientKeyStore {
    table: RwLock<KeyTable>,
    issuing: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    secrets: Arc<dyn SecretStore>,
    kdf: KeyDerivation,
    rng: SystemRandom,
    audit: Arc<AuditChain>,
}

impl ClientKeyStore {
    /// Creates a key store over the given secret store and audit chain.
    pub fn new(secrets: Arc<dyn SecretStore>, kdf: KeyDerivation, audit: Arc<AuditChain>) -> Self {
        Self {
            table: RwLock::new(KeyTable::default()),
            issuing: Mutex::new(HashMap::new()),
            secrets,
            kdf,
            rng: SystemRandom::new(),
            audit,
        }
    }

    /// Issues a key for `client_id`, or returns the one already issued.
    pub fn issue(&self, client_id: &str) -> Result<Arc<ClientKey>, EngineError> {
        self.issue_as(SYSTEM_ACTOR, client_id)
    }

    /// Issues a key for `client_id` on behalf of `actor`.
    ///
    /// Only a newly issued key produces a `key_issued` audit entry. A revoked
    /// client is refused with `AccessDenied`, audited as a violation.
    ///
    /// Derivation runs outside the key table lock. Concurrent issuance for
    /// one client is serialized on a per-client slot.
    pub fn issue_as(&self, actor: &str, client_id: &str) -> Result<Arc<ClientKey>, EngineError> {
        if client_id.is_empty() {
            return Err(EngineError::InvalidInput("client_id is empty".into()));
        }
        if let Some(key) = self.active_or_denied(actor, client_id)? {
            return Ok(key);
        }

        let slot = self.acquire_slot(client_id);
        let result = {
            let _guard = slot.lock();
            self.issue_in_slot(actor, client_id)
        };
        self.release_slot(client_id, slot);
        result
    }

    fn issue_in_slot(&self, actor: &str, client_id: &str) -> Result<Arc<ClientKey>, EngineError> {
        if let Some(key) = self.active_or_denied(actor, client_id)? {
            return Ok(key);
        }

        let (secret, generated) = match self.secrets.get(client_id)? {
            Some(secret) => (secret, false),
            None => {
                let mut fresh = Zeroizing::new(vec![0u8; SECRET_MATERIAL_SIZE]);
                self.rng.fill(fresh.as_mut_slice()).map_err(|_| {
                    EngineError::Crypto("failed to generate client secret".into())
                })?;
                self.secrets.put(client_id, &fresh)?;
                (fresh, true)
            }
        };

        let derived = match self.kdf.derive(client_id, &secret) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) => {
                self.discard_secret(client_id, generated);
                return Err(e);
            }
        };

        let mut table = self.table.write();
        // Revoked while deriving; the revocation already deleted the material.
        if table.revoked.contains(client_id) {
            drop(table);
            return Err(self.deny_revoked(actor, client_id));
        }

        let source = if generated { "generated" } else { "secret_store" };
        let appended = self.audit.append(
            AuditRecord::new(AuditEventType::KeyIssued, actor)
                .with_client(client_id)
                .with_details(json!({
                    "source": source,
                    "kdf_iterations": self.kdf.iterations(),
                })),
        );
        if let Err(e) = appended {
            drop(table);
            self.discard_secret(client_id, generated);
            return Err(e);
        }

        let key = Arc::new(ClientKey::new(client_id, *derived));
        table.active.insert(client_id.to_string(), Arc::clone(&key));
        debug!(client_id = %client_id, generated, "Issued client key");
        Ok(key)
    }

    /// Returns the active key for `client_id`.
    pub fn get(&self, client_id: &str) -> Result<Arc<ClientKey>, EngineError> {
        self.table
            .read()
            .active
            .get(client_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no key issued for client {}", client_id)))
    }

    /// Returns true if a key is active for `client_id`.
    pub fn contains(&self, client_id: &str) -> bool {
        self.table.read().active.contains_key(client_id)
    }

    /// Returns true if `client_id` has been revoked.
    pub fn is_revoked(&self, client_id: &str) -> bool {
        self.table.read().revoked.contains(client_id)
    }

    /// Revokes the key of `client_id`.
    pub fn revoke(&self, client_id: &str) -> Result<(), EngineError> {
        self.revoke_as(SYSTEM_ACTOR, client_id)
    }

    /// Revokes the key of `client_id` on behalf of `actor`.
    ///
    /// Deletes both the cached key and its secret material. Irreversible: the
    /// client is marked revoked before the material is deleted, so a failed
    /// deletion cannot bring the key back. Calling again retries a deletion
    /// that failed.
    pub fn revoke_as(&self, actor: &str, client_id: &str) -> Result<(), EngineError> {
        let mut table = self.table.write();

        if table.revoked.contains(client_id) {
            drop(table);
            return if self.secrets.delete(client_id)? {
                Ok(())
            } else {
                Err(EngineError::NotFound(format!(
                    "client {} is already revoked",
                    client_id
                )))
            };
        }

        let cached = table.active.contains_key(client_id);
        let stored = self.secrets.get(client_id)?.is_some();
        if !cached && !stored {
            return Err(EngineError::NotFound(format!(
                "no key issued for client {}",
                client_id
            )));
        }

        self.audit.append(
            AuditRecord::new(AuditEventType::KeyRevoked, actor).with_client(client_id),
        )?;

        table.revoked.insert(client_id.to_string());
        table.active.remove(client_id);
        drop(table);

        if let Err(e) = self.secrets.delete(client_id) {
            warn!(client_id = %client_id, error = %e, "Revoked client secret not deleted");
            return Err(e);
        }
        Ok(())
    }

    /// Returns the number of active keys.
    pub fn len(&self) -> usize {
        self.table.read().active.len()
    }

    /// Returns true if no key is active.
    pub fn is_empty(&self) -> bool {
        self.table.read().active.is_empty()
    }

    fn active_or_denied(
        &self,
        actor: &str,
        client_id: &str,
    ) -> Result<Option<Arc<ClientKey>>, EngineError> {
        let table = self.table.read();
        if table.revoked.contains(client_id) {
            drop(table);
            return Err(self.deny_revoked(actor, client_id));
        }
        Ok(table.active.get(client_id).cloned())
    }

    fn deny_revoked(&self, actor: &str, client_id: &str) -> EngineError {
        let record = AuditRecord::new(AuditEventType::PrivilegeViolation, actor)
            .with_client(client_id)
            .with_detail("reason", "client_revoked");
        if let Err(e) = self.audit.append(record) {
            error!(client_id = %client_id, error = %e, "Failed to record privilege violation");
        }
        EngineError::AccessDenied(format!("client {} has been revoked", client_id))
    }

    fn discard_secret(&self, client_id: &str, generated: bool) {
        if !generated {
            return;
        }
        if let Err(e) = self.secrets.delete(client_id) {
            warn!(client_id = %client_id, error = %e, "Failed to discard unissued client secret");
        }
    }

    fn acquire_slot(&self, client_id: &str) -> Arc<Mutex<()>> {
        let mut issuing = self.issuing.lock();
        Arc::clone(issuing.entry(client_id.to_string()).or_default())
    }

    fn release_slot(&self, client_id: &str, slot: Arc<Mutex<()>>) {
        let mut issuing = self.issuing.lock();
        // Only the map and this caller still hold the slot.
        if Arc::strong_count(&slot) <= 2 {
            issuing.remove(client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEventType;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    /// Secret store whose deletes fail while `failing` is set.
    #[derive(Default)]
    struct FlakyDeleteStore {
        inner: InMemorySecretStore,
        failing: AtomicBool,
    }

    impl SecretStore for FlakyDeleteStore {
        fn get(&self, client_id: &str) -> Result<Option<SecretMaterial>, EngineError> {
            self.inner.get(client_id)
        }

        fn put(&self, client_id: &str, secret: &[u8]) -> Result<(), EngineError> {
            self.inner.put(client_id, secret)
        }

        fn delete(&self, client_id: &str) -> Result<bool, EngineError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(EngineError::Storage("secret backend down".into()));
            }
            self.inner.delete(client_id)
        }
    }

    /// Secret store that parks lookups of `gated_client` until released.
    struct GatedStore {
        inner: InMemorySecretStore,
        gated_client: &'static str,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl SecretStore for GatedStore {
        fn get(&self, client_id: &str) -> Result<Option<SecretMaterial>, EngineError> {
            if client_id == self.gated_client {
                self.entered.lock().send(()).unwrap();
                self.release.lock().recv().unwrap();
            }
            self.inner.get(client_id)
        }

        fn put(&self, client_id: &str, secret: &[u8]) -> Result<(), EngineError> {
            self.inner.put(client_id, secret)
        }

        fn delete(&self, client_id: &str) -> Result<bool, EngineError> {
            self.inner.delete(client_id)
        }
    }

    fn store() -> (ClientKeyStore, Arc<InMemorySecretStore>, Arc<AuditChain>) {
        let secrets = Arc::new(InMemorySecretStore::new());
        let audit = Arc::new(AuditChain::new());
        let store = ClientKeyStore::new(
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            KeyDerivation::default(),
            Arc::clone(&audit),
        );
        (store, secrets, audit)
    }

    #[test]
    fn test_issue_is_idempotent() {
        let (store, _, audit) = store();
        let k1 = store.issue("client-1").unwrap();
        let k2 = store.issue("client-1").unwrap();

        assert_eq!(k1.key(), k2.key());
        assert_eq!(audit.len(), 1);
        assert_eq!(audit.entries()[0].event_type, AuditEventType::KeyIssued);
    }

    #[test]
    fn test_issue_persists_secret_material() {
        let (store, secrets, _) = store();
        store.issue("client-1").unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(
            secrets.get("client-1").unwrap().unwrap().len(),
            SECRET_MATERIAL_SIZE
        );
    }

    #[test]
    fn test_key_rebuilt_from_secret_store() {
        let secrets = Arc::new(InMemorySecretStore::new());
        let first = ClientKeyStore::new(
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            KeyDerivation::default(),
            Arc::new(AuditChain::new()),
        );
        let original = *first.issue("client-1").unwrap().key();
        drop(first);

        let restarted = ClientKeyStore::new(
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            KeyDerivation::default(),
            Arc::new(AuditChain::new()),
        );
        assert!(restarted.get("client-1").is_err());
        let rebuilt = restarted.issue("client-1").unwrap();
        assert_eq!(rebuilt.key(), &original);
    }

    #[test]
    fn test_distinct_clients_get_distinct_keys() {
        let (store, _, _) = store();
        let a = store.issue("client-a").unwrap();
        let b = store.issue("client-b").unwrap();
        assert_ne!(a.key(), b.key());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_get_unknown_client() {
        let (store, _, _) = store();
        assert!(matches!(store.get("nobody"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_revoke_removes_key_and_secret() {
        let (store, secrets, audit) = store();
        store.issue("client-1").unwrap();
        store.revoke("client-1").unwrap();

        assert!(matches!(store.get("client-1"), Err(EngineError::NotFound(_))));
        assert!(secrets.is_empty());
        assert_eq!(audit.entries()[1].event_type, AuditEventType::KeyRevoked);
    }

    #[test]
    fn test_revoke_unknown_client() {
        let (store, _, audit) = store();
        assert!(matches!(
            store.revoke("nobody"),
            Err(EngineError::NotFound(_))
        ));
        assert!(audit.is_empty());
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let (store, _, _) = store();
        assert!(matches!(store.issue(""), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_from_slice_checks_length() {
        let result = ClientKey::from_slice("client-1", &[0u8; 16]);
        assert!(matches!(
            result,
            Err(EngineError::InvalidKeyLength {
                expected: 32,
                got: 16
            })
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = ClientKey::new("client-1", [42u8; AES_256_KEY_SIZE]);
        let debug = format!("{:?}", key);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("42, 42"));
    }

    #[test]
    fn test_concurrent_issue_yields_one_key() {
        let (store, _, audit) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || *store.issue("client-1").unwrap().key())
            })
            .collect();
        let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_issue_after_revoke_denied() {
        let (store, secrets, audit) = store();
        store.issue("client-1").unwrap();
        store.revoke("client-1").unwrap();

        assert!(store.is_revoked("client-1"));
        assert!(store.issue("client-1").unwrap_err().is_access_denied());
        assert!(store
            .issue_as("u1", "client-1")
            .unwrap_err()
            .is_access_denied());
        assert!(matches!(store.get("client-1"), Err(EngineError::NotFound(_))));
        assert!(secrets.is_empty());

        let violations = audit.entries_by_type(AuditEventType::PrivilegeViolation);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[1].user_id, "u1");
        assert_eq!(violations[1].details["reason"], "client_revoked");
        assert_eq!(audit.entries_by_type(AuditEventType::KeyIssued).len(), 1);
    }

    #[test]
    fn test_failed_secret_delete_keeps_client_revoked() {
        let secrets = Arc::new(FlakyDeleteStore::default());
        let audit = Arc::new(AuditChain::new());
        let store = ClientKeyStore::new(
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
            KeyDerivation::default(),
            Arc::clone(&audit),
        );
        store.issue("client-1").unwrap();

        secrets.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            store.revoke("client-1"),
            Err(EngineError::Storage(_))
        ));
        assert!(store.is_revoked("client-1"));
        assert!(secrets.inner.get("client-1").unwrap().is_some());

        assert!(store.issue("client-1").unwrap_err().is_access_denied());
        assert!(matches!(store.get("client-1"), Err(EngineError::NotFound(_))));

        secrets.failing.store(false, Ordering::SeqCst);
        store.revoke("client-1").unwrap();
        assert!(secrets.inner.is_empty());
        assert!(matches!(
            store.revoke("client-1"),
            Err(EngineError::NotFound(_))
        ));

        let events: Vec<_> = audit.entries().iter().map(|e| e.event_type).collect();
        assert_eq!(
            events,
            vec![
                AuditEventType::KeyIssued,
                AuditEventType::KeyRevoked,
                AuditEventType::PrivilegeViolation,
            ]
        );
    }

    #[test]
    fn test_pending_issue_does_not_block_other_clients() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let secrets = Arc::new(GatedStore {
            inner: InMemorySecretStore::new(),
            gated_client: "slow",
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let store = Arc::new(ClientKeyStore::new(
            secrets as Arc<dyn SecretStore>,
            KeyDerivation::default(),
            Arc::new(AuditChain::new()),
        ));
        let fast = store.issue("fast").unwrap();

        let pending = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.issue("slow").map(|k| *k.key()))
        };
        entered_rx.recv().unwrap();

        assert_eq!(store.get("fast").unwrap().key(), fast.key());
        assert!(store.issue("other").is_ok());
        assert!(!store.contains("slow"));

        release_tx.send(()).unwrap();
        let slow = pending.join().unwrap().unwrap();
        assert_eq!(store.get("slow").unwrap().key(), &slow);
        assert_eq!(store.len(), 3);
    }
}
