//! # Manager
//!
//! Create, update, rotate, deactivate and resolve workflows composed from the
//! operation model, the log client and a [`KeyStore`].
//!
//! The manager holds no per-identity state of its own. Operations for one
//! identity must still be run one at a time: each reads the directory's
//! current `prev` before building, and a concurrent writer surfaces as
//! [`Error::Conflict`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};

use crate::client::{HttpTransport, LogClient};
use crate::key::{Algorithm, Key};
use crate::log::{self, DocumentData, LogEntry};
use crate::operation::{OperationBuilder, OperationType, PlcOperation, Service, SignedOperation};
use crate::provider::{KeyStore, StoredKeys, Transport};
use crate::{Error, Result};

/// Name of the verification method the manager maintains.
pub const ATPROTO_VERIFICATION_METHOD: &str = "atproto";

/// Changes applied by [`Manager::update`]. Fields left as `None` keep their
/// current value.
#[derive(Clone, Debug, Default)]
pub struct UpdateRequest {
    /// Replacement also-known-as URIs.
    pub also_known_as: Option<Vec<String>>,

    /// Replacement services.
    pub services: Option<BTreeMap<String, Service>>,

    /// Generate a new `atproto` verification key.
    pub rotate_verification_key: bool,
}

/// In-process [`KeyStore`].
#[derive(Clone, Debug, Default)]
pub struct MemoryKeyStore {
    keys: Arc<Mutex<HashMap<String, StoredKeys>>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, did: &str) -> anyhow::Result<Option<StoredKeys>> {
        let keys = self.keys.lock().map_err(|_| anyhow!("key store lock poisoned"))?;
        Ok(keys.get(did).cloned())
    }

    fn put(&self, did: &str, keys: &StoredKeys) -> anyhow::Result<()> {
        let mut store = self.keys.lock().map_err(|_| anyhow!("key store lock poisoned"))?;
        store.insert(did.to_string(), keys.clone());
        Ok(())
    }
}

/// Identity lifecycle workflows.
#[derive(Clone, Debug)]
pub struct Manager<S, T = HttpTransport> {
    client: LogClient<T>,
    store: S,
}

impl<S: KeyStore, T: Transport> Manager<S, T> {
    /// Create a manager from a log client and key store.
    pub const fn new(client: LogClient<T>, store: S) -> Self {
        Self { client, store }
    }

    /// The underlying log client.
    pub const fn client(&self) -> &LogClient<T> {
        &self.client
    }

    /// Create a new identity with one secp256k1 rotation key and an Ed25519
    /// `atproto` verification key, returning its identifier.
    ///
    /// Keys are stored before the genesis operation is submitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for invalid URIs, [`Error::Crypto`] if
    /// the keys cannot be stored, and any error from submission.
    pub fn create(
        &self, also_known_as: &[String], services: &BTreeMap<String, Service>,
    ) -> Result<String> {
        let rotation = Key::generate(Algorithm::Secp256k1);
        let verification = Key::generate(Algorithm::Ed25519);

        let mut builder = OperationBuilder::new(OperationType::Operation)
            .rotation_key(&rotation)
            .verification_method(ATPROTO_VERIFICATION_METHOD, &verification)
            .genesis();
        for uri in also_known_as {
            builder = builder.also_known_as(uri.as_str());
        }
        for (name, service) in services {
            builder = builder.service(name.as_str(), service.clone());
        }

        let signed = builder.build()?.sign(&rotation)?;
        let did = signed.did()?;

        let keys = StoredKeys {
            rotation_keys: vec![rotation.secret_multibase()?],
            verification_key: verification.secret_multibase()?,
            ..StoredKeys::default()
        };
        self.save(&did, &keys)?;
        self.client.submit_create(&did, &signed)?;

        tracing::info!(%did, "created identity");
        Ok(did)
    }

    /// Apply `request` to the current state of `did`, signing with the
    /// stored highest-authority rotation key.
    ///
    /// A new verification key is stored as pending before the operation is
    /// submitted and promoted once the directory holds it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if no keys are stored for `did`,
    /// [`Error::Validation`] if the identity is deactivated, and
    /// [`Error::Conflict`] if the log moved on before submission.
    pub fn update(&self, did: &str, request: UpdateRequest) -> Result<()> {
        let mut keys = self.keys(did)?;
        let rotation = primary_rotation_key(&keys)?;
        let (head, state) = self.current_state(did)?;

        let mut builder = OperationBuilder::from_operation(&state).prev(head.cid);
        if let Some(also_known_as) = request.also_known_as {
            builder = builder.clear_also_known_as();
            for uri in also_known_as {
                builder = builder.also_known_as(uri);
            }
        }
        if let Some(services) = request.services {
            for name in state.services().keys() {
                builder = builder.remove_service(name);
            }
            for (name, service) in services {
                builder = builder.service(name, service);
            }
        }
        if request.rotate_verification_key {
            let key = Key::generate(Algorithm::Ed25519);
            builder = builder.verification_method(ATPROTO_VERIFICATION_METHOD, &key);
            keys.pending_verification_key = Some(key.secret_multibase()?);
        }

        let signed = builder.build()?.sign(&rotation)?;
        self.submit(did, &signed, keys)?;

        tracing::info!(did, "updated identity");
        Ok(())
    }

    /// Replace the stored highest-authority rotation key with a new one at
    /// the same rank.
    ///
    /// The new key is stored as pending before the operation is submitted.
    /// If the outcome is unknown (for example, the response was lost) the
    /// audited log decides whether the new key is promoted or discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if no keys are stored for `did`,
    /// [`Error::Validation`] if the stored key is no longer a rotation key of
    /// the identity, and [`Error::Conflict`] if the log moved on before
    /// submission.
    pub fn rotate(&self, did: &str) -> Result<()> {
        let mut keys = self.keys(did)?;
        let current = primary_rotation_key(&keys)?;
        let (head, state) = self.current_state(did)?;

        let did_key = current.to_did_key();
        if !state.rotation_keys().contains(&did_key) {
            crate::tracerr!(Error::Validation, "stored rotation key is not authorised for {did}");
        }

        let next = Key::generate(Algorithm::Secp256k1);
        let signed = OperationBuilder::from_operation(&state)
            .replace_rotation_key(&current, &next)
            .prev(head.cid)
            .build()?
            .sign(&current)?;
        keys.pending_rotation_key = Some(next.secret_multibase()?);
        self.submit(did, &signed, keys)?;

        tracing::info!(did, "rotated identity key");
        Ok(())
    }

    /// Permanently deactivate `did` with a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if no keys are stored for `did` and
    /// [`Error::Conflict`] if the log moved on before submission.
    pub fn deactivate(&self, did: &str) -> Result<()> {
        let keys = self.keys(did)?;
        let rotation = primary_rotation_key(&keys)?;
        let prev = self.client.current_prev(did)?;

        let signed =
            OperationBuilder::new(OperationType::Tombstone).prev(prev).build()?.sign(&rotation)?;
        self.submit(did, &signed, keys)?;

        tracing::info!(did, "deactivated identity");
        Ok(())
    }

    /// The current identity state for `did`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the directory cannot be reached or does
    /// not know `did`.
    pub fn resolve(&self, did: &str) -> Result<DocumentData> {
        self.client.fetch_data(did)
    }

    // Head of the audited log and the identity state it carries.
    fn current_state(&self, did: &str) -> Result<(LogEntry, PlcOperation)> {
        let entries = self.client.fetch_audited_log(did)?;
        let Some(head) = log::head(&entries).cloned() else {
            crate::tracerr!(Error::Validation, "no active operations in log for {did}");
        };
        let Some(state) = head.operation.operation().as_plc().cloned() else {
            crate::tracerr!(Error::Validation, "{did} is deactivated or uses a legacy operation");
        };
        Ok((head, state))
    }

    // Submit an update. Pending keys are stored first and promoted once the
    // directory accepts the operation. When submission fails the audited log
    // settles them: a rejected operation never installed them, while a lost
    // response may hide an accepted one.
    fn submit(&self, did: &str, op: &SignedOperation, keys: StoredKeys) -> Result<()> {
        if !keys.has_pending() {
            return self.client.submit_update(did, op);
        }
        self.save(did, &keys)?;

        match self.client.submit_update(did, op) {
            Ok(()) => self.save(did, &promote(keys)),
            Err(err) => match self.reconcile(did, keys) {
                Ok((_, true)) => {
                    tracing::warn!(did, "operation was accepted despite error: {err}");
                    Ok(())
                }
                Ok((_, false)) => Err(err),
                Err(e) => {
                    tracing::warn!(did, "pending keys left unsettled: {e}");
                    Err(err)
                }
            },
        }
    }

    // Stored keys for `did`, settling any left pending by an interrupted
    // workflow.
    fn keys(&self, did: &str) -> Result<StoredKeys> {
        let keys = self.load(did)?;
        if !keys.has_pending() {
            return Ok(keys);
        }
        Ok(self.reconcile(did, keys)?.0)
    }

    // Promote the pending keys the directory's current state holds and
    // discard the rest. Also reports whether anything was promoted.
    fn reconcile(&self, did: &str, mut keys: StoredKeys) -> Result<(StoredKeys, bool)> {
        let (_, state) = self.current_state(did)?;
        let mut promoted = false;

        if let Some(pending) = keys.pending_rotation_key.take() {
            let did_key = Key::from_secret_multibase(&pending)?.to_did_key();
            if state.rotation_keys().contains(&did_key) {
                set_primary_rotation_key(&mut keys, pending);
                promoted = true;
            }
        }
        if let Some(pending) = keys.pending_verification_key.take() {
            let did_key = Key::from_secret_multibase(&pending)?.to_did_key();
            if state.verification_methods().get(ATPROTO_VERIFICATION_METHOD) == Some(&did_key) {
                keys.verification_key = pending;
                promoted = true;
            }
        }

        self.save(did, &keys)?;
        tracing::info!(did, promoted, "settled pending keys");
        Ok((keys, promoted))
    }

    fn load(&self, did: &str) -> Result<StoredKeys> {
        let keys = self
            .store
            .get(did)
            .with_context(|| format!("reading keys for {did}"))
            .map_err(|e| Error::Crypto(format!("{e:#}")))?;
        let Some(keys) = keys else {
            crate::tracerr!(Error::Crypto, "no keys stored for {did}");
        };
        Ok(keys)
    }

    fn save(&self, did: &str, keys: &StoredKeys) -> Result<()> {
        self.store
            .put(did, keys)
            .with_context(|| format!("storing keys for {did}"))
            .map_err(|e| Error::Crypto(format!("{e:#}")))
    }
}

// Swap pending keys in for the ones they replace.
fn promote(mut keys: StoredKeys) -> StoredKeys {
    if let Some(next) = keys.pending_rotation_key.take() {
        set_primary_rotation_key(&mut keys, next);
    }
    if let Some(next) = keys.pending_verification_key.take() {
        keys.verification_key = next;
    }
    keys
}

fn set_primary_rotation_key(keys: &mut StoredKeys, secret: String) {
    match keys.rotation_keys.first_mut() {
        Some(first) => *first = secret,
        None => keys.rotation_keys.push(secret),
    }
}

fn primary_rotation_key(keys: &StoredKeys) -> Result<Key> {
    let Some(secret) = keys.rotation_keys.first() else {
        crate::tracerr!(Error::Crypto, "no rotation key stored");
    };
    Key::from_secret_multibase(secret)
}
