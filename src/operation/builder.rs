//! Builder for create, update and tombstone operations.

use std::collections::{BTreeMap, HashSet};

use super::{
    MAX_ROTATION_KEYS, MAX_VERIFICATION_METHODS, Operation, OperationType, PlcOperation, Service,
    Tombstone,
};
use crate::key::{Algorithm, Key};
use crate::{Error, Result, hash};

/// Builder for an unsigned [`Operation`].
///
/// The predecessor must always be stated explicitly: call [`genesis`] for the
/// first operation in a log, or [`prev`] with the CID of the operation being
/// superseded. Building with neither is an error so a genesis operation is
/// never produced by accident.
///
/// [`genesis`]: OperationBuilder::genesis
/// [`prev`]: OperationBuilder::prev
#[derive(Clone, Debug)]
pub struct OperationBuilder {
    op_type: OperationType,
    rotation_keys: Vec<String>,
    verification_methods: BTreeMap<String, String>,
    also_known_as: Vec<String>,
    services: BTreeMap<String, Service>,

    // unset, explicitly genesis, or a predecessor
    prev: Option<Option<String>>,
}

impl OperationBuilder {
    /// Start an empty operation of the given type.
    #[must_use]
    pub const fn new(op_type: OperationType) -> Self {
        Self {
            op_type,
            rotation_keys: vec![],
            verification_methods: BTreeMap::new(),
            also_known_as: vec![],
            services: BTreeMap::new(),
            prev: None,
        }
    }

    /// Start an update from the state carried by an existing operation.
    ///
    /// The predecessor is left unset: call [`OperationBuilder::prev`] with
    /// the CID of the operation being superseded.
    #[must_use]
    pub fn from_operation(op: &PlcOperation) -> Self {
        Self {
            op_type: OperationType::Operation,
            rotation_keys: op.rotation_keys.clone(),
            verification_methods: op.verification_methods.clone(),
            also_known_as: op.also_known_as.clone(),
            services: op.services.clone(),
            prev: None,
        }
    }

    /// Append a rotation key. Keys are ordered by authority, highest first.
    #[must_use]
    pub fn rotation_key(mut self, key: &Key) -> Self {
        self.rotation_keys.push(key.to_did_key());
        self
    }

    /// Replace all rotation keys.
    #[must_use]
    pub fn rotation_keys(mut self, keys: &[Key]) -> Self {
        self.rotation_keys = keys.iter().map(Key::to_did_key).collect();
        self
    }

    /// Put `new` in place of `old`, keeping its authority rank. Has no effect
    /// if `old` is not a rotation key.
    #[must_use]
    pub fn replace_rotation_key(mut self, old: &Key, new: &Key) -> Self {
        let old = old.to_did_key();
        if let Some(slot) = self.rotation_keys.iter_mut().find(|k| **k == old) {
            *slot = new.to_did_key();
        }
        self
    }

    /// Remove all rotation keys.
    #[must_use]
    pub fn clear_rotation_keys(mut self) -> Self {
        self.rotation_keys.clear();
        self
    }

    /// Add or replace a named verification method (e.g. `atproto`).
    #[must_use]
    pub fn verification_method(mut self, name: impl Into<String>, key: &Key) -> Self {
        self.verification_methods.insert(name.into(), key.to_did_key());
        self
    }

    /// Remove a named verification method.
    #[must_use]
    pub fn remove_verification_method(mut self, name: &str) -> Self {
        self.verification_methods.remove(name);
        self
    }

    /// Append an also-known-as URI (e.g. `at://alice.example.com`).
    #[must_use]
    pub fn also_known_as(mut self, uri: impl Into<String>) -> Self {
        self.also_known_as.push(uri.into());
        self
    }

    /// Remove all also-known-as URIs.
    #[must_use]
    pub fn clear_also_known_as(mut self) -> Self {
        self.also_known_as.clear();
        self
    }

    /// Add or replace a named service (e.g. `atproto_pds`).
    #[must_use]
    pub fn service(mut self, name: impl Into<String>, service: Service) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    /// Remove a named service.
    #[must_use]
    pub fn remove_service(mut self, name: &str) -> Self {
        self.services.remove(name);
        self
    }

    /// Mark the operation as the first in its log (`prev` is null).
    #[must_use]
    pub fn genesis(mut self) -> Self {
        self.prev = Some(None);
        self
    }

    /// Set the CID of the operation being superseded.
    #[must_use]
    pub fn prev(mut self, cid: impl Into<String>) -> Self {
        self.prev = Some(Some(cid.into()));
        self
    }

    /// Validate and build the operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the predecessor is unset, a
    /// cardinality limit is exceeded, rotation keys are duplicated or not
    /// secp256k1, a URI does not parse, or a tombstone carries identity
    /// state. Returns [`Error::Crypto`] if a key cannot be decoded and
    /// [`Error::Encoding`] if the operation exceeds the size limit.
    pub fn build(self) -> Result<Operation> {
        let Some(prev) = self.prev else {
            crate::tracerr!(
                Error::Validation,
                "predecessor not set: call `genesis()` or `prev(cid)`"
            );
        };
        if let Some(cid) = &prev {
            if !hash::is_cid(cid) {
                crate::tracerr!(Error::Validation, "invalid prev CID: {cid}");
            }
        }

        let op = match self.op_type {
            OperationType::Create => {
                crate::tracerr!(Error::Validation, "legacy create operations cannot be built");
            }
            OperationType::Tombstone => {
                let Some(prev) = prev else {
                    crate::tracerr!(Error::Validation, "a tombstone must reference a predecessor");
                };
                if !self.rotation_keys.is_empty()
                    || !self.verification_methods.is_empty()
                    || !self.also_known_as.is_empty()
                    || !self.services.is_empty()
                {
                    crate::tracerr!(Error::Validation, "a tombstone carries no identity state");
                }
                Operation::Tombstone(Tombstone { prev })
            }
            OperationType::Operation => {
                validate_rotation_keys(&self.rotation_keys)?;
                validate_verification_methods(&self.verification_methods)?;
                for uri in &self.also_known_as {
                    parse_uri(uri)?;
                }
                for service in self.services.values() {
                    parse_uri(&service.endpoint)?;
                }
                Operation::Plc(PlcOperation {
                    rotation_keys: self.rotation_keys,
                    verification_methods: self.verification_methods,
                    also_known_as: self.also_known_as,
                    services: self.services,
                    prev,
                })
            }
        };

        op.encode()?;
        Ok(op)
    }
}

fn validate_rotation_keys(keys: &[String]) -> Result<()> {
    if keys.is_empty() || keys.len() > MAX_ROTATION_KEYS {
        crate::tracerr!(
            Error::Validation,
            "expected 1 to {MAX_ROTATION_KEYS} rotation keys, got {}",
            keys.len()
        );
    }

    let mut seen = HashSet::new();
    for did_key in keys {
        let key = Key::from_did_key(did_key)?;
        if key.algorithm() != Algorithm::Secp256k1 {
            crate::tracerr!(
                Error::Validation,
                "rotation keys must be secp256k1, got {} for {did_key}",
                key.algorithm()
            );
        }
        if !seen.insert(did_key.as_str()) {
            crate::tracerr!(Error::Validation, "duplicate rotation key: {did_key}");
        }
    }
    Ok(())
}

fn validate_verification_methods(methods: &BTreeMap<String, String>) -> Result<()> {
    if methods.len() > MAX_VERIFICATION_METHODS {
        crate::tracerr!(
            Error::Validation,
            "at most {MAX_VERIFICATION_METHODS} verification methods allowed, got {}",
            methods.len()
        );
    }
    for (name, did_key) in methods {
        if name.is_empty() {
            crate::tracerr!(Error::Validation, "verification method name is empty");
        }
        Key::from_did_key(did_key)?;
    }
    Ok(())
}

fn parse_uri(uri: &str) -> Result<()> {
    url::Url::parse(uri).map_err(|e| Error::Validation(format!("invalid URI {uri}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation() -> Key {
        Key::generate(Algorithm::Secp256k1)
    }

    #[test]
    fn predecessor_required() {
        let result =
            OperationBuilder::new(OperationType::Operation).rotation_key(&rotation()).build();
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn rotation_key_limits() {
        let none = OperationBuilder::new(OperationType::Operation).genesis().build();
        assert!(matches!(none, Err(Error::Validation(_))));

        let keys: Vec<Key> = (0..=MAX_ROTATION_KEYS).map(|_| rotation()).collect();
        let too_many = OperationBuilder::new(OperationType::Operation)
            .rotation_keys(&keys)
            .genesis()
            .build();
        assert!(matches!(too_many, Err(Error::Validation(_))));

        let max = OperationBuilder::new(OperationType::Operation)
            .rotation_keys(&keys[..MAX_ROTATION_KEYS])
            .genesis()
            .build()
            .expect("should build");
        assert_eq!(max.rotation_keys().len(), MAX_ROTATION_KEYS);

        let key = rotation();
        let dup = OperationBuilder::new(OperationType::Operation)
            .rotation_key(&key)
            .rotation_key(&key)
            .genesis()
            .build();
        assert!(matches!(dup, Err(Error::Validation(_))));

        let ed = OperationBuilder::new(OperationType::Operation)
            .rotation_key(&Key::generate(Algorithm::Ed25519))
            .genesis()
            .build();
        assert!(matches!(ed, Err(Error::Validation(_))));
    }

    #[test]
    fn verification_method_limit() {
        let mut builder =
            OperationBuilder::new(OperationType::Operation).rotation_key(&rotation()).genesis();
        for i in 0..MAX_VERIFICATION_METHODS {
            let key = Key::generate(Algorithm::Ed25519);
            builder = builder.verification_method(format!("vm{i}"), &key);
        }
        builder.clone().build().expect("should build at the limit");

        let over =
            builder.verification_method("extra", &Key::generate(Algorithm::Ed25519)).build();
        assert!(matches!(over, Err(Error::Validation(_))));
    }

    #[test]
    fn uris_validated() {
        let bad_aka = OperationBuilder::new(OperationType::Operation)
            .rotation_key(&rotation())
            .also_known_as("not a uri")
            .genesis()
            .build();
        assert!(matches!(bad_aka, Err(Error::Validation(_))));

        let bad_endpoint = OperationBuilder::new(OperationType::Operation)
            .rotation_key(&rotation())
            .service("atproto_pds", Service::new("AtprotoPersonalDataServer", "pds"))
            .genesis()
            .build();
        assert!(matches!(bad_endpoint, Err(Error::Validation(_))));
    }

    #[test]
    fn size_limit() {
        let mut builder =
            OperationBuilder::new(OperationType::Operation).rotation_key(&rotation()).genesis();
        for i in 0..100 {
            let label = "a".repeat(60) + &i.to_string();
            builder = builder.also_known_as(format!("at://{label}.example.com"));
        }
        assert!(matches!(builder.build(), Err(Error::Encoding(_))));
    }

    #[test]
    fn tombstone() {
        let key = rotation();
        let genesis = OperationBuilder::new(OperationType::Operation)
            .rotation_key(&key)
            .genesis()
            .build()
            .expect("should build")
            .sign(&key)
            .expect("should sign");
        let cid = genesis.cid().expect("should hash");

        let no_prev = OperationBuilder::new(OperationType::Tombstone).genesis().build();
        assert!(matches!(no_prev, Err(Error::Validation(_))));

        let with_state = OperationBuilder::new(OperationType::Tombstone)
            .rotation_key(&key)
            .prev(&cid)
            .build();
        assert!(matches!(with_state, Err(Error::Validation(_))));

        let bad_cid = OperationBuilder::new(OperationType::Tombstone).prev("bafyrei-nope").build();
        assert!(matches!(bad_cid, Err(Error::Validation(_))));

        let op = OperationBuilder::new(OperationType::Tombstone)
            .prev(&cid)
            .build()
            .expect("should build");
        assert_eq!(op.op_type(), OperationType::Tombstone);
        assert_eq!(op.prev(), Some(cid.as_str()));
        assert_eq!(op.to_cbor().canonical_keys(), vec!["prev", "type"]);
    }

    #[test]
    fn update_from_existing() {
        let key = rotation();
        let genesis = OperationBuilder::new(OperationType::Operation)
            .rotation_key(&key)
            .also_known_as("at://alice.example.com")
            .service(
                "atproto_pds",
                Service::new("AtprotoPersonalDataServer", "https://pds.example.com"),
            )
            .genesis()
            .build()
            .expect("should build");
        let signed = genesis.sign(&key).expect("should sign");
        let state = signed.operation().as_plc().expect("should be a plc operation");

        let update = OperationBuilder::from_operation(state)
            .clear_also_known_as()
            .also_known_as("at://alice.example.org")
            .prev(signed.cid().expect("should hash"))
            .build()
            .expect("should build");
        let plc = update.as_plc().expect("should be a plc operation");
        assert_eq!(plc.also_known_as(), ["at://alice.example.org"]);
        assert_eq!(plc.services(), state.services());
        assert!(!update.is_genesis());

        let next = rotation();
        let rotated = OperationBuilder::from_operation(state)
            .replace_rotation_key(&key, &next)
            .prev(signed.cid().expect("should hash"))
            .build()
            .expect("should build");
        assert_eq!(rotated.rotation_keys(), vec![next.to_did_key().as_str()]);

        // an update with no predecessor is rejected
        let unset = OperationBuilder::from_operation(state).build();
        assert!(matches!(unset, Err(Error::Validation(_))));
    }
}
