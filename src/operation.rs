//! # Operations
//!
//! An operation is one entry in a `did:plc` identity's append-only log. Each
//! operation names its predecessor through `prev` (the CID of the previous
//! signed operation), so the log forms a hash chain.
//!
//! Operations are built with an [`OperationBuilder`], encoded canonically, and
//! signed by a rotation key to produce a [`SignedOperation`].
//!
//! See: <https://web.plc.directory/spec/v0.1/did-plc>

mod builder;
mod signed;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

pub use self::builder::OperationBuilder;
pub use self::signed::SignedOperation;
use crate::cbor::{self, Map, Value};
use crate::key::{Algorithm, Key};
use crate::{Error, Result};

/// Maximum size of an operation's canonical encoding, in bytes.
pub const MAX_OPERATION_SIZE: usize = 7500;

/// Maximum number of rotation keys.
pub const MAX_ROTATION_KEYS: usize = 5;

/// Maximum number of verification methods.
pub const MAX_VERIFICATION_METHODS: usize = 10;

/// Operation type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OperationType {
    /// Create or update (`plc_operation`).
    #[serde(rename = "plc_operation")]
    Operation,

    /// Permanent deactivation (`plc_tombstone`).
    #[serde(rename = "plc_tombstone")]
    Tombstone,

    /// Legacy genesis format (`create`). Readable, never constructed.
    #[serde(rename = "create")]
    Create,
}

impl OperationType {
    /// Wire name of the type tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Operation => "plc_operation",
            Self::Tombstone => "plc_tombstone",
            Self::Create => "create",
        }
    }
}

/// A service endpoint published by the identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Service {
    /// Service type, e.g. `AtprotoPersonalDataServer`.
    #[serde(rename = "type")]
    pub type_: String,

    /// Service endpoint URL.
    pub endpoint: String,
}

impl Service {
    /// Create a new service entry.
    pub fn new(type_: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            endpoint: endpoint.into(),
        }
    }

    fn to_cbor(&self) -> Map {
        let mut map = Map::new();
        map.insert("type", self.type_.as_str());
        map.insert("endpoint", self.endpoint.as_str());
        map
    }
}

/// An unsigned operation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Operation {
    /// Create or update.
    #[serde(rename = "plc_operation")]
    Plc(PlcOperation),

    /// Deactivation.
    #[serde(rename = "plc_tombstone")]
    Tombstone(Tombstone),

    /// Legacy genesis operation, only found in old logs.
    #[serde(rename = "create")]
    LegacyCreate(LegacyCreate),
}

/// Identity state carried by a create or update operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlcOperation {
    rotation_keys: Vec<String>,
    verification_methods: BTreeMap<String, String>,
    also_known_as: Vec<String>,
    services: BTreeMap<String, Service>,
    #[serde(deserialize_with = "explicit_prev")]
    prev: Option<String>,
}

impl PlcOperation {
    /// Rotation keys as `did:key` strings, highest authority first.
    #[must_use]
    pub fn rotation_keys(&self) -> &[String] {
        &self.rotation_keys
    }

    /// Verification methods: name to `did:key` string.
    #[must_use]
    pub const fn verification_methods(&self) -> &BTreeMap<String, String> {
        &self.verification_methods
    }

    /// Also-known-as URIs.
    #[must_use]
    pub fn also_known_as(&self) -> &[String] {
        &self.also_known_as
    }

    /// Services: name to service entry.
    #[must_use]
    pub const fn services(&self) -> &BTreeMap<String, Service> {
        &self.services
    }

    /// CID of the previous operation, or `None` for a genesis operation.
    #[must_use]
    pub fn prev(&self) -> Option<&str> {
        self.prev.as_deref()
    }

    fn to_cbor(&self) -> Map {
        let rotation_keys = self.rotation_keys.iter().map(|k| Value::from(k.as_str())).collect();
        let verification_methods = self
            .verification_methods
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect::<Map>();
        let also_known_as = self.also_known_as.iter().map(|a| Value::from(a.as_str())).collect();
        let services =
            self.services.iter().map(|(k, s)| (k.as_str(), s.to_cbor())).collect::<Map>();

        let mut map = Map::new();
        map.insert("type", OperationType::Operation.as_str());
        map.insert("rotationKeys", Value::Array(rotation_keys));
        map.insert("verificationMethods", verification_methods);
        map.insert("alsoKnownAs", Value::Array(also_known_as));
        map.insert("services", services);
        map.insert("prev", self.prev.as_deref());
        map
    }
}

// `prev` must be present: a genesis operation carries an explicit null.
fn explicit_prev<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Option::<String>::deserialize(deserializer)
}

/// Deactivation of an identity.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tombstone {
    prev: String,
}

impl Tombstone {
    /// CID of the operation being superseded.
    #[must_use]
    pub fn prev(&self) -> &str {
        &self.prev
    }
}

/// Legacy genesis operation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCreate {
    signing_key: String,
    recovery_key: String,
    handle: String,
    service: String,
    #[serde(deserialize_with = "explicit_prev")]
    prev: Option<String>,
}

impl LegacyCreate {
    /// Signing key as a `did:key` string.
    #[must_use]
    pub fn signing_key(&self) -> &str {
        &self.signing_key
    }

    /// Recovery key as a `did:key` string.
    #[must_use]
    pub fn recovery_key(&self) -> &str {
        &self.recovery_key
    }

    /// Handle, without the `at://` scheme.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Service endpoint URL.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Operation {
    /// The operation's type tag.
    #[must_use]
    pub const fn op_type(&self) -> OperationType {
        match self {
            Self::Plc(_) => OperationType::Operation,
            Self::Tombstone(_) => OperationType::Tombstone,
            Self::LegacyCreate(_) => OperationType::Create,
        }
    }

    /// CID of the previous operation, `None` for a genesis operation.
    #[must_use]
    pub fn prev(&self) -> Option<&str> {
        match self {
            Self::Plc(op) => op.prev.as_deref(),
            Self::Tombstone(op) => Some(&op.prev),
            Self::LegacyCreate(op) => op.prev.as_deref(),
        }
    }

    /// Returns `true` for the first operation in a log.
    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.prev().is_none()
    }

    /// Keys authorised to sign the *next* operation, highest authority first.
    #[must_use]
    pub fn rotation_keys(&self) -> Vec<&str> {
        match self {
            Self::Plc(op) => op.rotation_keys.iter().map(String::as_str).collect(),
            Self::Tombstone(_) => vec![],
            Self::LegacyCreate(op) => vec![op.recovery_key.as_str(), op.signing_key.as_str()],
        }
    }

    /// Create/update state, if this is a `plc_operation`.
    #[must_use]
    pub const fn as_plc(&self) -> Option<&PlcOperation> {
        match self {
            Self::Plc(op) => Some(op),
            _ => None,
        }
    }

    /// The operation's fields as a canonical map, keyed by wire field name.
    #[must_use]
    pub fn to_cbor(&self) -> Map {
        match self {
            Self::Plc(op) => op.to_cbor(),
            Self::Tombstone(op) => {
                let mut map = Map::new();
                map.insert("type", OperationType::Tombstone.as_str());
                map.insert("prev", op.prev.as_str());
                map
            }
            Self::LegacyCreate(op) => {
                let mut map = Map::new();
                map.insert("type", OperationType::Create.as_str());
                map.insert("signingKey", op.signing_key.as_str());
                map.insert("recoveryKey", op.recovery_key.as_str());
                map.insert("handle", op.handle.as_str());
                map.insert("service", op.service.as_str());
                map.insert("prev", op.prev.as_deref());
                map
            }
        }
    }

    /// Canonical binary encoding of the unsigned operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the encoding exceeds
    /// [`MAX_OPERATION_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_bounded(self.to_cbor())
    }

    /// Sign the operation with a rotation key.
    ///
    /// The signature covers [`Operation::encode`]. A genesis operation must be
    /// signed by one of its own rotation keys; later operations must be signed
    /// by a rotation key of the operation they supersede, which the directory
    /// checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for legacy operations, non-secp256k1
    /// signers, or a genesis signer outside the rotation keys;
    /// [`Error::Crypto`] when the key has no private material; and
    /// [`Error::Encoding`] if the signed operation exceeds the size limit.
    pub fn sign(&self, key: &Key) -> Result<SignedOperation> {
        if let Self::LegacyCreate(_) = self {
            crate::tracerr!(Error::Validation, "legacy create operations cannot be signed");
        }
        if key.algorithm() != Algorithm::Secp256k1 {
            crate::tracerr!(
                Error::Validation,
                "operations must be signed by a secp256k1 rotation key, got {}",
                key.algorithm()
            );
        }
        if self.is_genesis() {
            let did_key = key.to_did_key();
            if !self.rotation_keys().contains(&did_key.as_str()) {
                crate::tracerr!(
                    Error::Validation,
                    "genesis operation must be signed by one of its rotation keys"
                );
            }
        }

        let unsigned = self.encode()?;
        let sig = key.sign(&unsigned)?;
        let signed = SignedOperation::new(self.clone(), sig);

        // signature adds bytes: check the limit again
        signed.encode()?;
        tracing::debug!(op_type = self.op_type().as_str(), "signed operation");
        Ok(signed)
    }
}

pub(crate) fn encode_bounded(map: Map) -> Result<Vec<u8>> {
    let bytes = cbor::encode(&Value::Map(map))?;
    if bytes.len() > MAX_OPERATION_SIZE {
        crate::tracerr!(
            Error::Encoding,
            "operation is {} bytes, limit is {MAX_OPERATION_SIZE}",
            bytes.len()
        );
    }
    Ok(bytes)
}
