//! Signed operations.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{Operation, encode_bounded};
use crate::cbor::Map;
use crate::key::Key;
use crate::{Error, Result, hash, identifier};

/// An [`Operation`] together with a signature over its canonical encoding.
///
/// In JSON the signature is the base64url (unpadded) `sig` field; in the
/// canonical binary form it is a byte string under the same key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedOperation {
    operation: Operation,
    sig: Vec<u8>,
}

impl SignedOperation {
    pub(super) const fn new(operation: Operation, sig: Vec<u8>) -> Self {
        Self { operation, sig }
    }

    /// The unsigned operation.
    #[must_use]
    pub const fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Raw signature bytes.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.sig
    }

    /// Signature as unpadded base64url.
    #[must_use]
    pub fn signature_base64(&self) -> String {
        Base64UrlUnpadded::encode_string(&self.sig)
    }

    /// The signed operation's fields as a canonical map.
    #[must_use]
    pub fn to_cbor(&self) -> Map {
        let mut map = self.operation.to_cbor();
        map.insert("sig", self.sig.clone());
        map
    }

    /// Canonical binary encoding, including the signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the encoding exceeds the size limit.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_bounded(self.to_cbor())
    }

    /// Content identifier of this signed operation: the value a successor
    /// operation carries as `prev`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the operation cannot be encoded.
    pub fn cid(&self) -> Result<String> {
        hash::cid(&self.encode()?)
    }

    /// The `did:plc` identifier derived from this (genesis) operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the operation is not a genesis
    /// operation.
    pub fn did(&self) -> Result<String> {
        identifier::derive(self)
    }

    /// Verify the signature against a set of rotation keys (`did:key`
    /// strings, highest authority first), returning the index of the key that
    /// produced it.
    ///
    /// Keys that cannot be decoded (for example, algorithms outside the
    /// supported set) are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the signature is empty and
    /// [`Error::Crypto`] if no rotation key verifies it.
    pub fn verify<S: AsRef<str>>(&self, rotation_keys: &[S]) -> Result<usize> {
        if self.sig.is_empty() {
            crate::tracerr!(Error::Validation, "operation is not signed");
        }
        let unsigned = self.operation.encode()?;

        for (index, did_key) in rotation_keys.iter().enumerate() {
            let key = match Key::from_did_key(did_key.as_ref()) {
                Ok(key) => key,
                Err(e) => {
                    tracing::debug!("skipping rotation key {}: {e}", did_key.as_ref());
                    continue;
                }
            };
            if key.verify(&unsigned, &self.sig).is_ok() {
                return Ok(index);
            }
        }
        Err(Error::Crypto("signature does not match any rotation key".into()))
    }

    /// Verify a genesis operation against its own rotation keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the operation is not a genesis
    /// operation or is unsigned, and [`Error::Crypto`] if the signature does
    /// not verify.
    pub fn verify_genesis(&self) -> Result<usize> {
        if !self.operation.is_genesis() {
            crate::tracerr!(Error::Validation, "operation is not a genesis operation");
        }
        self.verify(&self.operation.rotation_keys())
    }
}

impl Serialize for SignedOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut value = serde_json::to_value(&self.operation).map_err(ser::Error::custom)?;
        let JsonValue::Object(fields) = &mut value else {
            return Err(ser::Error::custom("operation did not serialize to an object"));
        };
        fields.insert("sig".into(), JsonValue::String(self.signature_base64()));
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SignedOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut value = JsonValue::deserialize(deserializer)?;
        let JsonValue::Object(fields) = &mut value else {
            return Err(de::Error::custom("signed operation must be a JSON object"));
        };

        // a missing signature is kept as empty and fails verification
        let sig = match fields.remove("sig") {
            Some(JsonValue::String(sig)) => Base64UrlUnpadded::decode_vec(&sig)
                .map_err(|e| de::Error::custom(format!("invalid base64url signature: {e}")))?,
            Some(JsonValue::Null) | None => vec![],
            Some(other) => {
                return Err(de::Error::custom(format!("signature must be a string, got {other}")));
            }
        };
        let operation = serde_json::from_value(value).map_err(de::Error::custom)?;
        Ok(Self { operation, sig })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cbor::{self, Value};
    use crate::key::Algorithm;
    use crate::operation::{OperationBuilder, OperationType};

    fn signed() -> (Key, SignedOperation) {
        let rotation = Key::generate(Algorithm::Secp256k1);
        let op = OperationBuilder::new(OperationType::Operation)
            .rotation_key(&rotation)
            .verification_method("atproto", &Key::generate(Algorithm::Ed25519))
            .also_known_as("at://bob.example.com")
            .genesis()
            .build()
            .expect("should build");
        let signed = op.sign(&rotation).expect("should sign");
        (rotation, signed)
    }

    #[test]
    fn json_round_trip() {
        let (_, signed) = signed();
        let value = serde_json::to_value(&signed).expect("should serialize");
        let sig = value["sig"].as_str().expect("sig should be a string");
        assert!(!sig.contains(['+', '/', '=']));
        assert_eq!(Base64UrlUnpadded::decode_vec(sig).expect("should decode"), signed.signature());

        let parsed: SignedOperation = serde_json::from_value(value).expect("should deserialize");
        assert_eq!(parsed, signed);
        parsed.verify_genesis().expect("should verify");
    }

    #[test]
    fn binary_sig_is_bytes() {
        let (_, signed) = signed();
        let bytes = signed.encode().expect("should encode");
        let Value::Map(map) = cbor::decode(&bytes).expect("should decode") else {
            panic!("should be a map");
        };
        assert_eq!(map.get("sig"), Some(&Value::Bytes(signed.signature().to_vec())));
        assert_eq!(map.canonical_keys()[0], "sig");
    }

    #[test]
    fn missing_or_empty_sig() {
        let (_, signed) = signed();
        let mut value = serde_json::to_value(&signed).expect("should serialize");
        value.as_object_mut().expect("object").remove("sig");
        let unsigned: SignedOperation = serde_json::from_value(value).expect("should deserialize");
        assert!(matches!(unsigned.verify_genesis(), Err(Error::Validation(_))));

        let mut value = serde_json::to_value(&signed).expect("should serialize");
        value["sig"] = json!("");
        let empty: SignedOperation = serde_json::from_value(value).expect("should deserialize");
        assert!(matches!(empty.verify_genesis(), Err(Error::Validation(_))));
    }

    #[test]
    fn tampered_fails() {
        let (_, signed) = signed();
        let mut value = serde_json::to_value(&signed).expect("should serialize");
        value["alsoKnownAs"] = json!(["at://mallory.example.com"]);
        let tampered: SignedOperation = serde_json::from_value(value).expect("should deserialize");
        assert!(matches!(tampered.verify_genesis(), Err(Error::Crypto(_))));
    }

    #[test]
    fn authority_index() {
        let (rotation, signed) = signed();
        let other = Key::generate(Algorithm::Secp256k1);
        let keys = [other.to_did_key(), "did:key:zUnsupported".to_string(), rotation.to_did_key()];
        assert_eq!(signed.verify(&keys).expect("should verify"), 2);
        assert!(signed.verify(&keys[..2]).is_err());
    }

    #[test]
    fn cid_is_stable() {
        let (_, signed) = signed();
        let cid = signed.cid().expect("should hash");
        assert!(cid.starts_with("bafyrei"));
        assert_eq!(signed.clone().cid().expect("should hash"), cid);
    }
}
