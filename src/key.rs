//! # Keys
//!
//! A [`Key`] is one of the fixed set of algorithms the `did:plc` method
//! accepts. secp256k1 keys act as rotation keys (they sign operations);
//! Ed25519 or secp256k1 keys can be published as verification methods.
//!
//! Public keys are exchanged as `did:key` multikeys: the multicodec-prefixed
//! public key, base58btc multibase encoded. Secret keys use the same scheme
//! with the private-key multicodecs so they can be persisted by a key store.
//!
//! See <https://w3c-ccg.github.io/did-method-key>

mod ed25519;
mod secp256k1;

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use multibase::Base;

use crate::{Error, Result};

/// Prefix of a `did:key` DID.
pub const DID_KEY_PREFIX: &str = "did:key:";

/// Key algorithms supported by the method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// secp256k1 ECDSA over SHA-256 (`ES256K`).
    Secp256k1,

    /// Ed25519 `EdDSA`.
    Ed25519,
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secp256k1 => write!(f, "secp256k1"),
            Self::Ed25519 => write!(f, "ed25519"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" | "es256k" | "k256" => Ok(Self::Secp256k1),
            "ed25519" | "eddsa" => Ok(Self::Ed25519),
            _ => Err(Error::Crypto(format!("unsupported key algorithm: {s}"))),
        }
    }
}

// Key material per algorithm. The signing half is absent for keys decoded
// from public multikeys.
#[derive(Clone)]
enum Material {
    Secp256k1 {
        verifying: k256::ecdsa::VerifyingKey,
        signing: Option<k256::ecdsa::SigningKey>,
    },
    Ed25519 {
        verifying: ed25519_dalek::VerifyingKey,
        signing: Option<ed25519_dalek::SigningKey>,
    },
}

/// An immutable cryptographic key: algorithm tag, public material and
/// (optionally) private material.
#[derive(Clone)]
pub struct Key {
    material: Material,
}

impl Key {
    /// Generate a new key pair.
    #[must_use]
    pub fn generate(algorithm: Algorithm) -> Self {
        let material = match algorithm {
            Algorithm::Secp256k1 => {
                let signing = secp256k1::generate();
                Material::Secp256k1 {
                    verifying: *signing.verifying_key(),
                    signing: Some(signing),
                }
            }
            Algorithm::Ed25519 => {
                let signing = ed25519::generate();
                Material::Ed25519 {
                    verifying: signing.verifying_key(),
                    signing: Some(signing),
                }
            }
        };
        Self { material }
    }

    /// The key's algorithm tag.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        match self.material {
            Material::Secp256k1 { .. } => Algorithm::Secp256k1,
            Material::Ed25519 { .. } => Algorithm::Ed25519,
        }
    }

    /// Returns `true` if the key holds private material and can sign.
    #[must_use]
    pub const fn has_secret(&self) -> bool {
        match &self.material {
            Material::Secp256k1 { signing, .. } => signing.is_some(),
            Material::Ed25519 { signing, .. } => signing.is_some(),
        }
    }

    /// A copy of this key without private material.
    #[must_use]
    pub fn public_key(&self) -> Self {
        let material = match &self.material {
            Material::Secp256k1 { verifying, .. } => Material::Secp256k1 {
                verifying: *verifying,
                signing: None,
            },
            Material::Ed25519 { verifying, .. } => Material::Ed25519 {
                verifying: *verifying,
                signing: None,
            },
        };
        Self { material }
    }

    /// Raw public key bytes (compressed SEC1 point for secp256k1).
    #[must_use]
    pub fn public_bytes(&self) -> Vec<u8> {
        match &self.material {
            Material::Secp256k1 { verifying, .. } => secp256k1::public_bytes(verifying),
            Material::Ed25519 { verifying, .. } => ed25519::public_bytes(verifying),
        }
    }

    /// Sign a message.
    ///
    /// secp256k1 keys sign the SHA-256 digest of the message with
    /// deterministic ECDSA; Ed25519 keys sign the raw message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the key holds no private material.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        match &self.material {
            Material::Secp256k1 { signing: Some(sk), .. } => Ok(secp256k1::sign(sk, msg)),
            Material::Ed25519 { signing: Some(sk), .. } => Ok(ed25519::sign(sk, msg)),
            _ => crate::tracerr!(
                Error::Crypto,
                "cannot sign with {} key: no private material",
                self.algorithm()
            ),
        }
    }

    /// Verify a signature over a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the signature is malformed or does not
    /// verify.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> Result<()> {
        match &self.material {
            Material::Secp256k1 { verifying, .. } => secp256k1::verify(verifying, msg, sig),
            Material::Ed25519 { verifying, .. } => ed25519::verify(verifying, msg, sig),
        }
    }

    /// Public key as a base58btc multikey (`z…`).
    #[must_use]
    pub fn public_multibase(&self) -> String {
        let codec = match self.algorithm() {
            Algorithm::Secp256k1 => secp256k1::PUBLIC_CODEC,
            Algorithm::Ed25519 => ed25519::PUBLIC_CODEC,
        };
        let mut bytes = codec.to_vec();
        bytes.extend_from_slice(&self.public_bytes());
        multibase::encode(Base::Base58Btc, bytes)
    }

    /// Public key as a `did:key` DID.
    #[must_use]
    pub fn to_did_key(&self) -> String {
        format!("{DID_KEY_PREFIX}{}", self.public_multibase())
    }

    /// Decode a public key from a `did:key` DID or a bare multikey.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the string is not base58btc multibase, the
    /// multicodec is not a supported public key type, or the key bytes are
    /// invalid.
    pub fn from_did_key(did_key: &str) -> Result<Self> {
        let multikey = did_key.strip_prefix(DID_KEY_PREFIX).unwrap_or(did_key);
        let bytes = decode_multikey(multikey)?;

        let material = if let Some(raw) = bytes.strip_prefix(&secp256k1::PUBLIC_CODEC) {
            Material::Secp256k1 {
                verifying: secp256k1::parse_public(raw)?,
                signing: None,
            }
        } else if let Some(raw) = bytes.strip_prefix(&ed25519::PUBLIC_CODEC) {
            Material::Ed25519 {
                verifying: ed25519::parse_public(raw)?,
                signing: None,
            }
        } else {
            return Err(Error::Crypto(format!("unsupported public key multicodec in {did_key}")));
        };
        Ok(Self { material })
    }

    /// Private key as a base58btc multibase string, for key storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the key holds no private material.
    pub fn secret_multibase(&self) -> Result<String> {
        let mut bytes = match &self.material {
            Material::Secp256k1 { signing: Some(sk), .. } => {
                [&secp256k1::SECRET_CODEC[..], &secp256k1::secret_bytes(sk)[..]].concat()
            }
            Material::Ed25519 { signing: Some(sk), .. } => {
                [&ed25519::SECRET_CODEC[..], &ed25519::secret_bytes(sk)[..]].concat()
            }
            _ => return Err(Error::Crypto("key has no private material".into())),
        };
        let encoded = multibase::encode(Base::Base58Btc, &bytes);
        bytes.fill(0);
        Ok(encoded)
    }

    /// Decode a private key previously produced by [`Key::secret_multibase`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the string is not a supported private
    /// multikey.
    pub fn from_secret_multibase(secret: &str) -> Result<Self> {
        let bytes = decode_multikey(secret)?;
        let material = if let Some(raw) = bytes.strip_prefix(&secp256k1::SECRET_CODEC) {
            let signing = secp256k1::parse_secret(raw)?;
            Material::Secp256k1 {
                verifying: *signing.verifying_key(),
                signing: Some(signing),
            }
        } else if let Some(raw) = bytes.strip_prefix(&ed25519::SECRET_CODEC) {
            let signing = ed25519::parse_secret(raw)?;
            Material::Ed25519 {
                verifying: signing.verifying_key(),
                signing: Some(signing),
            }
        } else {
            return Err(Error::Crypto("unsupported private key multicodec".into()));
        };
        Ok(Self { material })
    }
}

fn decode_multikey(multikey: &str) -> Result<Vec<u8>> {
    let (base, bytes) = multibase::decode(multikey)
        .map_err(|e| Error::Crypto(format!("invalid multibase key: {e}")))?;
    if base != Base::Base58Btc {
        return Err(Error::Crypto(format!("multikey must be base58btc encoded, got {base:?}")));
    }
    Ok(bytes)
}

// Equality is over algorithm and public material only.
impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm() == other.algorithm() && self.public_bytes() == other.public_bytes()
    }
}

impl Eq for Key {}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("algorithm", &self.algorithm())
            .field("public", &self.public_multibase())
            .field("has_secret", &self.has_secret())
            .finish()
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_did_key())
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_did_key(s)
    }
}
