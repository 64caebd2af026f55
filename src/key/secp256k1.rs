//! secp256k1 (ES256K) key material.
//!
//! Messages are hashed with SHA-256 and signed with deterministic (RFC 6979)
//! ECDSA. Signatures are compact 64-byte `r || s` with low-S normalisation.

use k256::ecdsa::signature::{Signer as _, Verifier as _};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::{Error, Result};

/// Varint-encoded multicodec `secp256k1-pub` (0xe7).
pub const PUBLIC_CODEC: [u8; 2] = [0xe7, 0x01];

/// Varint-encoded multicodec `secp256k1-priv` (0x1301).
pub const SECRET_CODEC: [u8; 2] = [0x81, 0x26];

/// Length of a compressed SEC1 public key.
pub const PUBLIC_KEY_LENGTH: usize = 33;

pub fn generate() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

/// Compressed SEC1 encoding of the public key.
pub fn public_bytes(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

pub fn secret_bytes(key: &SigningKey) -> Vec<u8> {
    key.to_bytes().to_vec()
}

pub fn parse_public(bytes: &[u8]) -> Result<VerifyingKey> {
    if bytes.len() != PUBLIC_KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "secp256k1 public key must be {PUBLIC_KEY_LENGTH} bytes (compressed), got {}",
            bytes.len()
        )));
    }
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|e| Error::Crypto(format!("invalid secp256k1 public key: {e}")))
}

pub fn parse_secret(bytes: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(bytes)
        .map_err(|e| Error::Crypto(format!("invalid secp256k1 secret key: {e}")))
}

pub fn sign(key: &SigningKey, msg: &[u8]) -> Vec<u8> {
    let sig: Signature = key.sign(msg);
    // k256 already emits low-S, normalise anyway so the invariant is local
    let sig = sig.normalize_s().unwrap_or(sig);
    sig.to_bytes().to_vec()
}

pub fn verify(key: &VerifyingKey, msg: &[u8], sig: &[u8]) -> Result<()> {
    let sig = Signature::from_slice(sig)
        .map_err(|e| Error::Crypto(format!("invalid secp256k1 signature: {e}")))?;
    if sig.normalize_s().is_some() {
        return Err(Error::Crypto("secp256k1 signature is not low-S".into()));
    }
    key.verify(msg, &sig).map_err(|_| Error::Crypto("signature verification failed".into()))
}
