//! Ed25519 (`EdDSA`) key material. Raw messages are signed per RFC 8032.

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::{Error, Result};

/// Varint-encoded multicodec `ed25519-pub` (0xed).
pub const PUBLIC_CODEC: [u8; 2] = [0xed, 0x01];

/// Varint-encoded multicodec `ed25519-priv` (0x1300).
pub const SECRET_CODEC: [u8; 2] = [0x80, 0x26];

pub fn generate() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn public_bytes(key: &VerifyingKey) -> Vec<u8> {
    key.as_bytes().to_vec()
}

pub fn secret_bytes(key: &SigningKey) -> Vec<u8> {
    key.to_bytes().to_vec()
}

pub fn parse_public(bytes: &[u8]) -> Result<VerifyingKey> {
    let bytes: [u8; ed25519_dalek::PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
        Error::Crypto(format!(
            "ed25519 public key must be {} bytes, got {}",
            ed25519_dalek::PUBLIC_KEY_LENGTH,
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| Error::Crypto(format!("invalid ed25519 public key: {e}")))
}

pub fn parse_secret(bytes: &[u8]) -> Result<SigningKey> {
    let bytes: [u8; ed25519_dalek::SECRET_KEY_LENGTH] = bytes
        .try_into()
        .map_err(|_| Error::Crypto("ed25519 secret key must be 32 bytes".into()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

pub fn sign(key: &SigningKey, msg: &[u8]) -> Vec<u8> {
    key.sign(msg).to_bytes().to_vec()
}

pub fn verify(key: &VerifyingKey, msg: &[u8], sig: &[u8]) -> Result<()> {
    let sig = Signature::from_slice(sig)
        .map_err(|e| Error::Crypto(format!("invalid ed25519 signature: {e}")))?;
    key.verify_strict(msg, &sig).map_err(|_| Error::Crypto("signature verification failed".into()))
}
