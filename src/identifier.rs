//! # Identifiers
//!
//! A `did:plc` identifier is derived from the identity's signed genesis
//! operation: the SHA-256 of its canonical encoding, base32 encoded and
//! truncated to 24 characters.

use std::sync::LazyLock;

use regex::Regex;

use crate::operation::SignedOperation;
use crate::{Error, Result, hash};

/// Method prefix.
pub const DID_PLC_PREFIX: &str = "did:plc:";

/// Number of base32 characters kept from the genesis hash.
pub const IDENTIFIER_LENGTH: usize = 24;

static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^did:plc:[a-z2-7]{24}$").expect("should compile"));

/// Derive the identifier for an identity from its signed genesis operation.
///
/// The result depends only on the operation's content, so deriving from the
/// same signed operation always yields the same identifier.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the operation is not a genesis operation
/// and [`Error::Encoding`] if it cannot be encoded.
pub fn derive(genesis: &SignedOperation) -> Result<String> {
    if !genesis.operation().is_genesis() {
        crate::tracerr!(Error::Validation, "identifiers derive only from a genesis operation");
    }
    let digest = hash::sha256(&genesis.encode()?);
    let encoded = hash::base32_lower(&digest);
    Ok(format!("{DID_PLC_PREFIX}{}", &encoded[..IDENTIFIER_LENGTH]))
}

/// Returns `true` if `did` is a syntactically valid `did:plc` identifier.
#[must_use]
pub fn is_valid(did: &str) -> bool {
    DID_REGEX.is_match(did)
}

/// Check that `did` is a syntactically valid `did:plc` identifier.
///
/// # Errors
///
/// Returns [`Error::Validation`] if it is not.
pub fn validate(did: &str) -> Result<()> {
    if !is_valid(did) {
        crate::tracerr!(Error::Validation, "invalid did:plc identifier: {did}");
    }
    Ok(())
}
