//! Helper functions for hashing canonical encodings and rendering the result
//! as content identifiers.

use cid::{Cid, Version};
use multibase::Base;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Multicodec for DAG-CBOR content.
const DAG_CBOR: u64 = 0x71;

/// Multihash code for SHA2-256.
const SHA2_256: u64 = 0x12;

/// SHA-256 digest of the provided bytes.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Lowercase RFC 4648 base32, without padding or multibase prefix.
#[must_use]
pub fn base32_lower(data: &[u8]) -> String {
    let encoded = multibase::encode(Base::Base32Lower, data);
    // drop the multibase prefix character
    encoded[1..].to_string()
}

/// CIDv1 for canonically encoded (DAG-CBOR) bytes, as a base32 multibase
/// string (`bafyrei…`).
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the digest cannot be wrapped as a
/// multihash.
pub fn cid(encoded: &[u8]) -> Result<String> {
    let digest = Multihash::<64>::wrap(SHA2_256, &sha256(encoded))
        .map_err(|e| Error::Encoding(format!("issue wrapping digest: {e}")))?;
    Ok(Cid::new_v1(DAG_CBOR, digest).to_string())
}

/// Returns `true` if `cid` is a base32 CIDv1 of DAG-CBOR content hashed with
/// SHA2-256, the only form operation CIDs take.
#[must_use]
pub fn is_cid(cid: &str) -> bool {
    let Ok(parsed) = Cid::try_from(cid) else {
        return false;
    };
    parsed.version() == Version::V1
        && parsed.codec() == DAG_CBOR
        && parsed.hash().code() == SHA2_256
        && parsed.hash().size() == 32
        // base32-lower is the only rendering accepted
        && parsed.to_string() == cid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(digest[..4], [0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn base32_alphabet() {
        // RFC 4648 test vector, lowercased and unpadded.
        assert_eq!(base32_lower(b"foobar"), "mzxw6ytboi");
        assert_eq!(base32_lower(b""), "");
    }

    #[test]
    fn cid_layout() {
        let cid = cid(b"\xa0").expect("should hash");
        assert!(cid.starts_with("bafyrei"));
        assert_eq!(cid.len(), 59);
        assert!(is_cid(&cid));

        let parsed = Cid::try_from(cid.as_str()).expect("should parse");
        assert_eq!(parsed.hash().digest(), sha256(b"\xa0").as_slice());
        assert_eq!(parsed.codec(), DAG_CBOR);
    }

    #[test]
    fn malformed_cid() {
        assert!(!is_cid(""));
        assert!(!is_cid("bafyrei"));
        assert!(!is_cid("not-a-cid"));

        let cid = cid(b"\xa0").expect("should hash");
        // right content, uppercase base
        assert!(!is_cid(&cid.to_uppercase()));

        // raw codec rather than DAG-CBOR
        let digest = Multihash::<64>::wrap(SHA2_256, &sha256(b"\xa0")).expect("should wrap");
        assert!(!is_cid(&Cid::new_v1(0x55, digest).to_string()));
    }
}
