//! # Operation Log
//!
//! Types returned by the directory for an identity's log, plus helpers for
//! interpreting a fetched audit log.
//!
//! The directory is the authority on which operations are accepted. A rotation
//! key may supersede operations signed by a lower-authority key by pointing a
//! new operation at their common ancestor, but only within
//! [`RECOVERY_WINDOW`] of that ancestor's log timestamp. The helpers here let
//! a caller anticipate that decision; they do not replace it.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::{Service, SignedOperation};

/// Period during which a higher-authority rotation key may fork the log.
pub const RECOVERY_WINDOW: Duration = Duration::hours(72);

/// One entry of an audit log (`GET /{id}/log/audit`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// The identity the operation belongs to.
    pub did: String,

    /// The signed operation.
    pub operation: SignedOperation,

    /// CID of the signed operation.
    pub cid: String,

    /// Set when the operation was superseded by a higher-authority fork.
    #[serde(default)]
    pub nullified: bool,

    /// When the directory accepted the operation.
    pub created_at: DateTime<Utc>,
}

/// Current identity state (`GET /{id}/data`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentData {
    /// The identity.
    pub did: String,

    /// Verification methods: name to `did:key` string.
    #[serde(default)]
    pub verification_methods: BTreeMap<String, String>,

    /// Rotation keys, highest authority first.
    #[serde(default)]
    pub rotation_keys: Vec<String>,

    /// Also-known-as URIs.
    #[serde(default)]
    pub also_known_as: Vec<String>,

    /// Services: name to service entry.
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
}

/// The most recent entry that has not been nullified: the operation a new
/// update should reference as `prev`.
#[must_use]
pub fn head(entries: &[LogEntry]) -> Option<&LogEntry> {
    entries.iter().rev().find(|e| !e.nullified)
}

/// The time until which operations following `prev` may still be superseded,
/// or `None` if `prev` is not an active entry in the log.
#[must_use]
pub fn recovery_deadline(entries: &[LogEntry], prev: &str) -> Option<DateTime<Utc>> {
    entries
        .iter()
        .find(|e| e.cid == prev && !e.nullified)
        .map(|e| e.created_at + RECOVERY_WINDOW)
}

/// Returns `true` if an operation referencing `prev` could be accepted at
/// `now`: either `prev` is the head of the log, or it is an active ancestor
/// still inside its recovery window.
///
/// This does not check rotation-key authority; that depends on which key
/// signs the new operation and is enforced by the directory.
#[must_use]
pub fn can_supersede(entries: &[LogEntry], prev: &str, now: DateTime<Utc>) -> bool {
    if head(entries).is_some_and(|h| h.cid == prev) {
        return true;
    }
    recovery_deadline(entries, prev).is_some_and(|deadline| now < deadline)
}
