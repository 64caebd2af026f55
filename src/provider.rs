//! # Provider Traits
//!
//! Collaborators supplied by the caller: the [`Transport`] used to reach the
//! directory, and the [`KeyStore`] holding each identity's private keys.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// HTTP method used by the log client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,

    /// `POST`
    Post,
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A directory response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,

    /// Response body, `Value::Null` when empty. A body that is not JSON is
    /// carried as a string.
    pub body: Value,
}

impl Response {
    /// Returns `true` for any 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// [`Transport`] sends a request to the directory and returns its response.
///
/// Implementations apply their own timeout and TLS settings. A non-2xx
/// status is a successful send: return it as a [`Response`] and let the log
/// client classify it. Return an error only when no response was received.
pub trait Transport: Send + Sync {
    /// Send a request with an optional JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Network`] if the request fails or times out.
    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response>;
}

/// Private key material for one identity, each key as a secret multibase
/// string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeys {
    /// Rotation keys, highest authority first.
    pub rotation_keys: Vec<String>,

    /// The `atproto` verification key.
    pub verification_key: String,

    /// Replacement for the first rotation key, written before the operation
    /// installing it is submitted and promoted once the directory holds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_rotation_key: Option<String>,

    /// Replacement verification key, handled like `pending_rotation_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_verification_key: Option<String>,
}

impl StoredKeys {
    /// Returns `true` if a key change was started but not yet confirmed.
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending_rotation_key.is_some() || self.pending_verification_key.is_some()
    }
}

/// [`KeyStore`] is a durable mapping from identity to private key material.
pub trait KeyStore: Send + Sync {
    /// Retrieve the keys stored for `did`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, did: &str) -> anyhow::Result<Option<StoredKeys>>;

    /// Store (or replace) the keys for `did`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn put(&self, did: &str, keys: &StoredKeys) -> anyhow::Result<()>;
}
