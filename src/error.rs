//! # Errors
//!
//! Every public operation in this crate either returns a fully valid result or
//! fails with one of the [`Error`] kinds defined here.

use serde_json::{Value, json};
use thiserror::Error;

/// Log an error and return it from the enclosing function.
///
/// # Example
/// ```
/// use vercre_didplc::{Error, Result, tracerr};
///
/// fn too_many(n: usize) -> Result<()> {
///     tracerr!(Error::Validation, "too many rotation keys: {n}")
/// }
///
/// assert!(too_many(6).is_err());
/// ```
#[macro_export]
macro_rules! tracerr {
    ($kind:path, $($msg:tt)*) => {{
        let msg = format!($($msg)*);
        $crate::tracing::error!("{msg}");
        return Err($kind(msg).into());
    }};
}

/// Errors raised by this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation (or its inputs) has the wrong shape or cardinality. The
    /// caller must fix the input; retrying will not help.
    #[error("validation error: {0}")]
    Validation(String),

    /// Key material is missing or malformed, or a signature does not verify.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A value could not be encoded or decoded, or exceeds the size limit.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The transport failed, timed out, or the directory answered with a
    /// non-2xx status that is not a conflict.
    #[error("network error: {message}")]
    Network {
        /// Upstream HTTP status, when a response was received.
        status: Option<u16>,

        /// Upstream response body (`Value::Null` when there was none).
        body: Value,

        /// Description of the failure.
        message: String,
    },

    /// The directory rejected an operation because it breaks the hash chain,
    /// the rotation-key authority ranking, or the recovery window. Re-fetch
    /// `prev` and rebuild the operation before trying again.
    #[error("operation rejected by directory ({status}): {body}")]
    Conflict {
        /// Upstream HTTP status.
        status: u16,

        /// Upstream response body.
        body: Value,
    },
}

impl Error {
    /// Stable, machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Crypto(_) => "crypto_error",
            Self::Encoding(_) => "encoding_error",
            Self::Network { .. } => "network_error",
            Self::Conflict { .. } => "conflict",
        }
    }

    /// Render the error in an `OAuth2`-like JSON shape.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": self.code(),
            "error_description": self.to_string(),
        })
    }

    /// Returns `true` when the directory rejected the operation as a conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Upstream HTTP status, if the error came from a directory response.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => *status,
            Self::Conflict { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::Network {
            status: None,
            body: Value::Null,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Validation(format!("invalid url: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::network(format!("request timed out: {err}"));
        }
        Self::Network {
            status: err.status().map(|s| s.as_u16()),
            body: Value::Null,
            message: err.to_string(),
        }
    }
}
