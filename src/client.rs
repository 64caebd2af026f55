//! # Log Client
//!
//! Synchronous client for a `did:plc` directory: fetches an identity's
//! current state and operation log, and submits signed operations.
//!
//! Submissions are optimistic. Before building an update, read the current
//! `prev` from the audited log ([`LogClient::current_prev`]) and embed it in
//! the new operation. If the directory rejects the operation because the
//! chain moved on, or because a higher-authority key already superseded it,
//! the client returns [`Error::Conflict`] rather than retrying: retrying
//! means re-reading `prev` and rebuilding the operation, which is the
//! caller's decision.
//!
//! The directory does not name the conflict: an operation built on a `prev`
//! that a higher-authority key has since superseded is refused as an invalid
//! signature. A rejected update is therefore checked against the audited
//! log, and is a conflict whenever its `prev` is no longer the head.

mod http;

use serde_json::Value;
use tracing::instrument;

pub use self::http::HttpTransport;
use crate::config::ClientConfig;
use crate::log::{self, DocumentData, LogEntry};
use crate::operation::SignedOperation;
use crate::provider::{Method, Transport};
use crate::{Error, Result, identifier};

// Directory messages for rejections that are conflicts whatever the log says.
const CONFLICT_MESSAGES: [&str; 3] = [
    "Operations not correctly ordered",
    "Proposed prev does not match the most recent operation",
    "Recovery operation occurred outside of the allowed 72 hr recovery window",
];

/// Client for the directory's HTTP interface.
#[derive(Clone, Debug)]
pub struct LogClient<T = HttpTransport> {
    base_url: String,
    transport: T,
}

impl LogClient<HttpTransport> {
    /// Create a client using the default HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the configuration is invalid and
    /// [`Error::Network`] if the HTTP client cannot be created.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> LogClient<T> {
    /// Create a client using the provided transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the configuration is invalid.
    pub fn with_transport(config: &ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            transport,
        })
    }

    /// The directory base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The latest DID document for `did`, as returned by the directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed identifier and
    /// [`Error::Network`] if the request fails.
    #[instrument(level = "debug", skip(self))]
    pub fn fetch_current(&self, did: &str) -> Result<Value> {
        self.get(did, "")
    }

    /// The current identity state for `did`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the request fails and
    /// [`Error::Encoding`] if the response is not identity data.
    #[instrument(level = "debug", skip(self))]
    pub fn fetch_data(&self, did: &str) -> Result<DocumentData> {
        Ok(serde_json::from_value(self.get(did, "/data")?)?)
    }

    /// Every operation in the log for `did`, oldest first, excluding
    /// nullified operations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the request fails and
    /// [`Error::Encoding`] if the response is not an operation list.
    #[instrument(level = "debug", skip(self))]
    pub fn fetch_log(&self, did: &str) -> Result<Vec<SignedOperation>> {
        Ok(serde_json::from_value(self.get(did, "/log")?)?)
    }

    /// The directory's validated log for `did`, including nullified entries,
    /// each with its CID and acceptance time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the request fails and
    /// [`Error::Encoding`] if the response is not an audit log.
    #[instrument(level = "debug", skip(self))]
    pub fn fetch_audited_log(&self, did: &str) -> Result<Vec<LogEntry>> {
        Ok(serde_json::from_value(self.get(did, "/log/audit")?)?)
    }

    /// The most recent operation for `did`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the request fails and
    /// [`Error::Encoding`] if the response is not an operation.
    #[instrument(level = "debug", skip(self))]
    pub fn fetch_last_operation(&self, did: &str) -> Result<SignedOperation> {
        Ok(serde_json::from_value(self.get(did, "/log/last")?)?)
    }

    /// The CID a new operation for `did` should carry as `prev`: the last
    /// active entry of the audited log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the request fails and
    /// [`Error::Validation`] if the log has no active entries.
    pub fn current_prev(&self, did: &str) -> Result<String> {
        let entries = self.fetch_audited_log(did)?;
        let Some(head) = log::head(&entries) else {
            crate::tracerr!(Error::Validation, "no active operations in log for {did}");
        };
        Ok(head.cid.clone())
    }

    /// Submit the signed genesis operation that creates `did`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the operation is not a genesis
    /// operation or does not derive to `did`; [`Error::Conflict`] if the
    /// directory rejects it as a chain conflict; [`Error::Network`] for any
    /// other failure.
    #[instrument(level = "debug", skip(self, op))]
    pub fn submit_create(&self, did: &str, op: &SignedOperation) -> Result<()> {
        let derived = op.did()?;
        if derived != did {
            crate::tracerr!(
                Error::Validation,
                "genesis operation derives to {derived}, not {did}"
            );
        }
        self.submit(did, op)
    }

    /// Submit a signed update, rotation or tombstone for `did`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the operation has no `prev`;
    /// [`Error::Conflict`] if the directory rejects it and its `prev` is no
    /// longer the head of the audited log (stale, superseded by a
    /// higher-authority key, or outside the recovery window);
    /// [`Error::Network`] for any other failure.
    #[instrument(level = "debug", skip(self, op))]
    pub fn submit_update(&self, did: &str, op: &SignedOperation) -> Result<()> {
        if op.operation().is_genesis() {
            crate::tracerr!(Error::Validation, "an update must reference a predecessor");
        }
        match self.submit(did, op) {
            Err(Error::Network { status: Some(400), body, message }) => {
                Err(self.recheck(did, op, body, message))
            }
            result => result,
        }
    }

    // A rejected update whose `prev` is no longer the head of the log lost a
    // race for its slot.
    fn recheck(&self, did: &str, op: &SignedOperation, body: Value, message: String) -> Error {
        let head = match self.current_prev(did) {
            Ok(head) => head,
            Err(e) => {
                tracing::debug!(did, "cannot re-read log after rejection: {e}");
                return Error::Network { status: Some(400), body, message };
            }
        };
        let prev = op.operation().prev();
        if prev == Some(head.as_str()) {
            return Error::Network { status: Some(400), body, message };
        }
        tracing::warn!(did, ?prev, %head, "operation no longer extends the log");
        Error::Conflict { status: 400, body }
    }

    fn submit(&self, did: &str, op: &SignedOperation) -> Result<()> {
        let url = self.url(did, "")?;
        let body = serde_json::to_value(op)?;
        self.send(Method::Post, &url, Some(&body))?;
        tracing::info!(did, op_type = op.operation().op_type().as_str(), "operation accepted");
        Ok(())
    }

    fn get(&self, did: &str, path: &str) -> Result<Value> {
        let url = self.url(did, path)?;
        self.send(Method::Get, &url, None)
    }

    fn url(&self, did: &str, path: &str) -> Result<String> {
        identifier::validate(did)?;
        Ok(format!("{}/{did}{path}", self.base_url))
    }

    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let response = self.transport.send(method, url, body)?;
        if response.is_success() {
            return Ok(response.body);
        }
        let err = rejection(response.status, response.body);
        tracing::warn!(%method, url, "directory rejected request: {err}");
        Err(err)
    }
}

// Map a non-2xx response to a conflict or a network error.
fn rejection(status: u16, body: Value) -> Error {
    if status == 409 {
        return Error::Conflict { status, body };
    }
    if status == 400 {
        let message = body.get("message").and_then(Value::as_str).or_else(|| body.as_str());
        if message.is_some_and(|m| CONFLICT_MESSAGES.iter().any(|c| m.starts_with(c))) {
            return Error::Conflict { status, body };
        }
    }
    Error::Network {
        status: Some(status),
        message: format!("directory returned status {status}"),
        body,
    }
}
