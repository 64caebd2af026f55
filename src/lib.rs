//! # DID PLC
//!
//! Client-side core of the `did:plc` method: build, canonically encode, sign
//! and chain identity operations, derive identifiers from genesis operations,
//! and synchronise with a directory that holds each identity's operation log.
//!
//! ```rust,no_run
//! use vercre_didplc::{
//!     Algorithm, ClientConfig, Key, LogClient, OperationBuilder, OperationType,
//! };
//!
//! # fn main() -> vercre_didplc::Result<()> {
//! let rotation = Key::generate(Algorithm::Secp256k1);
//! let signing = Key::generate(Algorithm::Ed25519);
//!
//! let genesis = OperationBuilder::new(OperationType::Operation)
//!     .rotation_key(&rotation)
//!     .verification_method("atproto", &signing)
//!     .also_known_as("at://alice.example.com")
//!     .genesis()
//!     .build()?
//!     .sign(&rotation)?;
//! let did = genesis.did()?;
//!
//! let client = LogClient::new(&ClientConfig::default())?;
//! client.submit_create(&did, &genesis)?;
//! # Ok(())
//! # }
//! ```
//!
//! See: <https://web.plc.directory/spec/v0.1/did-plc>

pub mod cbor;
mod client;
mod config;
mod error;
pub mod hash;
pub mod identifier;
mod key;
pub mod log;
mod manager;
mod operation;
mod provider;

pub use self::client::{HttpTransport, LogClient};
pub use self::config::ClientConfig;
pub use self::error::Error;
pub use self::key::{Algorithm, DID_KEY_PREFIX, Key};
pub use self::log::{DocumentData, LogEntry};
pub use self::manager::{ATPROTO_VERIFICATION_METHOD, Manager, MemoryKeyStore, UpdateRequest};
pub use self::operation::{
    LegacyCreate, MAX_OPERATION_SIZE, MAX_ROTATION_KEYS, MAX_VERIFICATION_METHODS, Operation,
    OperationBuilder, OperationType, PlcOperation, Service, SignedOperation, Tombstone,
};
pub use self::provider::{KeyStore, Method, Response, StoredKeys, Transport};

/// Result type for `did:plc` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Re-exported for use by [`tracerr!`].
#[doc(hidden)]
pub use tracing;
