//! In-memory `did:plc` directory used by the integration tests.
//!
//! The directory enforces the rules a real one does, and rejects operations
//! with the same messages: the hash chain, the rotation-key authority ranking
//! and the 72-hour recovery window. It keeps a controllable clock so the window
//! can be crossed without waiting, and can lose responses to test recovery
//! from an unknown outcome.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use vercre_didplc::log::RECOVERY_WINDOW;
use vercre_didplc::{
    Algorithm, ClientConfig, Error, Key, LogClient, LogEntry, Method, OperationBuilder,
    OperationType, Response, Result, SignedOperation, Transport,
};

pub const BASE_URL: &str = "https://plc.test";

#[derive(Default)]
struct State {
    logs: HashMap<String, Vec<LogEntry>>,
    now: Option<DateTime<Utc>>,
    offline: bool,
    lose_response: Option<Loss>,
}

// What happens after the next accepted operation's response is lost.
#[derive(Clone, Copy)]
enum Loss {
    StayOnline,
    GoOffline,
}

#[derive(Clone, Default)]
pub struct FakeDirectory {
    state: Arc<Mutex<State>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the directory's clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        let now = state.now.unwrap_or_else(start);
        state.now = Some(now + by);
    }

    /// Fail every request as if the directory were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Apply the next posted operation, then fail the request as if the
    /// response timed out. With `then_offline` the directory also becomes
    /// unreachable.
    pub fn lose_next_response(&self, then_offline: bool) {
        let loss = if then_offline { Loss::GoOffline } else { Loss::StayOnline };
        self.lock().lose_response = Some(loss);
    }

    /// The audit log held for `did`.
    pub fn entries(&self, did: &str) -> Vec<LogEntry> {
        self.lock().logs.get(did).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("lock should not be poisoned")
    }

    fn get(state: &State, did: &str, path: &str) -> Response {
        let Some(entries) = state.logs.get(did) else {
            return reply(404, json!({"message": format!("DID not registered: {did}")}));
        };
        let active: Vec<&LogEntry> = entries.iter().filter(|e| !e.nullified).collect();
        let Some(last) = active.last() else {
            return reply(404, json!({"message": format!("DID not registered: {did}")}));
        };

        match path {
            "/log/audit" => reply(200, json!(entries)),
            "/log" => reply(200, json!(active.iter().map(|e| &e.operation).collect::<Vec<_>>())),
            "/log/last" => reply(200, json!(last.operation)),
            "" | "/data" => {
                let Some(plc) = last.operation.operation().as_plc() else {
                    return reply(410, json!({"message": format!("DID not available: {did}")}));
                };
                if path == "/data" {
                    return reply(
                        200,
                        json!({
                            "did": did,
                            "rotationKeys": plc.rotation_keys(),
                            "verificationMethods": plc.verification_methods(),
                            "alsoKnownAs": plc.also_known_as(),
                            "services": plc.services(),
                        }),
                    );
                }
                reply(
                    200,
                    json!({
                        "@context": ["https://www.w3.org/ns/did/v1"],
                        "id": did,
                        "alsoKnownAs": plc.also_known_as(),
                    }),
                )
            }
            _ => reply(404, json!({"message": "not found"})),
        }
    }

    fn post(state: &mut State, did: &str, body: Option<&Value>) -> Response {
        let Some(body) = body else {
            return reply(400, json!({"message": "missing operation"}));
        };
        let Ok(op) = serde_json::from_value::<SignedOperation>(body.clone()) else {
            return reply(400, json!({"message": "invalid operation"}));
        };
        let Ok(cid) = op.cid() else {
            return reply(400, json!({"message": "operation too large"}));
        };
        let now = state.now.unwrap_or_else(start);
        let entries = state.logs.entry(did.to_string()).or_default();

        if entries.is_empty() {
            if op.verify_genesis().is_err() {
                return reply(400, json!({"message": "Invalid signature on op"}));
            }
            if op.did().ok().as_deref() != Some(did) {
                return reply(
                    400,
                    json!({"message": "Hash of genesis operation does not match DID identifier"}),
                );
            }
        } else {
            let invalid = json!({"message": format!("Invalid signature on op: {body}")});
            let Some(prev) = op.operation().prev() else {
                return reply(409, json!({"message": "DID already exists"}));
            };
            let Some(index) = entries.iter().position(|e| e.cid == prev && !e.nullified) else {
                return reply(400, json!({"message": "Operations not correctly ordered"}));
            };
            let ancestor = &entries[index];
            let authority = ancestor.operation.operation().rotation_keys();
            if authority.is_empty() {
                let message = "Improperly formatted operation, no operations after tombstone";
                return reply(400, json!({"message": message}));
            }
            let Ok(rank) = op.verify(&authority) else {
                return reply(400, invalid);
            };

            let superseded: Vec<usize> =
                (index + 1..entries.len()).filter(|i| !entries[*i].nullified).collect();
            if let Some(first) = superseded.first() {
                // forking: only a higher-authority key, only inside the window
                let Ok(first_rank) = entries[*first].operation.verify(&authority) else {
                    return reply(400, invalid);
                };
                if rank >= first_rank {
                    return reply(400, invalid);
                }
                if now >= ancestor.created_at + RECOVERY_WINDOW {
                    let lapsed = (now - ancestor.created_at).num_hours();
                    let message = format!(
                        "Recovery operation occurred outside of the allowed 72 hr recovery \
                         window. Time lapsed: {lapsed}h"
                    );
                    return reply(400, json!({"message": message}));
                }
                for i in superseded {
                    entries[i].nullified = true;
                }
            }
        }

        entries.push(LogEntry {
            did: did.to_string(),
            operation: op,
            cid,
            nullified: false,
            created_at: now,
        });
        reply(200, Value::Null)
    }
}

impl Transport for FakeDirectory {
    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
        let mut state = self.lock();
        if state.offline {
            return Err(timed_out());
        }

        let Some(path) = url.strip_prefix(BASE_URL).and_then(|p| p.strip_prefix('/')) else {
            return Ok(reply(404, json!({"message": "not found"})));
        };
        let (did, rest) = path.find('/').map_or((path, ""), |i| path.split_at(i));

        let response = match method {
            Method::Get => Self::get(&state, did, rest),
            Method::Post if rest.is_empty() => Self::post(&mut state, did, body),
            Method::Post => reply(404, json!({"message": "not found"})),
        };

        if method == Method::Post && response.is_success() {
            if let Some(loss) = state.lose_response.take() {
                state.offline = matches!(loss, Loss::GoOffline);
                return Err(timed_out());
            }
        }
        Ok(response)
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid date")
}

fn timed_out() -> Error {
    Error::Network {
        status: None,
        body: Value::Null,
        message: "request timed out".into(),
    }
}

fn reply(status: u16, body: Value) -> Response {
    Response { status, body }
}

/// A log client talking to `directory`.
pub fn client(directory: &FakeDirectory) -> LogClient<FakeDirectory> {
    let config = ClientConfig::default().with_base_url(BASE_URL);
    LogClient::with_transport(&config, directory.clone()).expect("should create client")
}

pub fn secp256k1() -> Key {
    Key::generate(Algorithm::Secp256k1)
}

/// A signed genesis operation with the given rotation keys, signed by the
/// first.
pub fn genesis(rotation_keys: &[Key]) -> SignedOperation {
    OperationBuilder::new(OperationType::Operation)
        .rotation_keys(rotation_keys)
        .verification_method("atproto", &Key::generate(Algorithm::Ed25519))
        .also_known_as("at://alice.example.com")
        .genesis()
        .build()
        .expect("should build")
        .sign(&rotation_keys[0])
        .expect("should sign")
}

/// An update of `state` referencing `prev`, replacing its also-known-as URI.
pub fn update(state: &SignedOperation, prev: &str, handle: &str, signer: &Key) -> SignedOperation {
    let plc = state.operation().as_plc().expect("should be a plc operation");
    OperationBuilder::from_operation(plc)
        .clear_also_known_as()
        .also_known_as(format!("at://{handle}"))
        .prev(prev)
        .build()
        .expect("should build")
        .sign(signer)
        .expect("should sign")
}
