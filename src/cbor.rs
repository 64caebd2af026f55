//! # Canonical Encoder
//!
//! Deterministic CBOR (RFC 8949 §3.9 core deterministic encoding) for the
//! subset of data model used by `did:plc` operations: null, booleans, integers,
//! text and byte strings, arrays, and text-keyed maps.
//!
//! Map entries are ordered when the map is encoded, never when it is mutated:
//! every call to [`encode`] sorts a fresh snapshot of the entries by the length
//! of the encoded key and then by the encoded key bytes. Writing and reading
//! the encoded items is delegated to `ciborium`.

use std::collections::BTreeMap;

use ciborium::value::{Integer, Value as CborValue};

use crate::{Error, Result};

/// A value that has a canonical binary form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// CBOR `null`.
    Null,

    /// CBOR `true` or `false`.
    Bool(bool),

    /// Signed integer.
    Integer(i64),

    /// UTF-8 text string.
    Text(String),

    /// Raw byte string.
    Bytes(Vec<u8>),

    /// Ordered list of values.
    Array(Vec<Value>),

    /// Text-keyed map.
    Map(Map),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Self::Map(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A map with text keys.
///
/// Keys are unique: inserting an existing key overwrites its value. The
/// storage order carries no meaning; canonical order is applied on encode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Map {
    entries: BTreeMap<String, Value>,
}

impl Map {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from arbitrary key/value pairs.
    ///
    /// # Errors
    ///
    /// Fails immediately if any key is not a text string. Later duplicates
    /// overwrite earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = (Value, Value)>) -> Result<Self> {
        let mut map = Self::new();
        for (key, value) in entries {
            let Value::Text(key) = key else {
                return Err(Error::Encoding(format!("map key is not a text string: {key:?}")));
            };
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Insert (or overwrite) an entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Number of unique keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in canonical (encoded length, then bytewise) order.
    #[must_use]
    pub fn canonical_keys(&self) -> Vec<&str> {
        self.canonical_entries().into_iter().map(|(k, _)| k).collect()
    }

    // Snapshot of the entries, sorted canonically. A text key's encoded
    // length grows with its byte length and the head is identical for equal
    // lengths, so (length, bytes) order matches the order of the encoded keys.
    fn canonical_entries(&self) -> Vec<(&str, &Value)> {
        let mut sorted = self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(b.0)));
        sorted
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Encode a value to its canonical binary form.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the value cannot be written.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(&to_cbor_value(value), &mut buf)
        .map_err(|e| Error::Encoding(format!("issue encoding value: {e}")))?;
    Ok(buf)
}

// Lower to the CBOR crate's data model, emitting map entries in canonical
// order. `ciborium` writes every head in its shortest form.
fn to_cbor_value(value: &Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Integer(n) => CborValue::Integer(Integer::from(*n)),
        Value::Text(s) => CborValue::Text(s.clone()),
        Value::Bytes(b) => CborValue::Bytes(b.clone()),
        Value::Array(items) => CborValue::Array(items.iter().map(to_cbor_value).collect()),
        Value::Map(map) => CborValue::Map(
            map.canonical_entries()
                .into_iter()
                .map(|(k, v)| (CborValue::Text(k.to_string()), to_cbor_value(v)))
                .collect(),
        ),
    }
}

/// Decode a single value from its binary form.
///
/// Only canonical encodings of the data model [`encode`] produces are
/// accepted: the input must re-encode to the same bytes. Indefinite lengths,
/// non-shortest heads, unsorted or duplicate map keys, floats, tags, non-text
/// map keys and trailing bytes are all rejected.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if the input is malformed, not canonical, or
/// outside the supported data model.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let raw: CborValue = ciborium::from_reader(bytes)
        .map_err(|e| Error::Encoding(format!("issue decoding value: {e}")))?;
    let value = from_cbor_value(raw, 0)?;
    if encode(&value)? != bytes {
        return Err(Error::Encoding("input is not a canonical encoding".into()));
    }
    Ok(value)
}

const MAX_DEPTH: usize = 64;

fn from_cbor_value(raw: CborValue, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::Encoding("nesting too deep".into()));
    }
    match raw {
        CborValue::Null => Ok(Value::Null),
        CborValue::Bool(b) => Ok(Value::Bool(b)),
        CborValue::Integer(n) => i64::try_from(n)
            .map(Value::Integer)
            .map_err(|_| Error::Encoding("integer out of range".into())),
        CborValue::Text(s) => Ok(Value::Text(s)),
        CborValue::Bytes(b) => Ok(Value::Bytes(b)),
        CborValue::Array(items) => items
            .into_iter()
            .map(|item| from_cbor_value(item, depth + 1))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        CborValue::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let CborValue::Text(key) = key else {
                    return Err(Error::Encoding("map key is not a text string".into()));
                };
                if map.entries.contains_key(&key) {
                    return Err(Error::Encoding(format!("duplicate map key {key:?}")));
                }
                let value = from_cbor_value(value, depth + 1)?;
                map.entries.insert(key, value);
            }
            Ok(Value::Map(map))
        }
        CborValue::Float(_) => Err(Error::Encoding("floats are not supported".into())),
        CborValue::Tag(tag, _) => Err(Error::Encoding(format!("unsupported tag {tag}"))),
        _ => Err(Error::Encoding("unsupported value".into())),
    }
}
