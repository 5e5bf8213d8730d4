//! Session state serialization.
//!
//! Payloads carry a one-byte format tag ahead of the body so the decoder can
//! read any format this crate has ever written, whatever the store is
//! currently configured to write:
//!
//! - `0x01`: MessagePack (`rmp-serde`), the default
//! - `0x02`: JSON (`serde_json`)
//!
//! Decoding is reached only after a token authenticated, but stale or foreign
//! payloads still happen (format drift, downgrades). [`decode`] therefore
//! never fails: anything it cannot parse becomes an empty session.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Maximum payload size in either direction (64 KiB).
///
/// Real cookies top out around 4 KiB; this is a hard stop against abuse.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Deepest container nesting a payload may carry, counting the session map
/// itself as the first level.
///
/// Decoders recurse once per level, so an unbounded depth lets a small
/// payload exhaust the stack.
pub const MAX_NESTING_DEPTH: usize = 64;

const TAG_MESSAGEPACK: u8 = 0x01;
const TAG_JSON: u8 = 0x02;

/// Error types for payload encoding and decoding
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("payload is empty")]
    Empty,

    #[error("payload exceeds maximum size")]
    TooLarge,

    #[error("session nesting exceeds {max} levels", max = MAX_NESTING_DEPTH)]
    TooDeep,

    #[error("unknown payload format tag: {0:#04x}")]
    UnknownFormat(u8),

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
}

/// Wire encoding for session payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    #[serde(alias = "msgpack")]
    MessagePack,
    Json,
}

impl PayloadFormat {
    fn tag(self) -> u8 {
        match self {
            PayloadFormat::MessagePack => TAG_MESSAGEPACK,
            PayloadFormat::Json => TAG_JSON,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            TAG_MESSAGEPACK => Ok(PayloadFormat::MessagePack),
            TAG_JSON => Ok(PayloadFormat::Json),
            other => Err(CodecError::UnknownFormat(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadFormat::MessagePack => "messagepack",
            PayloadFormat::Json => "json",
        }
    }
}

/// Session data: a string-keyed map of arbitrary nested values.
///
/// Owned by the caller; the store never keeps a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(BTreeMap<String, Value>);

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for SessionState {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SessionState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<'a> IntoIterator for &'a SessionState {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Walk `state` without recursing and fail once nesting passes
/// [`MAX_NESTING_DEPTH`].
fn check_depth(state: &SessionState) -> Result<(), CodecError> {
    let mut pending: Vec<(&Value, usize)> = state.0.values().map(|value| (value, 1)).collect();

    while let Some((value, parent_depth)) = pending.pop() {
        let depth = parent_depth + 1;
        match value {
            Value::Array(items) => {
                if depth > MAX_NESTING_DEPTH {
                    return Err(CodecError::TooDeep);
                }
                pending.extend(items.iter().map(|item| (item, depth)));
            }
            Value::Object(map) => {
                if depth > MAX_NESTING_DEPTH {
                    return Err(CodecError::TooDeep);
                }
                pending.extend(map.values().map(|item| (item, depth)));
            }
            _ => {}
        }
    }

    Ok(())
}

/// Serialize `state` into a tagged payload.
///
/// Refuses states nested deeper than [`MAX_NESTING_DEPTH`] or larger than
/// [`MAX_PAYLOAD_SIZE`], so every payload it emits is one [`try_decode`]
/// reads back.
pub fn encode(state: &SessionState, format: PayloadFormat) -> Result<Vec<u8>, CodecError> {
    check_depth(state)?;

    let body = match format {
        PayloadFormat::MessagePack => rmp_serde::to_vec_named(state)
            .map_err(|e| CodecError::SerializationFailed(e.to_string()))?,
        PayloadFormat::Json => serde_json::to_vec(state)
            .map_err(|e| CodecError::SerializationFailed(e.to_string()))?,
    };

    // Security: refuse to emit what decode would refuse to read
    if body.len() + 1 > MAX_PAYLOAD_SIZE {
        return Err(CodecError::TooLarge);
    }

    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(format.tag());
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Parse a tagged payload, reporting why it could not be read.
pub fn try_decode(payload: &[u8]) -> Result<SessionState, CodecError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::TooLarge);
    }

    let (&tag, body) = payload.split_first().ok_or(CodecError::Empty)?;

    match PayloadFormat::from_tag(tag)? {
        PayloadFormat::MessagePack => {
            let mut deserializer = rmp_serde::Deserializer::from_read_ref(body);
            // One level of headroom over what `encode` accepts
            deserializer.set_max_depth(MAX_NESTING_DEPTH + 1);
            SessionState::deserialize(&mut deserializer)
                .map_err(|e| CodecError::DeserializationFailed(e.to_string()))
        }
        PayloadFormat::Json => serde_json::from_slice(body)
            .map_err(|e| CodecError::DeserializationFailed(e.to_string())),
    }
}

/// Parse a tagged payload; anything unreadable becomes an empty session.
pub fn decode(payload: &[u8]) -> SessionState {
    match try_decode(payload) {
        Ok(state) => state,
        Err(e) => {
            debug!(error = %e, payload_len = payload.len(), "discarding undecodable session payload");
            SessionState::default()
        }
    }
}
