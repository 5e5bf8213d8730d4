//! Observability metrics for store operations
//!
//! Tracks where time goes in a `get`/`put`: key derivation (near zero once
//! the cache is warm), sealing/opening, and payload encoding. Designed to be
//! serialized and exported by the host.

use serde::{Deserialize, Serialize};

/// Metrics for the most recent store operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Time spent obtaining keys in microseconds
    pub key_derivation_micros: u64,

    /// Whether every key came from the cache
    pub keys_cached: bool,

    /// Sign/verify/encrypt/decrypt time in microseconds
    pub crypto_micros: u64,

    /// Payload encode/decode time in microseconds
    pub codec_micros: u64,

    /// Encoded payload size in bytes (0 if the token was rejected)
    pub payload_bytes: usize,

    /// Token size in bytes
    pub token_bytes: usize,

    /// Whether the token was encrypted (None if no token was handled)
    pub encrypted: Option<bool>,

    /// Rejection label from `TokenError::kind` when `get` discarded a token
    pub rejection: Option<String>,
}

impl OperationMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        OperationMetrics {
            key_derivation_micros: 0,
            keys_cached: false,
            crypto_micros: 0,
            codec_micros: 0,
            payload_bytes: 0,
            token_bytes: 0,
            encrypted: None,
            rejection: None,
        }
    }

    /// Set key derivation metrics
    pub fn with_keys(mut self, time_micros: u64, cached: bool) -> Self {
        self.key_derivation_micros = time_micros;
        self.keys_cached = cached;
        self
    }

    /// Set crypto metrics
    pub fn with_crypto(mut self, time_micros: u64, encrypted: bool, token_bytes: usize) -> Self {
        self.crypto_micros = time_micros;
        self.encrypted = Some(encrypted);
        self.token_bytes = token_bytes;
        self
    }

    /// Set codec metrics
    pub fn with_codec(mut self, time_micros: u64, payload_bytes: usize) -> Self {
        self.codec_micros = time_micros;
        self.payload_bytes = payload_bytes;
        self
    }

    /// Record why a token was discarded
    pub fn with_rejection(mut self, kind: &str) -> Self {
        self.rejection = Some(kind.to_owned());
        self
    }

    /// Total operation time in microseconds
    pub fn total_time_micros(&self) -> u64 {
        self.key_derivation_micros + self.crypto_micros + self.codec_micros
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
