//! # cookiekit-core
//!
//! Encrypted, tamper-evident client-side sessions: session state in, opaque
//! cookie token out, and back again.
//!
//! This crate turns server-side session state into a token safe to hand to an
//! untrusted client, and rebuilds the state later. Any token that was forged,
//! altered, sealed under another key, or garbled comes back as an empty
//! session, never as an error.
//!
//! ## Quick Start
//!
//! ```rust
//! use cookiekit_core::{CookieStore, CookieStoreConfig, MasterSecret, SessionState, StoreOptions};
//!
//! let config = CookieStoreConfig::init(
//!     StoreOptions::new()
//!         .with_encryption_salt("encrypted cookie")
//!         .with_signing_salt("signed cookie"),
//! )
//! .unwrap();
//! let store = CookieStore::new();
//! let secret = MasterSecret::new(vec![b'a'; 64]); // Use a random secret in production!
//!
//! let mut state = SessionState::new();
//! state.insert("user_id", 42);
//!
//! let token = store.put(&secret, &state, &config).unwrap();
//! assert_eq!(store.get(&secret, &token, &config).unwrap(), state);
//!
//! // Tampered tokens read as "no session"
//! let forged = format!("{}x", token);
//! assert!(store.get(&secret, &forged, &config).unwrap().is_empty());
//! ```
//!
//! ## Security Properties
//!
//! - **PBKDF2-HMAC**: Key derivation with tunable cost, cached per process
//! - **HMAC-SHA256**: Every token is signed; comparison is constant time
//! - **AES-256-GCM**: Optional confidentiality, opened only after the MAC verifies
//! - **Key separation**: Signing and encryption keys come from distinct salts
//! - **Memory safety**: `zeroize` on drop for secrets and derived keys

// Metrics and observability
pub mod metrics;
pub use metrics::OperationMetrics;

// Configuration
pub mod config;
pub use config::{
    ConfigError, CookieStoreConfig, KdfParams, KeyDigest, KeySpec, LogLevel, RotatingOptions,
    StoreOptions,
};

// Session payloads
pub mod codec;
pub use codec::{CodecError, PayloadFormat, SessionState};

// Key derivation and token sealing
pub mod crypto;
pub use crypto::{
    CacheStats, CryptoError, DerivedKey, KeyCache, KeyDeriver, KeyPurpose, MasterSecret,
    Pbkdf2Deriver, SecretError, TokenError,
};

// Store adapter
pub mod store;
pub use store::{CookieStore, SecretSource, SessionStore, StoreError};
