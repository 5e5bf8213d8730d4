//! Cookie Cryptography Module
//!
//! Provides the primitives behind session tokens: PBKDF2 key derivation with
//! a bounded key cache, HMAC-SHA256 signing, and AES-256-GCM encryption.
//!
//! # Features
//! - **AES-256-GCM + HMAC-SHA256** via the ring library (fixed suite)
//! - PBKDF2-HMAC key derivation with configurable cost and digest
//! - Purpose separation: signing and encryption keys come from distinct salts
//! - Verify-then-decrypt ordering with constant-time MAC comparison

pub mod key_cache;
pub mod key_derivation;
pub mod message;

// Re-exports for convenience
pub use key_cache::{CacheStats, KeyCache, KeyDeriver, Pbkdf2Deriver};
pub use key_derivation::{DerivedKey, MasterSecret, SecretError, derive_key, key_fingerprint};
pub use message::{
    CryptoError, TokenError, encrypt_and_sign, sign, verify, verify_and_decrypt,
};

/// What a derived key is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Keys for the HMAC over the whole token
    Signing,
    /// Keys for AES-256-GCM
    Encryption,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::Signing => "signing",
            KeyPurpose::Encryption => "encryption",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KdfParams;

    #[test]
    fn test_purpose_strings() {
        assert_eq!(KeyPurpose::Signing.as_str(), "signing");
        assert_eq!(KeyPurpose::Encryption.as_str(), "encryption");
    }

    #[test]
    fn test_purposes_get_independent_keys() {
        // Textually close salts still give unrelated keys
        let secret = [0x5au8; 64];
        let params = KdfParams::default();
        let sign = derive_key(&secret, "cookie", &params).unwrap();
        let enc = derive_key(&secret, "cookie ", &params).unwrap();

        assert_ne!(sign.as_bytes(), enc.as_bytes());
        assert_ne!(sign.fingerprint(), enc.fingerprint());
    }
}
