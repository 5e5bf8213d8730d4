//! Key derivation using PBKDF2-HMAC
//!
//! Session keys are stretched from the deployment's master secret with PBKDF2
//! (RFC 8018) via `ring`. The iteration count is the cost knob: every extra
//! iteration is paid once per process (see [`KeyCache`](super::KeyCache)) but by
//! an offline attacker on every guess.
//!
//! Purpose separation comes from the salt: the signing key and the encryption
//! key are derived from the same secret under different salts.

use std::fmt;
use std::num::NonZeroU32;

use ring::pbkdf2;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{KdfParams, KeyDigest};

/// Minimum master secret length in bytes.
///
/// Below this the search space is small enough to brute force regardless of
/// the PBKDF2 iteration count.
pub const MIN_SECRET_LENGTH: usize = 64;

/// Errors raised for an unusable master secret.
///
/// These are deployment defects, not attacker input, and are always
/// propagated to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("master secret is missing")]
    Missing,

    #[error(
        "master secret too short: expected at least {min} bytes, got {len}",
        min = MIN_SECRET_LENGTH
    )]
    TooShort { len: usize },
}

/// Server-side master secret.
///
/// Zeroized on drop. `Debug` never prints the bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret(Vec<u8>);

impl MasterSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSecret")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// Key material derived for one purpose.
///
/// Clone is intentionally NOT derived; the cache hands out `Arc<DerivedKey>`
/// so key bytes exist once per cache entry.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey(Vec<u8>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fingerprint(&self) -> [u8; 16] {
        key_fingerprint(&self.0)
    }
}

impl From<Vec<u8>> for DerivedKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// Reject secrets that are absent or shorter than [`MIN_SECRET_LENGTH`].
pub fn validate_secret(secret: Option<&[u8]>) -> Result<&[u8], SecretError> {
    let secret = secret.ok_or(SecretError::Missing)?;
    if secret.is_empty() {
        return Err(SecretError::Missing);
    }
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(SecretError::TooShort { len: secret.len() });
    }
    Ok(secret)
}

fn pbkdf2_algorithm(digest: KeyDigest) -> pbkdf2::Algorithm {
    match digest {
        KeyDigest::Sha1 => pbkdf2::PBKDF2_HMAC_SHA1,
        KeyDigest::Sha256 => pbkdf2::PBKDF2_HMAC_SHA256,
        KeyDigest::Sha384 => pbkdf2::PBKDF2_HMAC_SHA384,
        KeyDigest::Sha512 => pbkdf2::PBKDF2_HMAC_SHA512,
    }
}

/// Derive `params.key_length` bytes from `secret` and `salt` with PBKDF2.
///
/// Deterministic: identical inputs always yield identical bytes. This is the
/// uncached primitive; request paths go through [`KeyCache`](super::KeyCache).
///
/// # Security Notes
/// - Secrets shorter than 64 bytes are rejected before any hashing
/// - `params` are validated at config time; an iteration count of zero is
///   treated as one rather than panicking
pub fn derive_key(
    secret: &[u8],
    salt: &str,
    params: &KdfParams,
) -> Result<DerivedKey, SecretError> {
    let secret = validate_secret(Some(secret))?;

    let iterations = NonZeroU32::new(params.iterations).unwrap_or(NonZeroU32::MIN);
    let mut out = vec![0u8; params.key_length];
    pbkdf2::derive(
        pbkdf2_algorithm(params.digest),
        iterations,
        salt.as_bytes(),
        secret,
        &mut out,
    );

    Ok(DerivedKey(out))
}

/// Generate a key fingerprint for identification and cache lookups
///
/// Creates a collision-resistant fingerprint of key material without
/// revealing it.
pub fn key_fingerprint(key: &[u8]) -> [u8; 16] {
    use sha2::Digest;

    let mut hasher = sha2::Sha256::new();
    hasher.update(b"cookiekit_fingerprint_v1");
    hasher.update(key);
    let hash = hasher.finalize();
    let mut result = [0u8; 16];
    result.copy_from_slice(&hash[..16]);
    result
}
