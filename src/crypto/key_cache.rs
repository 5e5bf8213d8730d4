//! Process-wide cache of derived keys.
//!
//! PBKDF2 is deliberately slow, so each `(secret, salt, params)` combination
//! is derived once and reused by every request afterwards. The cache is an
//! explicit object owned by whoever composes the store; it is never a global.
//!
//! - Bounded LRU so many secret/salt combinations cannot grow memory forever
//! - Keyed by a fingerprint of the secret, never the secret itself
//! - The mutex covers only check-and-insert; derivation runs unlocked

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::key_derivation::{DerivedKey, SecretError, derive_key, key_fingerprint, validate_secret};
use crate::config::KdfParams;

/// Default maximum number of cached keys.
///
/// Each entry is a handful of bytes; a deployment normally needs two
/// (signing + encryption) per secret, plus two per rotating key spec.
pub const DEFAULT_KEY_CACHE_CAPACITY: usize = 256;

/// The derivation function behind the cache.
///
/// [`Pbkdf2Deriver`] is the production implementation. Tests inject their
/// own to observe how often the expensive path runs.
pub trait KeyDeriver: Send + Sync {
    fn derive(
        &self,
        secret: &[u8],
        salt: &str,
        params: &KdfParams,
    ) -> Result<DerivedKey, SecretError>;
}

/// PBKDF2-HMAC derivation via `ring`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pbkdf2Deriver;

impl KeyDeriver for Pbkdf2Deriver {
    fn derive(
        &self,
        secret: &[u8],
        salt: &str,
        params: &KdfParams,
    ) -> Result<DerivedKey, SecretError> {
        derive_key(secret, salt, params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    secret_fingerprint: [u8; 16],
    salt: String,
    params: KdfParams,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to derive
    pub misses: u64,
    /// Entries dropped to respect capacity
    pub evictions: u64,
    /// Entries currently held
    pub entries: usize,
}

/// Bounded LRU cache of derived keys.
pub struct KeyCache<D: KeyDeriver = Pbkdf2Deriver> {
    entries: Mutex<LruCache<CacheKey, Arc<DerivedKey>>>,
    deriver: D,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl KeyCache<Pbkdf2Deriver> {
    /// Create a PBKDF2-backed cache holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self::with_deriver(capacity, Pbkdf2Deriver)
    }
}

impl Default for KeyCache<Pbkdf2Deriver> {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_CACHE_CAPACITY)
    }
}

impl<D: KeyDeriver> KeyCache<D> {
    /// Create a cache around a custom deriver. A capacity of zero is treated
    /// as one.
    pub fn with_deriver(capacity: usize, deriver: D) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            deriver,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// The deriver behind this cache.
    pub fn deriver(&self) -> &D {
        &self.deriver
    }

    /// Return the key for `(secret, salt, params)`, deriving it on first use.
    ///
    /// The secret is validated on every call, hit or miss, so a short secret
    /// fails the same way regardless of cache state. Returns the key and
    /// whether it came from the cache.
    pub fn get_or_derive(
        &self,
        secret: &[u8],
        salt: &str,
        params: &KdfParams,
    ) -> Result<(Arc<DerivedKey>, bool), SecretError> {
        let secret = validate_secret(Some(secret))?;

        let cache_key = CacheKey {
            secret_fingerprint: key_fingerprint(secret),
            salt: salt.to_owned(),
            params: *params,
        };

        if let Some(key) = self.entries.lock().get(&cache_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(salt = %salt, "derived key served from cache");
            return Ok((Arc::clone(key), true));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            salt = %salt,
            iterations = params.iterations,
            key_length = params.key_length,
            digest = params.digest.as_str(),
            "deriving key"
        );
        let derived = Arc::new(self.deriver.derive(secret, salt, params)?);

        let mut entries = self.entries.lock();
        // Another request may have derived the same key while we were unlocked
        if let Some(existing) = entries.get(&cache_key) {
            return Ok((Arc::clone(existing), false));
        }
        if let Some((evicted, _)) = entries.push(cache_key.clone(), Arc::clone(&derived)) {
            if evicted != cache_key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(salt = %evicted.salt, "evicted least recently used key");
            }
        }

        Ok((derived, false))
    }

    /// Drop every cached key.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
