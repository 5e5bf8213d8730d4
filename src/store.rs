//! Cookie session store: the authenticated adapter between session state and
//! an opaque client-held token.
//!
//! The store owns no session data. `put` turns a [`SessionState`] into a
//! token; `get` turns a token back into state. Everything security-relevant
//! happens in a fixed order:
//!
//! 1. Validate the master secret (loud failure, [`SecretError`])
//! 2. Fetch the signing key, and the encryption key if enabled, from the
//!    [`KeyCache`]
//! 3. Verify the MAC, then decrypt (never the reverse)
//! 4. Decode the payload
//!
//! Any failure in steps 3-4 yields an empty session. The caller cannot tell a
//! missing cookie from a forged, stale, or garbled one; the reason is only
//! logged, at the level configured in [`LogLevel`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ring::rand::SystemRandom;
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::codec::{self, CodecError, SessionState};
use crate::config::{ConfigError, CookieStoreConfig, KeySpec, LogLevel, StoreOptions};
use crate::crypto::key_derivation::validate_secret;
use crate::crypto::{
    CryptoError, DerivedKey, KeyCache, KeyDeriver, KeyPurpose, MasterSecret, Pbkdf2Deriver,
    SecretError, TokenError, encrypt_and_sign, sign, verify, verify_and_decrypt,
};
use crate::metrics::OperationMetrics;

/// Browsers commonly drop cookies larger than this.
pub const COOKIE_SIZE_LIMIT: usize = 4096;

/// Errors surfaced by store operations.
///
/// Token problems are absent on purpose: they never escape `get`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("failed to encode session: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to seal session: {0}")]
    Crypto(#[from] CryptoError),
}

/// Where the store gets the master secret for a request.
///
/// Implemented by whatever carries per-request context in the host; a bare
/// [`MasterSecret`] works too.
pub trait SecretSource {
    /// The master secret, or `None` if the host has not configured one.
    fn secret_key_base(&self) -> Option<&[u8]>;
}

impl SecretSource for MasterSecret {
    fn secret_key_base(&self) -> Option<&[u8]> {
        Some(self.as_bytes())
    }
}

impl SecretSource for Option<MasterSecret> {
    fn secret_key_base(&self) -> Option<&[u8]> {
        self.as_ref().map(MasterSecret::as_bytes)
    }
}

impl SecretSource for [u8] {
    fn secret_key_base(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl SecretSource for Vec<u8> {
    fn secret_key_base(&self) -> Option<&[u8]> {
        Some(self.as_slice())
    }
}

/// The contract a host session framework dispatches to.
///
/// Session ids are part of the contract but meaningless here: all state
/// lives in the token, so `get` never returns one and `put`/`delete` ignore
/// theirs.
pub trait SessionStore {
    type Config;

    /// Validate construction-time options.
    fn init(options: StoreOptions) -> Result<Self::Config, ConfigError>
    where
        Self: Sized;

    /// Rebuild session state from a token.
    fn get<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        token: &str,
        config: &Self::Config,
    ) -> Result<(Option<String>, SessionState), StoreError>;

    /// Seal session state into a token.
    fn put<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        session_id: Option<&str>,
        state: &SessionState,
        config: &Self::Config,
    ) -> Result<String, StoreError>;

    /// Forget a session. Nothing is stored server-side, so this always succeeds.
    fn delete<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        session_id: Option<&str>,
        config: &Self::Config,
    ) -> Result<(), StoreError>;
}

/// Keys for one [`KeySpec`].
struct SpecKeys {
    signing: Arc<DerivedKey>,
    encryption: Option<Arc<DerivedKey>>,
    cached: bool,
}

/// Encrypted, signed cookie session store.
///
/// Cheap to clone: clones share the key cache and metrics slot.
pub struct CookieStore<D: KeyDeriver = Pbkdf2Deriver> {
    keys: Arc<KeyCache<D>>,
    rng: SystemRandom,
    /// Last operation metrics (interior mutability for observability)
    last_metrics: Arc<Mutex<OperationMetrics>>,
}

impl CookieStore<Pbkdf2Deriver> {
    /// Create a store with its own default-sized key cache.
    pub fn new() -> Self {
        Self::with_key_cache(Arc::new(KeyCache::default()))
    }
}

impl Default for CookieStore<Pbkdf2Deriver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: KeyDeriver> Clone for CookieStore<D> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
            rng: self.rng.clone(),
            last_metrics: Arc::clone(&self.last_metrics),
        }
    }
}

impl<D: KeyDeriver> CookieStore<D> {
    /// Create a store around an existing key cache, typically one shared by
    /// every store in the process.
    pub fn with_key_cache(keys: Arc<KeyCache<D>>) -> Self {
        Self {
            keys,
            rng: SystemRandom::new(),
            last_metrics: Arc::new(Mutex::new(OperationMetrics::new())),
        }
    }

    pub fn key_cache(&self) -> &Arc<KeyCache<D>> {
        &self.keys
    }

    /// Snapshot of the metrics from the most recent `get` or `put`.
    ///
    /// The slot is shared by every clone and every concurrent caller, so
    /// under load it holds whichever operation finished last, not
    /// necessarily yours. Use [`get_with_metrics`](Self::get_with_metrics) or
    /// [`put_with_metrics`](Self::put_with_metrics) for per-request figures.
    pub fn last_metrics(&self) -> OperationMetrics {
        self.last_metrics.lock().clone()
    }

    fn record(&self, metrics: OperationMetrics) -> OperationMetrics {
        *self.last_metrics.lock() = metrics.clone();
        metrics
    }

    fn keys_for(&self, secret: &[u8], spec: &KeySpec) -> Result<SpecKeys, SecretError> {
        let (signing, signing_cached) =
            self.keys
                .get_or_derive(secret, spec.signing_salt(), spec.kdf_params())?;

        let (encryption, encryption_cached) = match spec.encryption_salt() {
            Some(salt) => {
                let (key, cached) = self.keys.get_or_derive(secret, salt, spec.kdf_params())?;
                (Some(key), cached)
            }
            None => (None, true),
        };

        trace!(
            purpose = KeyPurpose::Signing.as_str(),
            fingerprint = ?signing.fingerprint(),
            cached = signing_cached,
            "signing key ready"
        );
        if let Some(key) = &encryption {
            trace!(
                purpose = KeyPurpose::Encryption.as_str(),
                fingerprint = ?key.fingerprint(),
                cached = encryption_cached,
                "encryption key ready"
            );
        }

        Ok(SpecKeys {
            signing,
            encryption,
            cached: signing_cached && encryption_cached,
        })
    }

    /// Rebuild session state from `token`.
    ///
    /// Returns an empty session for any token that fails to authenticate,
    /// decrypt, or decode. Only an unusable master secret is an error.
    pub fn get<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        token: &str,
        config: &CookieStoreConfig,
    ) -> Result<SessionState, StoreError> {
        self.get_with_metrics(context, token, config)
            .map(|(state, _)| state)
    }

    /// [`get`](Self::get), also returning this call's own metrics.
    #[instrument(skip_all, fields(token_len = token.len(), encrypted = config.encryption_enabled()))]
    pub fn get_with_metrics<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        token: &str,
        config: &CookieStoreConfig,
    ) -> Result<(SessionState, OperationMetrics), StoreError> {
        let secret = validate_secret(context.secret_key_base())?;

        if token.is_empty() {
            trace!("no session token");
            return Ok((SessionState::default(), self.record(OperationMetrics::new())));
        }

        let mut key_time = Duration::ZERO;
        let mut crypto_time = Duration::ZERO;
        let mut all_cached = true;
        let mut last_error = TokenError::Malformed("no key spec accepted the token");

        for (index, spec) in config.read_specs().enumerate() {
            let key_start = Instant::now();
            let keys = self.keys_for(secret, spec)?;
            key_time += key_start.elapsed();
            all_cached &= keys.cached;

            let crypto_start = Instant::now();
            let opened = match &keys.encryption {
                Some(encryption) => verify_and_decrypt(token, encryption, &keys.signing),
                None => verify(token, &keys.signing),
            };
            crypto_time += crypto_start.elapsed();

            let payload = match opened {
                Ok(payload) => payload,
                Err(e) => {
                    last_error = e;
                    continue;
                }
            };

            if index > 0 {
                debug!(rotation_index = index - 1, "token accepted by rotating key spec");
            }

            let codec_start = Instant::now();
            let decoded = codec::try_decode(&payload);
            let metrics = OperationMetrics::new()
                .with_keys(micros(key_time), all_cached)
                .with_crypto(micros(crypto_time), spec.encryption_enabled(), token.len())
                .with_codec(micros(codec_start.elapsed()), payload.len());

            return match decoded {
                Ok(state) => Ok((state, self.record(metrics))),
                Err(e) => {
                    let e = TokenError::from(e);
                    log_rejection(config.log_level(), &e);
                    let metrics = self.record(metrics.with_rejection(e.kind()));
                    Ok((SessionState::default(), metrics))
                }
            };
        }

        log_rejection(config.log_level(), &last_error);
        let metrics = self.record(
            OperationMetrics::new()
                .with_keys(micros(key_time), all_cached)
                .with_crypto(micros(crypto_time), config.encryption_enabled(), token.len())
                .with_rejection(last_error.kind()),
        );
        Ok((SessionState::default(), metrics))
    }

    /// Seal `state` into a token using the primary key spec.
    pub fn put<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        state: &SessionState,
        config: &CookieStoreConfig,
    ) -> Result<String, StoreError> {
        self.put_with_metrics(context, state, config)
            .map(|(token, _)| token)
    }

    /// [`put`](Self::put), also returning this call's own metrics.
    #[instrument(skip_all, fields(entries = state.len(), encrypted = config.encryption_enabled()))]
    pub fn put_with_metrics<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        state: &SessionState,
        config: &CookieStoreConfig,
    ) -> Result<(String, OperationMetrics), StoreError> {
        let secret = validate_secret(context.secret_key_base())?;

        let codec_start = Instant::now();
        let payload = codec::encode(state, config.serializer())?;
        let codec_time = codec_start.elapsed();

        let key_start = Instant::now();
        let keys = self.keys_for(secret, config.primary())?;
        let key_time = key_start.elapsed();

        let crypto_start = Instant::now();
        let token = match &keys.encryption {
            Some(encryption) => encrypt_and_sign(&payload, encryption, &keys.signing, &self.rng)?,
            None => sign(&payload, &keys.signing),
        };
        let crypto_time = crypto_start.elapsed();

        if token.len() > COOKIE_SIZE_LIMIT {
            warn!(
                token_len = token.len(),
                limit = COOKIE_SIZE_LIMIT,
                "session token exceeds the browser cookie size limit"
            );
        }

        let metrics = self.record(
            OperationMetrics::new()
                .with_keys(micros(key_time), keys.cached)
                .with_crypto(micros(crypto_time), keys.encryption.is_some(), token.len())
                .with_codec(micros(codec_time), payload.len()),
        );

        Ok((token, metrics))
    }

    /// No-op: ending a session is a `put` of an empty state.
    pub fn delete<C: SecretSource + ?Sized>(
        &self,
        _context: &C,
        _config: &CookieStoreConfig,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<D: KeyDeriver> SessionStore for CookieStore<D> {
    type Config = CookieStoreConfig;

    fn init(options: StoreOptions) -> Result<Self::Config, ConfigError> {
        CookieStoreConfig::init(options)
    }

    fn get<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        token: &str,
        config: &Self::Config,
    ) -> Result<(Option<String>, SessionState), StoreError> {
        CookieStore::get(self, context, token, config).map(|state| (None, state))
    }

    fn put<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        _session_id: Option<&str>,
        state: &SessionState,
        config: &Self::Config,
    ) -> Result<String, StoreError> {
        CookieStore::put(self, context, state, config)
    }

    fn delete<C: SecretSource + ?Sized>(
        &self,
        context: &C,
        _session_id: Option<&str>,
        config: &Self::Config,
    ) -> Result<(), StoreError> {
        CookieStore::delete(self, context, config)
    }
}

/// Whole microseconds, saturating instead of truncating.
fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

fn log_rejection(level: LogLevel, e: &TokenError) {
    let kind = e.kind();
    match level {
        LogLevel::Off => {}
        LogLevel::Error => error!(kind, error = %e, "discarding session token"),
        LogLevel::Warn => warn!(kind, error = %e, "discarding session token"),
        LogLevel::Info => info!(kind, error = %e, "discarding session token"),
        LogLevel::Debug => debug!(kind, error = %e, "discarding session token"),
        LogLevel::Trace => trace!(kind, error = %e, "discarding session token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secret() -> MasterSecret {
        MasterSecret::new(vec![b'a'; 64])
    }

    fn encrypted_config() -> CookieStoreConfig {
        CookieStoreConfig::init(
            StoreOptions::new()
                .with_encryption_salt("enc")
                .with_signing_salt("sig"),
        )
        .unwrap()
    }

    fn signed_config() -> CookieStoreConfig {
        CookieStoreConfig::init(
            StoreOptions::new()
                .with_encrypt(false)
                .with_signing_salt("sig"),
        )
        .unwrap()
    }

    fn user_state() -> SessionState {
        let mut state = SessionState::new();
        state.insert("user_id", 42);
        state
    }

    #[test]
    fn test_encrypted_roundtrip() {
        let store = CookieStore::new();
        let config = encrypted_config();

        let token = store.put(&secret(), &user_state(), &config).unwrap();
        let state = store.get(&secret(), &token, &config).unwrap();

        assert_eq!(state.get("user_id"), Some(&json!(42)));
        assert_eq!(state, user_state());
    }

    #[test]
    fn test_last_character_replaced() {
        let store = CookieStore::new();
        let config = encrypted_config();

        let token = store.put(&secret(), &user_state(), &config).unwrap();
        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        assert!(store.get(&secret(), &tampered, &config).unwrap().is_empty());
        assert!(store.last_metrics().rejection.is_some());
    }

    #[test]
    fn test_signed_roundtrip_never_derives_encryption_key() {
        let store = CookieStore::new();
        let config = signed_config();

        let token = store.put(&secret(), &user_state(), &config).unwrap();
        assert!(token.starts_with("SFMyNTY."));
        assert_eq!(store.get(&secret(), &token, &config).unwrap(), user_state());

        // Only the signing key was ever derived
        assert_eq!(store.key_cache().stats().misses, 1);
        assert_eq!(store.key_cache().len(), 1);
    }

    #[test]
    fn test_empty_token_is_empty_session() {
        let store = CookieStore::new();
        let state = store.get(&secret(), "", &encrypted_config()).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_secret_errors_are_loud() {
        let store = CookieStore::new();
        let config = encrypted_config();
        let short = MasterSecret::new(vec![b'a'; 63]);
        let missing: Option<MasterSecret> = None;

        assert_eq!(
            store.put(&short, &user_state(), &config),
            Err(StoreError::Secret(SecretError::TooShort { len: 63 }))
        );
        assert_eq!(
            store.get(&short, "anything", &config),
            Err(StoreError::Secret(SecretError::TooShort { len: 63 }))
        );
        assert_eq!(
            store.get(&missing, "", &config),
            Err(StoreError::Secret(SecretError::Missing))
        );
    }

    #[test]
    fn test_metrics_recorded() {
        let store = CookieStore::new();
        let config = encrypted_config();

        let token = store.put(&secret(), &user_state(), &config).unwrap();
        let put_metrics = store.last_metrics();
        assert_eq!(put_metrics.encrypted, Some(true));
        assert_eq!(put_metrics.token_bytes, token.len());
        assert!(!put_metrics.keys_cached);

        store.get(&secret(), &token, &config).unwrap();
        let get_metrics = store.last_metrics();
        assert!(get_metrics.keys_cached);
        assert_eq!(get_metrics.rejection, None);

        store.get(&secret(), "garbage", &config).unwrap();
        assert_eq!(store.last_metrics().rejection.as_deref(), Some("malformed"));
    }

    #[test]
    fn test_delete_always_succeeds() {
        let store = CookieStore::new();
        let config = encrypted_config();
        assert_eq!(store.delete(&secret(), &config), Ok(()));
        assert_eq!(
            SessionStore::delete(&store, &secret(), Some("ignored"), &config),
            Ok(())
        );
    }

    #[test]
    fn test_store_contract() {
        let config = <CookieStore as SessionStore>::init(
            StoreOptions::new()
                .with_encryption_salt("enc")
                .with_signing_salt("sig"),
        )
        .unwrap();
        let store = CookieStore::new();
        let secret = vec![7u8; 64];

        let token = SessionStore::put(&store, &secret, None, &user_state(), &config).unwrap();
        let (session_id, state) = SessionStore::get(&store, &secret, &token, &config).unwrap();

        assert_eq!(session_id, None);
        assert_eq!(state, user_state());
    }

    #[test]
    fn test_micros_saturates() {
        assert_eq!(micros(Duration::from_micros(1500)), 1500);
        assert_eq!(micros(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_with_metrics_reports_own_call() {
        let store = CookieStore::new();
        let config = encrypted_config();

        let (token, put_metrics) = store
            .put_with_metrics(&secret(), &user_state(), &config)
            .unwrap();
        assert_eq!(put_metrics.token_bytes, token.len());
        assert_eq!(put_metrics, store.last_metrics());

        let (state, get_metrics) = store.get_with_metrics(&secret(), &token, &config).unwrap();
        assert_eq!(state, user_state());
        assert_eq!(get_metrics.token_bytes, token.len());
        assert_eq!(get_metrics.rejection, None);

        // A later call replaces the shared slot but not the returned copy
        store.get(&secret(), "garbage", &config).unwrap();
        assert_eq!(get_metrics.rejection, None);
        assert_eq!(store.last_metrics().rejection.as_deref(), Some("malformed"));
    }

    #[test]
    fn test_deep_state_refused_before_key_derivation() {
        let mut value = json!(1);
        for _ in 0..700 {
            value = json!([value]);
        }
        let mut state = SessionState::new();
        state.insert("deep", value);

        let store = CookieStore::new();
        assert_eq!(
            store.put(&secret(), &state, &encrypted_config()),
            Err(StoreError::Codec(CodecError::TooDeep))
        );
        assert_eq!(store.key_cache().stats().misses, 0);
    }

    #[test]
    fn test_clones_share_cache() {
        let store = CookieStore::new();
        let clone = store.clone();
        let config = encrypted_config();

        store.put(&secret(), &user_state(), &config).unwrap();
        clone.put(&secret(), &user_state(), &config).unwrap();

        assert_eq!(store.key_cache().stats().misses, 2);
        assert_eq!(clone.key_cache().stats().hits, 2);
    }
}
