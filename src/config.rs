//! Store configuration: raw options in, validated immutable config out.
//!
//! [`StoreOptions`] is what a host deserializes or builds; it is allowed to be
//! incomplete. [`CookieStoreConfig::init`] validates it once at startup and
//! produces the read-only [`CookieStoreConfig`] shared by every request.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::PayloadFormat;

/// Default PBKDF2 iteration count.
pub const DEFAULT_KEY_ITERATIONS: u32 = 1000;

/// Default derived key length in bytes.
pub const DEFAULT_KEY_LENGTH: usize = 32;

/// Upper bound on derived key length.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Bytes of key material AES-256-GCM consumes.
pub const ENCRYPTION_KEY_LENGTH: usize = 32;

/// Errors raised while validating store options.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("signing_salt is required")]
    MissingSigningSalt,

    #[error("encryption_salt is required when encryption is enabled")]
    MissingEncryptionSalt,

    #[error("encryption_salt and signing_salt must differ")]
    SharedSalt,

    #[error("key_iterations must be at least 1")]
    InvalidIterations,

    #[error("invalid key_length {length}: {reason}")]
    InvalidKeyLength { length: usize, reason: &'static str },

    #[error("rotating_options[{index}]: {source}")]
    Rotating {
        index: usize,
        #[source]
        source: Box<ConfigError>,
    },
}

/// Hash function driving PBKDF2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDigest {
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl KeyDigest {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyDigest::Sha1 => "sha1",
            KeyDigest::Sha256 => "sha256",
            KeyDigest::Sha384 => "sha384",
            KeyDigest::Sha512 => "sha512",
        }
    }
}

/// PBKDF2 cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
    pub key_length: usize,
    pub digest: KeyDigest,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KEY_ITERATIONS,
            key_length: DEFAULT_KEY_LENGTH,
            digest: KeyDigest::Sha256,
        }
    }
}

impl KdfParams {
    fn validate(&self, encrypted: bool) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::InvalidIterations);
        }
        if self.key_length == 0 {
            return Err(ConfigError::InvalidKeyLength {
                length: self.key_length,
                reason: "must be at least 1",
            });
        }
        if self.key_length > MAX_KEY_LENGTH {
            return Err(ConfigError::InvalidKeyLength {
                length: self.key_length,
                reason: "exceeds 1024 bytes",
            });
        }
        if encrypted && self.key_length < ENCRYPTION_KEY_LENGTH {
            return Err(ConfigError::InvalidKeyLength {
                length: self.key_length,
                reason: "encryption needs at least 32 bytes",
            });
        }
        Ok(())
    }
}

/// Level at which rejected tokens are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    #[default]
    Debug,
    Trace,
}

fn default_encrypt() -> bool {
    true
}

fn default_key_iterations() -> u32 {
    DEFAULT_KEY_ITERATIONS
}

fn default_key_length() -> usize {
    DEFAULT_KEY_LENGTH
}

/// Construction-time options, as supplied by the host.
///
/// Deserializable with defaults for every field, so a minimal JSON config is
/// `{"encryption_salt": "...", "signing_salt": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    #[serde(default = "default_encrypt")]
    pub encrypt: bool,
    pub encryption_salt: Option<String>,
    pub signing_salt: Option<String>,
    #[serde(default = "default_key_iterations")]
    pub key_iterations: u32,
    #[serde(default = "default_key_length")]
    pub key_length: usize,
    pub key_digest: KeyDigest,
    pub serializer: PayloadFormat,
    pub log: LogLevel,
    /// Previous key specs still accepted when reading tokens
    pub rotating_options: Vec<RotatingOptions>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            encrypt: true,
            encryption_salt: None,
            signing_salt: None,
            key_iterations: DEFAULT_KEY_ITERATIONS,
            key_length: DEFAULT_KEY_LENGTH,
            key_digest: KeyDigest::Sha256,
            serializer: PayloadFormat::default(),
            log: LogLevel::default(),
            rotating_options: Vec::new(),
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn with_encryption_salt(mut self, salt: impl Into<String>) -> Self {
        self.encryption_salt = Some(salt.into());
        self
    }

    pub fn with_signing_salt(mut self, salt: impl Into<String>) -> Self {
        self.signing_salt = Some(salt.into());
        self
    }

    pub fn with_key_iterations(mut self, iterations: u32) -> Self {
        self.key_iterations = iterations;
        self
    }

    pub fn with_key_length(mut self, length: usize) -> Self {
        self.key_length = length;
        self
    }

    pub fn with_key_digest(mut self, digest: KeyDigest) -> Self {
        self.key_digest = digest;
        self
    }

    pub fn with_serializer(mut self, format: PayloadFormat) -> Self {
        self.serializer = format;
        self
    }

    pub fn with_log(mut self, level: LogLevel) -> Self {
        self.log = level;
        self
    }

    pub fn with_rotating(mut self, options: RotatingOptions) -> Self {
        self.rotating_options.push(options);
        self
    }

    fn kdf_params(&self) -> KdfParams {
        KdfParams {
            iterations: self.key_iterations,
            key_length: self.key_length,
            digest: self.key_digest,
        }
    }
}

/// A previous key spec kept readable during a salt or cost migration.
///
/// Encryption is on exactly when `encryption_salt` is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatingOptions {
    pub encryption_salt: Option<String>,
    pub signing_salt: Option<String>,
    #[serde(default = "default_key_iterations")]
    pub key_iterations: u32,
    #[serde(default = "default_key_length")]
    pub key_length: usize,
    pub key_digest: KeyDigest,
}

impl Default for RotatingOptions {
    fn default() -> Self {
        Self {
            encryption_salt: None,
            signing_salt: None,
            key_iterations: DEFAULT_KEY_ITERATIONS,
            key_length: DEFAULT_KEY_LENGTH,
            key_digest: KeyDigest::Sha256,
        }
    }
}

impl RotatingOptions {
    pub fn new(signing_salt: impl Into<String>) -> Self {
        Self {
            signing_salt: Some(signing_salt.into()),
            ..Self::default()
        }
    }

    pub fn with_encryption_salt(mut self, salt: impl Into<String>) -> Self {
        self.encryption_salt = Some(salt.into());
        self
    }

    pub fn with_key_iterations(mut self, iterations: u32) -> Self {
        self.key_iterations = iterations;
        self
    }

    pub fn with_key_length(mut self, length: usize) -> Self {
        self.key_length = length;
        self
    }

    pub fn with_key_digest(mut self, digest: KeyDigest) -> Self {
        self.key_digest = digest;
        self
    }

    fn validate(&self) -> Result<KeySpec, ConfigError> {
        let encrypt = non_empty(&self.encryption_salt).is_some();
        KeySpec::build(
            encrypt,
            &self.encryption_salt,
            &self.signing_salt,
            KdfParams {
                iterations: self.key_iterations,
                key_length: self.key_length,
                digest: self.key_digest,
            },
        )
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// One validated set of salts and KDF parameters.
///
/// `encryption_salt` is `Some` exactly when encryption is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    encryption_salt: Option<String>,
    signing_salt: String,
    kdf_params: KdfParams,
}

impl KeySpec {
    fn build(
        encrypt: bool,
        encryption_salt: &Option<String>,
        signing_salt: &Option<String>,
        kdf_params: KdfParams,
    ) -> Result<Self, ConfigError> {
        let signing_salt = non_empty(signing_salt).ok_or(ConfigError::MissingSigningSalt)?;

        let encryption_salt = if encrypt {
            let salt = non_empty(encryption_salt).ok_or(ConfigError::MissingEncryptionSalt)?;
            if salt == signing_salt {
                return Err(ConfigError::SharedSalt);
            }
            Some(salt.to_owned())
        } else {
            None
        };

        kdf_params.validate(encrypt)?;

        Ok(Self {
            encryption_salt,
            signing_salt: signing_salt.to_owned(),
            kdf_params,
        })
    }

    pub fn encryption_enabled(&self) -> bool {
        self.encryption_salt.is_some()
    }

    pub fn encryption_salt(&self) -> Option<&str> {
        self.encryption_salt.as_deref()
    }

    pub fn signing_salt(&self) -> &str {
        &self.signing_salt
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.kdf_params
    }
}

/// Validated, immutable store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieStoreConfig {
    primary: KeySpec,
    rotating: Vec<KeySpec>,
    serializer: PayloadFormat,
    log: LogLevel,
}

impl CookieStoreConfig {
    /// Validate `options` into a configuration.
    ///
    /// Fails when `signing_salt` is absent, or when encryption is enabled and
    /// `encryption_salt` is absent. Empty strings count as absent.
    pub fn init(options: StoreOptions) -> Result<Self, ConfigError> {
        let primary = KeySpec::build(
            options.encrypt,
            &options.encryption_salt,
            &options.signing_salt,
            options.kdf_params(),
        )?;

        let rotating = options
            .rotating_options
            .iter()
            .enumerate()
            .map(|(index, rotating)| {
                rotating.validate().map_err(|e| ConfigError::Rotating {
                    index,
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            primary,
            rotating,
            serializer: options.serializer,
            log: options.log,
        })
    }

    /// Key spec used for writing, and tried first for reading.
    pub fn primary(&self) -> &KeySpec {
        &self.primary
    }

    /// Older key specs accepted for reading, in priority order.
    pub fn rotating(&self) -> &[KeySpec] {
        &self.rotating
    }

    /// Every key spec accepted for reading, primary first.
    pub fn read_specs(&self) -> impl Iterator<Item = &KeySpec> {
        std::iter::once(&self.primary).chain(self.rotating.iter())
    }

    pub fn encryption_enabled(&self) -> bool {
        self.primary.encryption_enabled()
    }

    pub fn encryption_salt(&self) -> Option<&str> {
        self.primary.encryption_salt()
    }

    pub fn signing_salt(&self) -> &str {
        self.primary.signing_salt()
    }

    pub fn kdf_params(&self) -> &KdfParams {
        self.primary.kdf_params()
    }

    pub fn serializer(&self) -> PayloadFormat {
        self.serializer
    }

    pub fn log_level(&self) -> LogLevel {
        self.log
    }
}

impl TryFrom<StoreOptions> for CookieStoreConfig {
    type Error = ConfigError;

    fn try_from(options: StoreOptions) -> Result<Self, Self::Error> {
        Self::init(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypted() -> StoreOptions {
        StoreOptions::new()
            .with_encryption_salt("enc")
            .with_signing_salt("sig")
    }

    #[test]
    fn test_defaults() {
        let config = CookieStoreConfig::init(encrypted()).unwrap();

        assert!(config.encryption_enabled());
        assert_eq!(config.encryption_salt(), Some("enc"));
        assert_eq!(config.signing_salt(), "sig");
        assert_eq!(config.kdf_params().iterations, 1000);
        assert_eq!(config.kdf_params().key_length, 32);
        assert_eq!(config.kdf_params().digest, KeyDigest::Sha256);
        assert_eq!(config.serializer(), PayloadFormat::MessagePack);
        assert_eq!(config.log_level(), LogLevel::Debug);
        assert!(config.rotating().is_empty());
    }

    #[test]
    fn test_signing_salt_required() {
        let options = StoreOptions::new().with_encryption_salt("enc");
        assert_eq!(
            CookieStoreConfig::init(options),
            Err(ConfigError::MissingSigningSalt)
        );

        let options = StoreOptions::new().with_encrypt(false);
        assert_eq!(
            CookieStoreConfig::init(options),
            Err(ConfigError::MissingSigningSalt)
        );
    }

    #[test]
    fn test_encryption_salt_required_when_encrypting() {
        let options = StoreOptions::new().with_signing_salt("sig");
        assert_eq!(
            CookieStoreConfig::init(options),
            Err(ConfigError::MissingEncryptionSalt)
        );
    }

    #[test]
    fn test_encryption_salt_optional_when_signing_only() {
        let options = StoreOptions::new()
            .with_encrypt(false)
            .with_signing_salt("sig");
        let config = CookieStoreConfig::init(options).unwrap();

        assert!(!config.encryption_enabled());
        assert_eq!(config.encryption_salt(), None);
    }

    #[test]
    fn test_encryption_salt_ignored_when_signing_only() {
        let options = encrypted().with_encrypt(false);
        let config = CookieStoreConfig::init(options).unwrap();

        assert!(!config.encryption_enabled());
        assert_eq!(config.encryption_salt(), None);
    }

    #[test]
    fn test_empty_salts_count_as_missing() {
        let options = StoreOptions::new()
            .with_encryption_salt("enc")
            .with_signing_salt("");
        assert_eq!(
            CookieStoreConfig::init(options),
            Err(ConfigError::MissingSigningSalt)
        );

        let options = StoreOptions::new()
            .with_encryption_salt("")
            .with_signing_salt("sig");
        assert_eq!(
            CookieStoreConfig::init(options),
            Err(ConfigError::MissingEncryptionSalt)
        );
    }

    #[test]
    fn test_shared_salt_rejected() {
        let options = StoreOptions::new()
            .with_encryption_salt("same")
            .with_signing_salt("same");
        assert_eq!(
            CookieStoreConfig::init(options),
            Err(ConfigError::SharedSalt)
        );
    }

    #[test]
    fn test_kdf_param_bounds() {
        assert_eq!(
            CookieStoreConfig::init(encrypted().with_key_iterations(0)),
            Err(ConfigError::InvalidIterations)
        );
        assert!(matches!(
            CookieStoreConfig::init(encrypted().with_key_length(0)),
            Err(ConfigError::InvalidKeyLength { length: 0, .. })
        ));
        assert!(matches!(
            CookieStoreConfig::init(encrypted().with_key_length(MAX_KEY_LENGTH + 1)),
            Err(ConfigError::InvalidKeyLength { .. })
        ));
        assert!(matches!(
            CookieStoreConfig::init(encrypted().with_key_length(16)),
            Err(ConfigError::InvalidKeyLength { length: 16, .. })
        ));

        // Signing alone accepts short keys
        let signed = StoreOptions::new()
            .with_encrypt(false)
            .with_signing_salt("sig")
            .with_key_length(16);
        assert!(CookieStoreConfig::init(signed).is_ok());
    }

    #[test]
    fn test_rotating_options_validated() {
        let options = encrypted()
            .with_rotating(RotatingOptions::new("old-sig").with_encryption_salt("old-enc"))
            .with_rotating(RotatingOptions::default());

        match CookieStoreConfig::init(options) {
            Err(ConfigError::Rotating { index, source }) => {
                assert_eq!(index, 1);
                assert_eq!(*source, ConfigError::MissingSigningSalt);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_rotating_encryption_follows_salt() {
        let options = encrypted()
            .with_rotating(RotatingOptions::new("old-sig").with_encryption_salt("old-enc"))
            .with_rotating(RotatingOptions::new("older-sig").with_key_iterations(500));
        let config = CookieStoreConfig::init(options).unwrap();

        assert_eq!(config.rotating().len(), 2);
        assert!(config.rotating()[0].encryption_enabled());
        assert!(!config.rotating()[1].encryption_enabled());
        assert_eq!(config.rotating()[1].kdf_params().iterations, 500);

        let salts: Vec<_> = config.read_specs().map(|spec| spec.signing_salt()).collect();
        assert_eq!(salts, vec!["sig", "old-sig", "older-sig"]);
    }

    #[test]
    fn test_deserialize_from_json() {
        let options: StoreOptions = serde_json::from_str(
            r#"{
                "encryption_salt": "enc",
                "signing_salt": "sig",
                "key_digest": "sha512",
                "serializer": "json",
                "log": "warn",
                "rotating_options": [{"signing_salt": "old"}]
            }"#,
        )
        .unwrap();

        assert!(options.encrypt);
        assert_eq!(options.key_iterations, 1000);
        assert_eq!(options.key_length, 32);

        let config = CookieStoreConfig::try_from(options).unwrap();
        assert_eq!(config.kdf_params().digest, KeyDigest::Sha512);
        assert_eq!(config.serializer(), PayloadFormat::Json);
        assert_eq!(config.log_level(), LogLevel::Warn);
        assert_eq!(config.rotating()[0].kdf_params().iterations, 1000);
    }

    #[test]
    fn test_deserialize_signing_only() {
        let options: StoreOptions =
            serde_json::from_str(r#"{"encrypt": false, "signing_salt": "sig"}"#).unwrap();
        assert!(CookieStoreConfig::init(options).is_ok());
    }
}
