#![no_main]

use arbitrary::Arbitrary;
use cookiekit_core::crypto::key_derivation::{MIN_SECRET_LENGTH, derive_key};
use cookiekit_core::{KdfParams, KeyDigest, SecretError};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct KeyDerivationInput {
    secret: Vec<u8>,
    salt: String,
    iterations: u8,
    key_length: u8,
    digest: u8,
}

fuzz_target!(|input: KeyDerivationInput| {
    // Attack: Fuzz PBKDF2 derivation with arbitrary secrets, salts and parameters
    // Validates: No panics, length checks, determinism, salt separation

    let digest = match input.digest % 4 {
        0 => KeyDigest::Sha1,
        1 => KeyDigest::Sha256,
        2 => KeyDigest::Sha384,
        _ => KeyDigest::Sha512,
    };
    let params = KdfParams {
        // Keep iterations small so the fuzzer stays fast
        iterations: u32::from(input.iterations % 8) + 1,
        key_length: usize::from(input.key_length) + 1,
        digest,
    };

    match derive_key(&input.secret, &input.salt, &params) {
        Ok(key) => {
            assert!(input.secret.len() >= MIN_SECRET_LENGTH);
            assert_eq!(key.len(), params.key_length, "key length must match params");

            let again = derive_key(&input.secret, &input.salt, &params)
                .expect("Deterministic derivation should succeed again");
            assert_eq!(key.as_bytes(), again.as_bytes(), "derivation must be deterministic");

            let other_salt = format!("{}#", input.salt);
            let other = derive_key(&input.secret, &other_salt, &params)
                .expect("derivation with another salt should succeed");
            assert_ne!(key.as_bytes(), other.as_bytes(), "salts must separate keys");
        }
        Err(SecretError::TooShort { len }) => {
            assert_eq!(len, input.secret.len());
            assert!(len < MIN_SECRET_LENGTH);
        }
        Err(SecretError::Missing) => assert!(input.secret.is_empty()),
    }
});
