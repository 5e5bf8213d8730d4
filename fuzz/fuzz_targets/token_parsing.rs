#![no_main]

use std::sync::LazyLock;

use arbitrary::Arbitrary;
use cookiekit_core::crypto::message::{
    ENCRYPTED_HEADER, SIGNED_HEADER, encrypt_and_sign, sign, verify, verify_and_decrypt,
};
use cookiekit_core::DerivedKey;
use libfuzzer_sys::fuzz_target;
use ring::rand::SystemRandom;

static SIGNING_KEY: LazyLock<DerivedKey> = LazyLock::new(|| DerivedKey::from(vec![0x11; 32]));
static ENCRYPTION_KEY: LazyLock<DerivedKey> = LazyLock::new(|| DerivedKey::from(vec![0x22; 32]));

#[derive(Arbitrary, Debug)]
enum TokenInput {
    /// Completely arbitrary text
    Raw(String),
    /// Correct header, arbitrary segments
    Framed { encrypted: bool, segments: Vec<String> },
    /// A genuine token with one byte flipped
    Flipped { encrypted: bool, payload: Vec<u8>, position: usize, xor: u8 },
}

fuzz_target!(|input: TokenInput| {
    // Attack: Feed attacker-controlled cookie values to the token parser
    // Validates: No panics, no acceptance without a valid MAC
    // (guessing a 32-byte HMAC is not a realistic fuzz outcome)

    match input {
        TokenInput::Raw(token) => {
            assert!(verify(&token, &SIGNING_KEY).is_err());
            assert!(verify_and_decrypt(&token, &ENCRYPTION_KEY, &SIGNING_KEY).is_err());
        }
        TokenInput::Framed { encrypted, segments } => {
            let header = if encrypted { ENCRYPTED_HEADER } else { SIGNED_HEADER };
            let token = format!("{}.{}", header, segments.join("."));
            assert!(verify(&token, &SIGNING_KEY).is_err());
            assert!(verify_and_decrypt(&token, &ENCRYPTION_KEY, &SIGNING_KEY).is_err());
        }
        TokenInput::Flipped { encrypted, payload, position, xor } => {
            if xor == 0 {
                return;
            }
            let token = if encrypted {
                encrypt_and_sign(&payload, &ENCRYPTION_KEY, &SIGNING_KEY, &SystemRandom::new())
                    .expect("sealing should succeed")
            } else {
                sign(&payload, &SIGNING_KEY)
            };

            let mut bytes = token.into_bytes();
            let pos = position % bytes.len();
            bytes[pos] ^= xor;
            // Non-UTF-8 results can never reach the parser as &str
            let Ok(tampered) = String::from_utf8(bytes) else {
                return;
            };

            if encrypted {
                assert!(verify_and_decrypt(&tampered, &ENCRYPTION_KEY, &SIGNING_KEY).is_err());
            } else {
                assert!(verify(&tampered, &SIGNING_KEY).is_err());
            }
        }
    }
});
