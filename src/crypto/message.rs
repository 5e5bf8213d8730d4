//! Token sealing: HMAC-SHA256 signing and AES-256-GCM encryption.
//!
//! Two token shapes, both dot-separated base64url (no padding) so they are
//! valid cookie values as-is:
//!
//! ```text
//! signed:    SFMyNTY.<payload>.<mac>
//! encrypted: QTI1NkdDTQ.<nonce>.<ciphertext>.<tag>.<mac>
//! ```
//!
//! The first segment is the protocol header (base64url of `HS256` and
//! `A256GCM`). The MAC always covers every byte before the final dot and is
//! keyed with the signing key; the AEAD uses the independent encryption key
//! with the header as associated data.
//!
//! # Verify-then-decrypt
//! [`verify_and_decrypt`] checks the MAC with `ring::hmac::verify` (constant
//! time) before it decodes the nonce or ciphertext segments and before any
//! AEAD open. A forged token never reaches the cipher.
//!
//! # Nonces
//! Nonces are 96 random bits from `SystemRandom`. Many server processes share
//! one derived key, so a per-process counter cannot guarantee uniqueness.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::hmac;
use ring::rand::SecureRandom;
use thiserror::Error;

use super::key_derivation::DerivedKey;
use crate::codec::CodecError;
use crate::config::ENCRYPTION_KEY_LENGTH;

/// Header segment of signed tokens: base64url("HS256").
pub const SIGNED_HEADER: &str = "SFMyNTY";

/// Header segment of encrypted tokens: base64url("A256GCM").
pub const ENCRYPTED_HEADER: &str = "QTI1NkdDTQ";

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// HMAC-SHA256 output length.
pub const MAC_LEN: usize = 32;

/// Longest token accepted for parsing (96 KiB).
///
/// Large enough for the base64 form of a maximum-size payload plus framing.
pub const MAX_TOKEN_SIZE: usize = 96 * 1024;

/// Why a client-supplied token was rejected.
///
/// Internal only: callers of the store always see an empty session, never
/// which of these occurred.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    #[error("unsupported token header")]
    UnsupportedHeader,

    #[error("signature verification failed")]
    SignatureMismatch,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("payload could not be decoded: {0}")]
    Decode(#[from] CodecError),
}

impl TokenError {
    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Malformed(_) => "malformed",
            TokenError::UnsupportedHeader => "unsupported_header",
            TokenError::SignatureMismatch => "signature_mismatch",
            TokenError::DecryptionFailed => "decryption_failed",
            TokenError::Decode(_) => "decode",
        }
    }
}

/// Failures while producing a token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error(
        "invalid encryption key length: expected at least {min} bytes, got {0}",
        min = ENCRYPTION_KEY_LENGTH
    )]
    InvalidKeyLength(usize),

    #[error("random number generation failed")]
    RngFailure,

    #[error("encryption failed")]
    SealFailed,
}

fn mac(signed_part: &str, signing_key: &DerivedKey) -> hmac::Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, signing_key.as_bytes());
    hmac::sign(&key, signed_part.as_bytes())
}

fn aead_key(encryption_key: &DerivedKey) -> Option<LessSafeKey> {
    let bytes = encryption_key.as_bytes().get(..ENCRYPTION_KEY_LENGTH)?;
    let unbound = UnboundKey::new(&AES_256_GCM, bytes).ok()?;
    Some(LessSafeKey::new(unbound))
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn unb64(segment: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed("invalid base64 segment"))
}

fn append_mac(mut signed_part: String, signing_key: &DerivedKey) -> String {
    let tag = mac(&signed_part, signing_key);
    signed_part.push('.');
    signed_part.push_str(&b64(tag.as_ref()));
    signed_part
}

/// Split `token` at its final dot and verify the MAC over the prefix.
///
/// Returns the authenticated prefix. Nothing after this call looks at
/// unauthenticated bytes.
fn check_mac<'t>(token: &'t str, signing_key: &DerivedKey) -> Result<&'t str, TokenError> {
    if token.len() > MAX_TOKEN_SIZE {
        return Err(TokenError::Malformed("token exceeds maximum size"));
    }

    let (signed_part, mac_segment) = token
        .rsplit_once('.')
        .ok_or(TokenError::Malformed("missing signature segment"))?;

    let mac_bytes = unb64(mac_segment)?;
    if mac_bytes.len() != MAC_LEN {
        return Err(TokenError::Malformed("wrong signature length"));
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, signing_key.as_bytes());
    hmac::verify(&key, signed_part.as_bytes(), &mac_bytes)
        .map_err(|_| TokenError::SignatureMismatch)?;

    Ok(signed_part)
}

/// Sign `payload` without encrypting it.
///
/// The payload is readable by the client; only tampering is prevented.
pub fn sign(payload: &[u8], signing_key: &DerivedKey) -> String {
    let signed_part = format!("{}.{}", SIGNED_HEADER, b64(payload));
    append_mac(signed_part, signing_key)
}

/// Verify a token produced by [`sign`] and return its payload.
pub fn verify(token: &str, signing_key: &DerivedKey) -> Result<Vec<u8>, TokenError> {
    let signed_part = check_mac(token, signing_key)?;

    let (header, payload) = signed_part
        .split_once('.')
        .ok_or(TokenError::Malformed("missing payload segment"))?;
    if header != SIGNED_HEADER {
        return Err(TokenError::UnsupportedHeader);
    }
    if payload.contains('.') {
        return Err(TokenError::Malformed("unexpected segment count"));
    }

    unb64(payload)
}

/// Encrypt `payload` with AES-256-GCM, then sign the result.
pub fn encrypt_and_sign(
    payload: &[u8],
    encryption_key: &DerivedKey,
    signing_key: &DerivedKey,
    rng: &dyn SecureRandom,
) -> Result<String, CryptoError> {
    let key = aead_key(encryption_key).ok_or(CryptoError::InvalidKeyLength(encryption_key.len()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| CryptoError::RngFailure)?;

    let mut ciphertext = payload.to_vec();
    let tag = key
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(ENCRYPTED_HEADER.as_bytes()),
            &mut ciphertext,
        )
        .map_err(|_| CryptoError::SealFailed)?;

    let signed_part = format!(
        "{}.{}.{}.{}",
        ENCRYPTED_HEADER,
        b64(&nonce_bytes),
        b64(&ciphertext),
        b64(tag.as_ref())
    );
    Ok(append_mac(signed_part, signing_key))
}

/// Verify a token produced by [`encrypt_and_sign`], then decrypt it.
///
/// The MAC is checked first; an unauthenticated token is rejected before
/// any segment is base64-decoded or handed to the cipher.
pub fn verify_and_decrypt(
    token: &str,
    encryption_key: &DerivedKey,
    signing_key: &DerivedKey,
) -> Result<Vec<u8>, TokenError> {
    let signed_part = check_mac(token, signing_key)?;

    let mut segments = signed_part.split('.');
    let (Some(header), Some(nonce), Some(ciphertext), Some(tag), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed("unexpected segment count"));
    };
    if header != ENCRYPTED_HEADER {
        return Err(TokenError::UnsupportedHeader);
    }

    let nonce: [u8; NONCE_LEN] = unb64(nonce)?
        .try_into()
        .map_err(|_| TokenError::Malformed("wrong nonce length"))?;
    let tag = unb64(tag)?;
    if tag.len() != TAG_LEN {
        return Err(TokenError::Malformed("wrong tag length"));
    }

    let key = aead_key(encryption_key).ok_or(TokenError::DecryptionFailed)?;

    let mut in_out = unb64(ciphertext)?;
    in_out.extend_from_slice(&tag);
    let plaintext_len = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(ENCRYPTED_HEADER.as_bytes()),
            &mut in_out,
        )
        .map_err(|_| TokenError::DecryptionFailed)?
        .len();
    in_out.truncate(plaintext_len);

    Ok(in_out)
}
