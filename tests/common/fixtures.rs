//! Test fixtures and constants for cookiekit-core tests.

use cookiekit_core::{CookieStoreConfig, MasterSecret, SessionState, StoreOptions};
use serde_json::json;

// ============================================================================
// Secrets
// ============================================================================

/// 64 repeated `'a'` bytes: the shortest acceptable master secret
pub const SECRET_A: &[u8; 64] = &[b'a'; 64];

/// A second valid secret for key sensitivity tests
pub const SECRET_B: &[u8; 64] = &[b'b'; 64];

pub fn secret_a() -> MasterSecret {
    MasterSecret::new(SECRET_A.to_vec())
}

pub fn secret_b() -> MasterSecret {
    MasterSecret::new(SECRET_B.to_vec())
}

// ============================================================================
// Options
// ============================================================================

pub fn encrypted_options() -> StoreOptions {
    StoreOptions::new()
        .with_encryption_salt("enc")
        .with_signing_salt("sig")
}

pub fn signed_options() -> StoreOptions {
    StoreOptions::new()
        .with_encrypt(false)
        .with_signing_salt("sig")
}

pub fn encrypted_config() -> CookieStoreConfig {
    CookieStoreConfig::init(encrypted_options()).expect("encrypted options are valid")
}

pub fn signed_config() -> CookieStoreConfig {
    CookieStoreConfig::init(signed_options()).expect("signed options are valid")
}

// ============================================================================
// Session states
// ============================================================================

pub fn user_state() -> SessionState {
    let mut state = SessionState::new();
    state.insert("user_id", 42);
    state
}

/// Nested values of every JSON kind
pub fn rich_state() -> SessionState {
    let mut state = SessionState::new();
    state.insert("user_id", 42);
    state.insert("name", "Ada Lovelace");
    state.insert("unicode", "Hello 世界 🚀");
    state.insert("roles", json!(["admin", "editor"]));
    state.insert("csrf", json!({"token": "abc123", "issued": 1_700_000_000u64}));
    state.insert("cart", json!([{"sku": "X-1", "qty": 2, "price": 9.5}]));
    state.insert("negative", -17);
    state.insert("flag", true);
    state.insert("nothing", json!(null));
    state
}

/// Replace the last character of `token` with a different base64url one
pub fn replace_last_char(token: &str) -> String {
    let mut tampered = token.to_owned();
    let last = tampered.pop().expect("token is not empty");
    tampered.push(if last == 'A' { 'B' } else { 'A' });
    tampered
}
