#![no_main]

use cookiekit_core::codec::{decode, try_decode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Attack: Authenticated but hostile payload bytes (e.g. a leaked signing key)
    // Validates: No panics, no unbounded allocation, lenient decode agrees with strict

    let lenient = decode(data);
    match try_decode(data) {
        Ok(strict) => assert_eq!(lenient, strict),
        Err(_) => assert!(lenient.is_empty()),
    }
});
