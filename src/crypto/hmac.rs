//! HMAC-SHA1 helpers
//!
//! SHA-1 is what the wire format was defined with; ring only exposes it
//! under the legacy algorithm name.

use super::SHA1_LEN;
use ring::hmac::{self, HMAC_SHA1_FOR_LEGACY_USE_ONLY};

/// Compute a full 20-byte HMAC-SHA1 digest
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; SHA1_LEN] {
    let key = hmac::Key::new(HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    let tag = hmac::sign(&key, data);

    let mut digest = [0u8; SHA1_LEN];
    digest.copy_from_slice(tag.as_ref());
    digest
}

/// Compute an HMAC-SHA1 digest truncated to its first `N` bytes
pub fn truncated_hmac<const N: usize>(key: &[u8], data: &[u8]) -> [u8; N] {
    let digest = hmac_sha1(key, data);

    let mut out = [0u8; N];
    out.copy_from_slice(&digest[..N]);
    out
}
