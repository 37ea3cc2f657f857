//! Key Derivation Functions
//!
//! Provides the OpenSSL `EVP_BytesToKey` (MD5, one iteration, no salt)
//! derivation used to turn a configured password into the shared key, and
//! the per-client HMAC key used by the handshake tags.

use super::{CryptoError, MD5_LEN};

/// Derive `key_len` bytes from a password
///
/// `D_0 = MD5(password)`, `D_i = MD5(D_{i-1} ‖ password)`, concatenated and
/// truncated to `key_len`.
pub fn evp_bytes_to_key(password: &str, key_len: usize) -> Result<Vec<u8>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    if key_len == 0 {
        return Err(CryptoError::InvalidKeyLength(key_len));
    }

    let password = password.as_bytes();
    let mut key = Vec::with_capacity(key_len + MD5_LEN);
    let mut block = Vec::with_capacity(MD5_LEN + password.len());

    while key.len() < key_len {
        block.clear();
        if key.len() >= MD5_LEN {
            block.extend_from_slice(&key[key.len() - MD5_LEN..]);
        }
        block.extend_from_slice(password);
        key.extend_from_slice(&md5::compute(&block).0);
    }

    key.truncate(key_len);
    Ok(key)
}

/// HMAC key for a client's handshake tags: `key ‖ client_id`
pub fn auth_key(key: &[u8], client_id: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + client_id.len());
    out.extend_from_slice(key);
    out.extend_from_slice(client_id);
    out
}
