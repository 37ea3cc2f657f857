//! Cryptographic primitives for the TLS disguise
//!
//! This module provides:
//! - HMAC-SHA1 tags used to authenticate the fake handshake
//! - `EVP_BytesToKey` derivation of the shared key from a password
//! - Secure random number generation
//!
//! None of this is a confidentiality boundary. The disguise only has to
//! convince a passive observer; the payload is already ciphertext produced
//! by the proxy protocol above us.

mod hmac;
mod kdf;

pub use hmac::{hmac_sha1, truncated_hmac};
pub use kdf::{auth_key, evp_bytes_to_key};

use thiserror::Error;

/// Length of an HMAC-SHA1 digest in bytes
pub const SHA1_LEN: usize = 20;

/// Length of an MD5 digest in bytes
pub const MD5_LEN: usize = 16;

/// Default length of a password-derived key in bytes
pub const DEFAULT_KEY_LEN: usize = 32;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: {0}")]
    InvalidKeyLength(usize),

    #[error("Empty password")]
    EmptyPassword,
}

/// Generate cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    rng.fill(buf).expect("Failed to generate random bytes");
}

/// Generate a random `u16`
pub fn random_u16() -> u16 {
    let mut buf = [0u8; 2];
    random_bytes(&mut buf);
    u16::from_be_bytes(buf)
}
