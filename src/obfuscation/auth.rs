//! Handshake authentication tags
//!
//! Tag layout (32 bytes, placed in the TLS `random` field):
//! ```text
//! +----------------+--------------------------+---------------------+
//! | time (4B, BE)  |      random (18B)        |  HMAC-SHA1[..10]    |
//! +----------------+--------------------------+---------------------+
//! ```
//!
//! The HMAC is keyed with `key ‖ client_id` and covers the first 22 bytes.
//! The client id travels in the TLS session-id field, so the server can
//! recompute the key from the ClientHello alone.

use super::ObfsError;
use crate::crypto::{auth_key, random_bytes, truncated_hmac};

/// Length of a packed tag
pub const AUTH_DATA_LEN: usize = 32;

/// Length of the truncated HMAC
pub const AUTH_HMAC_LEN: usize = 10;

/// Bytes of the tag covered by the HMAC
const AUTH_SIGNED_LEN: usize = AUTH_DATA_LEN - AUTH_HMAC_LEN;

/// Length of the client identifier
pub const CLIENT_ID_LEN: usize = 32;

/// Default allowed clock skew (24 hours)
pub const DEFAULT_MAX_TIME_SKEW: u32 = 24 * 60 * 60;

/// Pack a tag for `client_id` at time `now`
pub fn pack_auth_data(key: &[u8], client_id: &[u8], now: u32) -> [u8; AUTH_DATA_LEN] {
    let mut tag = [0u8; AUTH_DATA_LEN];
    tag[..4].copy_from_slice(&now.to_be_bytes());
    random_bytes(&mut tag[4..AUTH_SIGNED_LEN]);

    let digest = sign(key, client_id, &tag[..AUTH_SIGNED_LEN]);
    tag[AUTH_SIGNED_LEN..].copy_from_slice(&digest);
    tag
}

/// Verify a tag, returning its embedded timestamp
///
/// The digest is checked before the timestamp, so tampering with any byte
/// reports `AuthMismatch`. `max_skew == 0` disables the time check.
pub fn verify_auth_data(
    key: &[u8],
    client_id: &[u8],
    tag: &[u8; AUTH_DATA_LEN],
    now: u32,
    max_skew: u32,
) -> Result<u32, ObfsError> {
    if !verify_signature(key, client_id, &tag[..AUTH_SIGNED_LEN], &tag[AUTH_SIGNED_LEN..]) {
        return Err(ObfsError::AuthMismatch);
    }

    let timestamp = u32::from_be_bytes([tag[0], tag[1], tag[2], tag[3]]);
    if max_skew > 0 {
        // Wrapping difference, so the check survives the 2106 rollover
        let skew = (now.wrapping_sub(timestamp) as i32).unsigned_abs();
        if skew > max_skew {
            return Err(ObfsError::ReplayOrStale { timestamp, now });
        }
    }

    Ok(timestamp)
}

/// Truncated HMAC over `data` keyed with `key ‖ client_id`
pub fn sign(key: &[u8], client_id: &[u8], data: &[u8]) -> [u8; AUTH_HMAC_LEN] {
    truncated_hmac(&auth_key(key, client_id), data)
}

/// Check a truncated HMAC produced by [`sign`]
pub fn verify_signature(key: &[u8], client_id: &[u8], data: &[u8], signature: &[u8]) -> bool {
    sign(key, client_id, data)[..] == *signature
}

/// Per-connection handshake state
#[derive(Debug, Clone)]
pub struct ObfsAuthData {
    /// Client identifier, echoed in the session-id fields
    pub client_id: [u8; CLIENT_ID_LEN],
    /// Timestamp of the tag sent (client) or accepted (server)
    pub timestamp: u32,
    /// Our closing handshake message went out
    pub sent: bool,
    /// The peer's hello was received and verified
    pub received: bool,
}

impl ObfsAuthData {
    /// Fresh state with a random client identifier
    pub fn new() -> Self {
        let mut client_id = [0u8; CLIENT_ID_LEN];
        random_bytes(&mut client_id);
        Self {
            client_id,
            timestamp: 0,
            sent: false,
            received: false,
        }
    }
}

impl Default for ObfsAuthData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x01, 0x02, 0x03, 0x04];
    const NOW: u32 = 0x5c79_f95f;

    #[test]
    fn test_pack_auth_data_len() {
        let tag = pack_auth_data(&KEY, &[0x01, 0x02, 0x03, 0x04], NOW);
        assert_eq!(tag.len(), 32);
        assert_eq!(&tag[..4], &NOW.to_be_bytes());
    }

    #[test]
    fn test_pack_verify_roundtrip() {
        let auth = ObfsAuthData::new();
        let tag = pack_auth_data(&KEY, &auth.client_id, NOW);

        let timestamp = verify_auth_data(&KEY, &auth.client_id, &tag, NOW + 1, 60).unwrap();
        assert_eq!(timestamp, NOW);
    }

    #[test]
    fn test_any_flipped_byte_is_mismatch() {
        let auth = ObfsAuthData::new();
        let tag = pack_auth_data(&KEY, &auth.client_id, NOW);

        for i in 0..AUTH_DATA_LEN {
            let mut tampered = tag;
            tampered[i] ^= 0x01;
            assert!(
                matches!(
                    verify_auth_data(&KEY, &auth.client_id, &tampered, NOW, 60),
                    Err(ObfsError::AuthMismatch)
                ),
                "byte {} not covered",
                i
            );
        }
    }

    #[test]
    fn test_wrong_key_or_client_is_mismatch() {
        let auth = ObfsAuthData::new();
        let tag = pack_auth_data(&KEY, &auth.client_id, NOW);

        assert!(matches!(
            verify_auth_data(&[9, 9, 9, 9], &auth.client_id, &tag, NOW, 60),
            Err(ObfsError::AuthMismatch)
        ));
        assert!(matches!(
            verify_auth_data(&KEY, &ObfsAuthData::new().client_id, &tag, NOW, 60),
            Err(ObfsError::AuthMismatch)
        ));
    }

    #[test]
    fn test_stale_and_future_tags() {
        let auth = ObfsAuthData::new();
        let tag = pack_auth_data(&KEY, &auth.client_id, NOW);

        assert!(matches!(
            verify_auth_data(&KEY, &auth.client_id, &tag, NOW + 61, 60),
            Err(ObfsError::ReplayOrStale { timestamp: NOW, .. })
        ));
        assert!(matches!(
            verify_auth_data(&KEY, &auth.client_id, &tag, NOW - 61, 60),
            Err(ObfsError::ReplayOrStale { .. })
        ));
        assert!(verify_auth_data(&KEY, &auth.client_id, &tag, NOW - 60, 60).is_ok());
    }

    #[test]
    fn test_zero_skew_disables_time_check() {
        let auth = ObfsAuthData::new();
        let tag = pack_auth_data(&KEY, &auth.client_id, 1);
        assert_eq!(
            verify_auth_data(&KEY, &auth.client_id, &tag, NOW, 0).unwrap(),
            1
        );
    }

    #[test]
    fn test_client_ids_are_random() {
        assert_ne!(ObfsAuthData::new().client_id, ObfsAuthData::new().client_id);
    }
}
