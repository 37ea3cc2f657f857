//! Pass-through variant

use super::{ClientDecoded, Obfs, ObfsError, ServerDecoded};
use bytes::Bytes;

/// Leaves bytes untouched in both directions
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl Plain {
    /// Create a plain obfs
    pub fn new() -> Self {
        Self
    }
}

impl Obfs for Plain {
    fn client_encode(&mut self, buf: &[u8]) -> Result<Bytes, ObfsError> {
        Ok(Bytes::copy_from_slice(buf))
    }

    fn client_decode(&mut self, buf: &[u8]) -> Result<ClientDecoded, ObfsError> {
        Ok(ClientDecoded {
            payload: Bytes::copy_from_slice(buf),
            handshake_done: false,
        })
    }

    fn server_encode(&mut self, buf: &[u8]) -> Result<Bytes, ObfsError> {
        Ok(Bytes::copy_from_slice(buf))
    }

    fn server_decode(&mut self, buf: &[u8]) -> Result<ServerDecoded, ObfsError> {
        Ok(ServerDecoded {
            payload: Bytes::copy_from_slice(buf),
            handshake_done: false,
            needs_reply: false,
        })
    }

    fn overhead(&self) -> usize {
        0
    }

    fn is_established(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_passthrough() {
        let mut plain = Plain::new();
        assert_eq!(&plain.client_encode(b"abc").unwrap()[..], b"abc");
        assert_eq!(&plain.server_decode(b"abc").unwrap().payload[..], b"abc");
        assert_eq!(&plain.server_encode(b"xyz").unwrap()[..], b"xyz");
        assert_eq!(&plain.client_decode(b"xyz").unwrap().payload[..], b"xyz");
        assert!(plain.is_established());
        assert_eq!(plain.overhead(), 0);
    }
}
