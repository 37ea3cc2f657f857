//! Transport adapter
//!
//! Drives an obfuscation session over any tokio byte stream:
//! - Performs the disguise handshake on connect/accept
//! - Encodes outbound writes and decodes inbound reads
//! - Applies handshake and I/O timeouts

mod connection;
mod relay;

pub use connection::{ConnectionState, ObfsConnection};
pub use relay::{relay, RelayStats};

use crate::obfuscation::ObfsError;
use std::io;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Obfuscation error: {0}")]
    Obfs(#[from] ObfsError),

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Handshake timeout in seconds
    pub handshake_timeout: u64,
    /// Write timeout in seconds
    pub write_timeout: u64,
    /// Read buffer size in bytes
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: crate::protocol::HANDSHAKE_TIMEOUT,
            write_timeout: crate::protocol::WRITE_TIMEOUT,
            read_buffer_size: crate::obfuscation::DEFAULT_BUFFER_SIZE,
        }
    }
}
