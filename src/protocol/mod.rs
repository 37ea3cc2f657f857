//! Protocol constants shared by the adapters and binaries

/// Handshake timeout in seconds
pub const HANDSHAKE_TIMEOUT: u64 = 30;

/// Idle timeout in seconds
pub const IDLE_TIMEOUT: u64 = 300;

/// Write timeout in seconds
pub const WRITE_TIMEOUT: u64 = 60;

/// Plain-side read buffer for relays
pub const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Default listen address of the server
pub const DEFAULT_SERVER_LISTEN: &str = "0.0.0.0:8443";

/// Default local listen address of the client
pub const DEFAULT_CLIENT_LISTEN: &str = "127.0.0.1:1080";
