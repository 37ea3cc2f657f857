//! Traffic obfuscation layer
//!
//! Provides:
//! - `tls1.2_ticket_auth`: a fake TLS 1.2 handshake carrying an HMAC
//!   authentication tag, followed by application-data record framing
//! - `plain`: pass-through, for deployments that disable obfuscation
//!
//! ## How the disguise works
//!
//! 1. **ClientHello**: the client opens with a byte-exact browser-like
//!    ClientHello whose `random` field is a keyed, time-bound tag
//! 2. **ServerHello flight**: the server answers with ServerHello,
//!    ChangeCipherSpec and Finished, each tag-checked by the client
//! 3. **Client Finished**: the client closes the handshake and releases any
//!    data it buffered meanwhile
//! 4. **Records**: every payload byte afterwards travels inside
//!    `17 03 03 <len>` application-data records
//!
//! The layer has no idea what the payload means. It only reshapes bytes.

mod auth;
mod clock;
mod hello;
mod plain;
mod record;
mod session;

pub use auth::{
    pack_auth_data, sign, verify_auth_data, verify_signature, ObfsAuthData, AUTH_DATA_LEN,
    AUTH_HMAC_LEN, CLIENT_ID_LEN, DEFAULT_MAX_TIME_SKEW,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use hello::{
    build_client_finish, build_client_hello, build_server_hello, parse_client_finish,
    parse_client_hello, parse_server_hello, sni, ClientHello, MAX_HANDSHAKE_LEN,
    MAX_HOST_NAME_LEN, SESSION_TICKET_LEN,
};
pub use plain::Plain;
pub use record::{ContentType, Decoded, RecordFramer, RecordHeader, RECORD_HEADER_LEN, TLS_VERSION};
pub use session::{HandshakeState, ObfsTls};

use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Method name of the pass-through variant
pub const METHOD_PLAIN: &str = "plain";

/// Method name of the TLS 1.2 ticket-auth disguise
pub const METHOD_TLS_TICKET_AUTH: &str = "tls1.2_ticket_auth";

/// Default TCP maximum segment size
pub const DEFAULT_TCP_MSS: usize = 1460;

/// Default head length reserved for the protocol layer
pub const DEFAULT_HEAD_LEN: usize = 30;

/// Default decode buffer ceiling
pub const DEFAULT_BUFFER_SIZE: usize = 65535;

/// Largest plaintext a real TLS record may carry
pub const MAX_TLS_PLAINTEXT: usize = 16384;

/// Obfuscation errors
///
/// `AuthMismatch` and `ReplayOrStale` should be handled identically by the
/// caller so that an observer cannot tell them apart.
#[derive(Debug, Error)]
pub enum ObfsError {
    #[error("Authentication tag mismatch")]
    AuthMismatch,

    #[error("Stale or replayed handshake: timestamp {timestamp}, now {now}")]
    ReplayOrStale { timestamp: u32, now: u32 },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Handshake record after the session was established")]
    UnexpectedHandshake,

    #[error("Out of order: {0}")]
    OutOfOrder(&'static str),

    #[error("Operation not valid for the {0:?} role")]
    WrongRole(Role),

    #[error("Unknown obfuscation method: {0}")]
    UnknownMethod(String),
}

/// Side of the connection a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connection initiator
    Client,
    /// Connection acceptor
    Server,
}

/// Result of a client-side decode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientDecoded {
    /// Application payload recovered by this call
    pub payload: Bytes,
    /// The disguise handshake completed during this call. The caller should
    /// follow up with `client_encode` (an empty payload is fine) so the
    /// Finished flight goes out.
    pub handshake_done: bool,
}

/// Result of a server-side decode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDecoded {
    /// Application payload recovered by this call
    pub payload: Bytes,
    /// The disguise handshake completed during this call
    pub handshake_done: bool,
    /// A ClientHello was accepted and must be answered with `server_encode`
    pub needs_reply: bool,
}

/// An obfuscation variant
///
/// One instance serves exactly one connection. Encode calls must follow the
/// order bytes are written to the wire; decode calls the order they are read.
pub trait Obfs: Send {
    /// Wrap outbound client bytes
    fn client_encode(&mut self, buf: &[u8]) -> Result<Bytes, ObfsError>;

    /// Unwrap inbound bytes on the client
    fn client_decode(&mut self, buf: &[u8]) -> Result<ClientDecoded, ObfsError>;

    /// Wrap outbound server bytes
    fn server_encode(&mut self, buf: &[u8]) -> Result<Bytes, ObfsError>;

    /// Unwrap inbound bytes on the server
    fn server_decode(&mut self, buf: &[u8]) -> Result<ServerDecoded, ObfsError>;

    /// Per-record framing overhead in bytes
    fn overhead(&self) -> usize;

    /// Whether the disguise handshake has finished
    fn is_established(&self) -> bool;
}

/// Connection parameters handed to an obfuscation variant
#[derive(Clone)]
pub struct ServerInfo {
    /// Shared secret key
    pub key: Vec<u8>,
    /// Parameter string of the proxy protocol layer, carried untouched
    pub protocol_param: String,
    /// Client: comma-separated disguise hosts. Server: allowed clock skew
    /// in seconds.
    pub obfs_param: String,
    /// Disguise host name
    pub host: String,
    /// Disguise port
    pub port: u16,
    /// Header bytes reserved by the protocol layer
    pub head_len: usize,
    /// TCP maximum segment size
    pub tcp_mss: usize,
    /// Decode buffer ceiling
    pub buffer_size: usize,
}

impl ServerInfo {
    /// Create server info with default sizes
    pub fn new(key: impl Into<Vec<u8>>, host: impl Into<String>, port: u16) -> Self {
        Self {
            key: key.into(),
            protocol_param: String::new(),
            obfs_param: String::new(),
            host: host.into(),
            port,
            head_len: DEFAULT_HEAD_LEN,
            tcp_mss: DEFAULT_TCP_MSS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the obfs parameter
    pub fn with_obfs_param(mut self, param: impl Into<String>) -> Self {
        self.obfs_param = param.into();
        self
    }

    /// Set the protocol parameter
    pub fn with_protocol_param(mut self, param: impl Into<String>) -> Self {
        self.protocol_param = param.into();
        self
    }

    /// Set the TCP MSS
    pub fn with_tcp_mss(mut self, tcp_mss: usize) -> Self {
        self.tcp_mss = tcp_mss;
        self
    }

    /// Set the head length
    pub fn with_head_len(mut self, head_len: usize) -> Self {
        self.head_len = head_len;
        self
    }

    /// Set the buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Largest payload carried by one application-data record
    pub fn max_chunk_len(&self) -> usize {
        self.tcp_mss
            .saturating_sub(self.head_len + RECORD_HEADER_LEN)
            .min(self.buffer_size)
            .min(MAX_TLS_PLAINTEXT)
            .max(1)
    }

    /// Allowed clock skew for handshake timestamps, in seconds
    ///
    /// Zero disables the check.
    pub fn max_time_skew(&self) -> u32 {
        self.obfs_param
            .trim()
            .parse()
            .unwrap_or(DEFAULT_MAX_TIME_SKEW)
    }

    /// Pick the SNI host for a new session
    ///
    /// `obfs_param` overrides `host` and may list several names separated by
    /// commas. IP literals are not sent as SNI, and names longer than
    /// `MAX_HOST_NAME_LEN` are skipped.
    pub fn disguise_host(&self) -> String {
        let source = if self.obfs_param.trim().is_empty() {
            self.host.as_str()
        } else {
            self.obfs_param.as_str()
        };

        if source.ends_with(|c: char| c.is_ascii_digit()) {
            return String::new();
        }

        let hosts: Vec<&str> = source
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .filter(|h| {
                let fits = h.len() <= MAX_HOST_NAME_LEN;
                if !fits {
                    warn!(len = h.len(), "Skipping over-long disguise host");
                }
                fits
            })
            .collect();

        match hosts.len() {
            0 => String::new(),
            1 => hosts[0].to_string(),
            n => hosts[crate::crypto::random_u16() as usize % n].to_string(),
        }
    }
}

impl fmt::Debug for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerInfo")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("protocol_param", &self.protocol_param)
            .field("obfs_param", &self.obfs_param)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("head_len", &self.head_len)
            .field("tcp_mss", &self.tcp_mss)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// Create an obfuscation session by method name
pub fn new_obfs(method: &str, role: Role, info: ServerInfo) -> Result<Box<dyn Obfs>, ObfsError> {
    match method {
        METHOD_PLAIN => Ok(Box::new(Plain::new())),
        METHOD_TLS_TICKET_AUTH => Ok(Box::new(match role {
            Role::Client => ObfsTls::client(info),
            Role::Server => ObfsTls::server(info),
        })),
        other => Err(ObfsError::UnknownMethod(other.to_string())),
    }
}
