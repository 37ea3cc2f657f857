//! # ObfsTLS
//!
//! A traffic obfuscation engine that makes a proxy connection look like an
//! ordinary TLS 1.2 session to a passive observer.
//!
//! ## Features
//!
//! - **Fake TLS 1.2 handshake** with a byte-exact browser-like ClientHello
//! - **HMAC-SHA1 authentication tags** bound to a shared key and the clock
//! - **Application-data record framing** sized to the path MSS
//! - **Async transport adapter** for any tokio byte stream
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Application Layer                   │
//! │          (obfs-client / obfs-server relays)          │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │     (ObfsConnection: handshake driving, timeouts)    │
//! ├─────────────────────────────────────────────────────┤
//! │                 Obfuscation Layer                    │
//! │  (ClientHello/ServerHello disguise, record framing)  │
//! ├─────────────────────────────────────────────────────┤
//! │                   Crypto Layer                       │
//! │         (HMAC-SHA1, EVP_BytesToKey, random)          │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod obfuscation;
pub mod protocol;
pub mod transport;

pub use config::Config;
pub use obfuscation::{new_obfs, Obfs, ObfsError, ObfsTls, Role, ServerInfo};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Obfuscation error: {0}")]
    Obfs(#[from] obfuscation::ObfsError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),
}
