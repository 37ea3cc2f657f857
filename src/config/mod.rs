//! Configuration management

use crate::crypto::{evp_bytes_to_key, DEFAULT_KEY_LEN};
use crate::obfuscation::{
    ServerInfo, DEFAULT_BUFFER_SIZE, DEFAULT_HEAD_LEN, DEFAULT_TCP_MSS, METHOD_TLS_TICKET_AUTH,
};
use crate::protocol::{DEFAULT_CLIENT_LISTEN, DEFAULT_SERVER_LISTEN};
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: Option<ServerConfig>,
    /// Client configuration
    pub client: Option<ClientConfig>,
    /// Obfuscation parameters, shared by both ends
    #[serde(default)]
    pub obfs: ObfsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, crate::Error> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for obfuscated connections
    pub listen: String,
    /// Plain upstream every accepted connection is forwarded to
    pub forward: String,
    /// Handshake timeout in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_SERVER_LISTEN.to_string(),
            forward: "127.0.0.1:3306".to_string(),
            handshake_timeout: default_handshake_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Local listen address for plain connections
    pub listen: String,
    /// Server address
    pub server: String,
    /// Handshake timeout in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_CLIENT_LISTEN.to_string(),
            server: "127.0.0.1:8443".to_string(),
            handshake_timeout: default_handshake_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

fn default_handshake_timeout() -> u64 {
    crate::protocol::HANDSHAKE_TIMEOUT
}

fn default_idle_timeout() -> u64 {
    crate::protocol::IDLE_TIMEOUT
}

/// Obfuscation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfsConfig {
    /// Method name (`tls1.2_ticket_auth` or `plain`)
    pub method: String,
    /// Shared password the key is derived from
    pub password: String,
    /// Derived key length in bytes
    pub key_len: usize,
    /// Disguise host name
    pub host: String,
    /// Disguise port
    pub port: u16,
    /// Client: comma-separated disguise hosts. Server: allowed clock skew
    /// in seconds.
    pub obfs_param: String,
    /// Protocol-layer parameter
    pub protocol_param: String,
    /// Header bytes reserved by the protocol layer
    pub head_len: usize,
    /// TCP maximum segment size
    pub tcp_mss: usize,
    /// Decode buffer ceiling
    pub buffer_size: usize,
}

impl Default for ObfsConfig {
    fn default() -> Self {
        Self {
            method: METHOD_TLS_TICKET_AUTH.to_string(),
            password: String::new(),
            key_len: DEFAULT_KEY_LEN,
            host: "www.bing.com".to_string(),
            port: 443,
            obfs_param: String::new(),
            protocol_param: String::new(),
            head_len: DEFAULT_HEAD_LEN,
            tcp_mss: DEFAULT_TCP_MSS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ObfsConfig {
    /// Derive the key and build the per-connection parameters
    pub fn server_info(&self) -> Result<ServerInfo, crate::Error> {
        let key = evp_bytes_to_key(&self.password, self.key_len)?;

        Ok(ServerInfo::new(key, self.host.clone(), self.port)
            .with_obfs_param(self.obfs_param.clone())
            .with_protocol_param(self.protocol_param.clone())
            .with_head_len(self.head_len)
            .with_tcp_mss(self.tcp_mss)
            .with_buffer_size(self.buffer_size))
    }

    /// Transport settings matching these parameters
    pub fn transport_config(&self, handshake_timeout: u64) -> TransportConfig {
        TransportConfig {
            handshake_timeout,
            read_buffer_size: self.buffer_size,
            ..TransportConfig::default()
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        server: Some(ServerConfig::default()),
        client: Some(ClientConfig::default()),
        obfs: ObfsConfig {
            password: "change-me".to_string(),
            ..ObfsConfig::default()
        },
        logging: LoggingConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = Config::parse(
            r#"
            [server]
            listen = "0.0.0.0:9443"
            forward = "127.0.0.1:22"

            [obfs]
            password = "secret"
            "#,
        )
        .unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.listen, "0.0.0.0:9443");
        assert_eq!(server.idle_timeout, crate::protocol::IDLE_TIMEOUT);
        assert!(config.client.is_none());
        assert_eq!(config.obfs.method, METHOD_TLS_TICKET_AUTH);
        assert_eq!(config.obfs.tcp_mss, DEFAULT_TCP_MSS);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Config::parse("[server\nlisten = 1"),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_example_round_trip() {
        let example = generate_example_config();
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed = Config::parse(&text).unwrap();

        assert_eq!(parsed.obfs.password, "change-me");
        assert_eq!(parsed.client.unwrap().listen, DEFAULT_CLIENT_LISTEN);
    }

    #[test]
    fn test_server_info_derives_key() {
        let obfs = ObfsConfig {
            password: "password".to_string(),
            key_len: 16,
            obfs_param: "120".to_string(),
            ..ObfsConfig::default()
        };
        let info = obfs.server_info().unwrap();

        assert_eq!(info.key, evp_bytes_to_key("password", 16).unwrap());
        assert_eq!(info.max_time_skew(), 120);
        assert_eq!(info.host, "www.bing.com");
    }

    #[test]
    fn test_server_info_empty_password() {
        assert!(ObfsConfig::default().server_info().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("obfs-tls-config-{}.toml", std::process::id()));
        generate_example_config().save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.unwrap().forward, "127.0.0.1:3306");

        std::fs::remove_file(&path).unwrap();
    }
}
