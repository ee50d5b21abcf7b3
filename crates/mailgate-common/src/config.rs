//! Configuration for mailgate

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote key-value store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Envelope encryption configuration
    #[serde(default)]
    pub crypto: CryptoConfig,

    /// Inbox watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Remote key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Store REST endpoint URL
    #[serde(default)]
    pub url: String,

    /// Bearer token for authentication
    #[serde(default)]
    pub token: String,

    /// Request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_store_timeout() -> u64 {
    10
}

/// Envelope encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CryptoConfig {
    /// Master key, base64 encoding of exactly 32 bytes
    #[serde(default)]
    pub master_key: String,
}

/// Inbox watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Seconds a watcher with no subscribers survives before tear-down
    #[serde(default = "default_idle_grace")]
    pub idle_grace_secs: u64,

    /// Interval between IDLE re-issues while watching
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Interval between ping frames on push streams
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            idle_grace_secs: default_idle_grace(),
            keepalive_secs: default_keepalive(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

fn default_idle_grace() -> u64 {
    60
}

fn default_keepalive() -> u64 {
    300
}

fn default_heartbeat() -> u64 {
    25
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from file and environment
    ///
    /// File candidates are tried in order; a missing file is acceptable when
    /// the environment provides `MASTER_KEY`, `STORE_URL` and `STORE_TOKEN`.
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/mailgate/config.toml"),
        ];

        let mut config = paths
            .iter()
            .find(|p| p.exists())
            .map(|p| Self::from_file(p))
            .transpose()?
            .unwrap_or_else(|| Config {
                server: ServerConfig::default(),
                store: StoreConfig::default(),
                crypto: CryptoConfig::default(),
                watcher: WatcherConfig::default(),
                logging: LoggingConfig::default(),
            });

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables onto the file configuration
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("MASTER_KEY") {
            self.crypto.master_key = key;
        }
        if let Ok(url) = std::env::var("STORE_URL") {
            self.store.url = url;
        }
        if let Ok(token) = std::env::var("STORE_TOKEN") {
            self.store.token = token;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    /// Validate startup-critical settings
    fn validate(&self) -> crate::Result<()> {
        self.decode_master_key()?;
        if self.store.url.is_empty() {
            return Err(crate::Error::Config("store.url is required".to_string()));
        }
        Ok(())
    }

    /// Decode and length-check the master key
    ///
    /// The process must refuse to start on anything but exactly 32 bytes.
    pub fn decode_master_key(&self) -> crate::Result<[u8; 32]> {
        if self.crypto.master_key.is_empty() {
            return Err(crate::Error::Config(
                "crypto.master_key (or MASTER_KEY) is required".to_string(),
            ));
        }

        let raw = BASE64
            .decode(self.crypto.master_key.trim())
            .map_err(|e| crate::Error::Config(format!("master key is not valid base64: {}", e)))?;

        <[u8; 32]>::try_from(raw.as_slice()).map_err(|_| {
            crate::Error::Config(format!(
                "master key must decode to exactly 32 bytes, got {}",
                raw.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.bind_address, "0.0.0.0");
        assert_eq!(server.port, 8080);

        let watcher = WatcherConfig::default();
        assert_eq!(watcher.idle_grace_secs, 60);
        assert_eq!(watcher.keepalive_secs, 300);
        assert_eq!(watcher.heartbeat_secs, 25);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9090

[store]
url = "https://kv.example.com"
token = "secret-token"

[crypto]
master_key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="

[watcher]
idle_grace_secs = 30
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.store.url, "https://kv.example.com");
        assert_eq!(config.watcher.idle_grace_secs, 30);
        assert_eq!(config.watcher.keepalive_secs, 300);
        assert_eq!(config.decode_master_key().unwrap(), [0u8; 32]);
    }

    #[test]
    fn test_master_key_wrong_length() {
        let config = Config {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            crypto: CryptoConfig {
                master_key: BASE64.encode([0u8; 16]),
            },
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(matches!(
            config.decode_master_key(),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_master_key_missing() {
        let config = Config {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            crypto: CryptoConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(config.decode_master_key().is_err());
    }
}
