//! Application configuration module
//!
//! Server settings come from environment variables; the initial schema
//! layout comes from an optional JSON bootstrap file.

use crate::auth::Authentication;
use crate::properties::Props;
use crate::registry::{ContextEvent, SchemaConfiguration};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Server configuration
///
/// The admin API has no authentication. It listens on loopback unless
/// `HOST` says otherwise, and a non-loopback bind must be firewalled.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            port: 3307,
        }
    }
}

/// CORS configuration; no origins means any origin
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

/// Proxy runtime configuration
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// JSON file turned into the `Initialize` event at startup
    pub bootstrap_file: Option<PathBuf>,
    /// Period of the pool-status heartbeat; `None` disables it
    pub heartbeat_interval: Option<Duration>,
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub proxy: ProxyConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: std::env::var("HOST")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().port),
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        let heartbeat_secs = match std::env::var("HEARTBEAT_INTERVAL_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue(format!("HEARTBEAT_INTERVAL_SECS must be a number, got `{}`", raw))
            })?,
            Err(_) => 30,
        };

        let proxy = ProxyConfig {
            bootstrap_file: std::env::var("PROXY_BOOTSTRAP_FILE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            heartbeat_interval: (heartbeat_secs > 0).then(|| Duration::from_secs(heartbeat_secs)),
        };

        Ok(Self { server, cors, proxy })
    }
}

/// Startup layout of the proxy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    #[serde(default)]
    pub schemas: IndexMap<String, SchemaConfiguration>,
    #[serde(default)]
    pub authentication: Authentication,
    #[serde(default)]
    pub props: Props,
}

impl BootstrapConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn into_event(self) -> ContextEvent {
        ContextEvent::Initialize {
            schemas: self.schemas,
            authentication: self.authentication,
            props: self.props,
        }
    }
}
