//! Backend connection parameters
//!
//! Two parameter sets are compared by value to decide whether a backend
//! was modified between configuration generations.

use super::dialect::DatabaseType;
use crate::error::{validation_error, AppError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

/// Connection descriptor of one backend data source
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParameters {
    /// Connection URL, e.g. `postgres://host:5432/db`
    #[validate(length(min = 1, message = "url is required"))]
    pub url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,

    #[validate(range(min = 1, message = "maxPoolSize must be at least 1"))]
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: usize,

    #[serde(default)]
    pub read_only: bool,
}

fn default_connection_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_max_lifetime_ms() -> u64 {
    1_800_000
}

fn default_max_pool_size() -> usize {
    50
}

fn default_min_pool_size() -> usize {
    1
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            connection_timeout_ms: default_connection_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_lifetime_ms: default_max_lifetime_ms(),
            max_pool_size: default_max_pool_size(),
            min_pool_size: default_min_pool_size(),
            read_only: false,
        }
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("url", &self.display_url())
            .field("username", &self.username)
            .field("password", &"****")
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("max_lifetime_ms", &self.max_lifetime_ms)
            .field("max_pool_size", &self.max_pool_size)
            .field("min_pool_size", &self.min_pool_size)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Network location resolved from a connection URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub require_tls: bool,
}

impl ConnectionParameters {
    /// Parameters for `url` with every other field defaulted
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Validate field constraints and pool bounds
    pub fn check(&self) -> Result<(), AppError> {
        self.validate().map_err(|e| validation_error(e.to_string()))?;
        if self.min_pool_size > self.max_pool_size {
            return Err(validation_error(format!(
                "minPoolSize ({}) must not exceed maxPoolSize ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    /// Dialect recognized from the URL
    pub fn database_type(&self) -> Result<DatabaseType, AppError> {
        DatabaseType::from_url(&self.url)
    }

    /// Resolve host, port, credentials and database from the URL.
    ///
    /// Explicit `username`/`password` fields take precedence over URL
    /// credentials. A `jdbc:` prefix is accepted and ignored.
    pub fn endpoint(&self) -> Result<Endpoint, AppError> {
        let db_type = self.database_type()?;
        let raw = self.url.trim();
        let raw = raw
            .strip_prefix("jdbc:")
            .or_else(|| raw.strip_prefix("JDBC:"))
            .unwrap_or(raw);

        let url = url::Url::parse(raw)
            .map_err(|e| AppError::Config(format!("Invalid connection url: {}", e)))?;

        let host = url
            .host_str()
            .ok_or_else(|| AppError::Config("Missing host in connection url".to_string()))?
            .to_string();

        let port = url
            .port()
            .or_else(|| db_type.default_port())
            .ok_or_else(|| AppError::Config("Missing port in connection url".to_string()))?;

        let user = if !self.username.is_empty() {
            self.username.clone()
        } else {
            url.username().to_string()
        };

        let password = if !self.password.is_empty() {
            self.password.clone()
        } else {
            url.password().unwrap_or("").to_string()
        };

        let database = url.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(AppError::Config("Missing database name in connection url".to_string()));
        }

        let require_tls = url
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && (v == "require" || v == "verify-full" || v == "verify-ca"));

        Ok(Endpoint {
            host,
            port,
            user,
            password,
            database,
            require_tls,
        })
    }

    /// URL with any embedded password masked, safe to log or expose
    pub fn display_url(&self) -> String {
        match url::Url::parse(self.url.trim_start_matches("jdbc:")) {
            Ok(mut parsed) if parsed.password().is_some() => {
                let _ = parsed.set_password(Some("****"));
                let masked = parsed.to_string();
                if self.url.starts_with("jdbc:") {
                    format!("jdbc:{}", masked)
                } else {
                    masked
                }
            }
            _ => self.url.clone(),
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }
}
