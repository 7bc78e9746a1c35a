//! Typed proxy properties
//!
//! Properties arrive as a raw key/value map (values may be JSON scalars or
//! strings). Every known key is parsed up front so an invalid value rejects
//! the whole property set instead of surfacing later at a read site.

use crate::error::{validation_error, AppError};
use crate::transaction::TransactionType;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

/// Raw property map as delivered by configuration events
pub type Props = BTreeMap<String, Value>;

/// Known property keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKey {
    SqlShow,
    SqlSimple,
    ExecutorSize,
    MaxConnectionsSizePerQuery,
    CheckTableMetadataEnabled,
    ProxyFrontendFlushThreshold,
    ProxyTransactionType,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 7] = [
        PropertyKey::SqlShow,
        PropertyKey::SqlSimple,
        PropertyKey::ExecutorSize,
        PropertyKey::MaxConnectionsSizePerQuery,
        PropertyKey::CheckTableMetadataEnabled,
        PropertyKey::ProxyFrontendFlushThreshold,
        PropertyKey::ProxyTransactionType,
    ];

    pub fn key(self) -> &'static str {
        match self {
            PropertyKey::SqlShow => "sql.show",
            PropertyKey::SqlSimple => "sql.simple",
            PropertyKey::ExecutorSize => "executor.size",
            PropertyKey::MaxConnectionsSizePerQuery => "max.connections.size.per.query",
            PropertyKey::CheckTableMetadataEnabled => "check.table.metadata.enabled",
            PropertyKey::ProxyFrontendFlushThreshold => "proxy.frontend.flush.threshold",
            PropertyKey::ProxyTransactionType => "proxy.transaction.type",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }
}

/// Parsed, validated property set
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationProperties {
    raw: Props,
    sql_show: bool,
    sql_simple: bool,
    executor_size: usize,
    max_connections_size_per_query: usize,
    check_table_metadata_enabled: bool,
    proxy_frontend_flush_threshold: usize,
    proxy_transaction_type: TransactionType,
}

impl Default for ConfigurationProperties {
    fn default() -> Self {
        Self {
            raw: Props::new(),
            sql_show: false,
            sql_simple: false,
            executor_size: 0,
            max_connections_size_per_query: 1,
            check_table_metadata_enabled: false,
            proxy_frontend_flush_threshold: 128,
            proxy_transaction_type: TransactionType::Local,
        }
    }
}

impl ConfigurationProperties {
    /// Parse a raw property map; unknown keys are kept and logged
    pub fn new(raw: Props) -> Result<Self, AppError> {
        let mut props = Self::default();

        for (key, value) in &raw {
            let Some(known) = PropertyKey::from_key(key) else {
                warn!(key = %key, "Ignoring unknown property");
                continue;
            };
            match known {
                PropertyKey::SqlShow => props.sql_show = parse_bool(key, value)?,
                PropertyKey::SqlSimple => props.sql_simple = parse_bool(key, value)?,
                PropertyKey::ExecutorSize => props.executor_size = parse_usize(key, value)?,
                PropertyKey::MaxConnectionsSizePerQuery => {
                    let size = parse_usize(key, value)?;
                    if size == 0 {
                        return Err(validation_error(format!("`{}` must be at least 1", key)));
                    }
                    props.max_connections_size_per_query = size;
                }
                PropertyKey::CheckTableMetadataEnabled => {
                    props.check_table_metadata_enabled = parse_bool(key, value)?
                }
                PropertyKey::ProxyFrontendFlushThreshold => {
                    props.proxy_frontend_flush_threshold = parse_usize(key, value)?
                }
                PropertyKey::ProxyTransactionType => {
                    props.proxy_transaction_type = TransactionType::from_str(&as_text(value))
                        .map_err(|e| validation_error(format!("`{}`: {}", key, e)))?
                }
            }
        }

        props.raw = raw;
        Ok(props)
    }

    /// The map this set was parsed from
    pub fn raw(&self) -> &Props {
        &self.raw
    }

    pub fn sql_show(&self) -> bool {
        self.sql_show
    }

    pub fn sql_simple(&self) -> bool {
        self.sql_simple
    }

    /// Executor worker count; 0 means unbounded
    pub fn executor_size(&self) -> usize {
        self.executor_size
    }

    pub fn max_connections_size_per_query(&self) -> usize {
        self.max_connections_size_per_query
    }

    pub fn check_table_metadata_enabled(&self) -> bool {
        self.check_table_metadata_enabled
    }

    pub fn proxy_frontend_flush_threshold(&self) -> usize {
        self.proxy_frontend_flush_threshold
    }

    pub fn proxy_transaction_type(&self) -> TransactionType {
        self.proxy_transaction_type
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn parse_bool(key: &str, value: &Value) -> Result<bool, AppError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => as_text(other)
            .parse::<bool>()
            .map_err(|_| validation_error(format!("`{}` expects a boolean, got {}", key, other))),
    }
}

fn parse_usize(key: &str, value: &Value) -> Result<usize, AppError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| validation_error(format!("`{}` expects a non-negative integer, got {}", key, n))),
        other => as_text(other).parse::<usize>().map_err(|_| {
            validation_error(format!("`{}` expects a non-negative integer, got {}", key, other))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Props {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults() {
        let props = ConfigurationProperties::new(Props::new()).unwrap();
        assert!(!props.sql_show());
        assert_eq!(props.executor_size(), 0);
        assert_eq!(props.max_connections_size_per_query(), 1);
        assert_eq!(props.proxy_frontend_flush_threshold(), 128);
        assert_eq!(props.proxy_transaction_type(), TransactionType::Local);
    }

    #[test]
    fn test_scalars_and_strings() {
        let props = ConfigurationProperties::new(props(json!({
            "sql.show": "true",
            "executor.size": 16,
            "max.connections.size.per.query": "4",
            "check.table.metadata.enabled": true,
            "proxy.transaction.type": "XA",
        })))
        .unwrap();

        assert!(props.sql_show());
        assert_eq!(props.executor_size(), 16);
        assert_eq!(props.max_connections_size_per_query(), 4);
        assert!(props.check_table_metadata_enabled());
        assert_eq!(props.proxy_transaction_type(), TransactionType::Xa);
    }

    #[test]
    fn test_invalid_value_rejects_set() {
        assert!(ConfigurationProperties::new(props(json!({"executor.size": "many"}))).is_err());
        assert!(ConfigurationProperties::new(props(json!({"executor.size": -1}))).is_err());
        assert!(ConfigurationProperties::new(props(json!({"sql.show": "yes"}))).is_err());
        assert!(ConfigurationProperties::new(props(json!({"max.connections.size.per.query": 0}))).is_err());
        assert!(ConfigurationProperties::new(props(json!({"proxy.transaction.type": "TWO_PHASE"}))).is_err());
    }

    #[test]
    fn test_unknown_keys_are_kept() {
        let props = ConfigurationProperties::new(props(json!({"custom.flag": 1}))).unwrap();
        assert!(props.raw().contains_key("custom.flag"));
    }
}
