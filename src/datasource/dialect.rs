//! Database dialect recognition from connection URLs

use crate::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Database dialect of a schema's backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    H2,
    SQLServer,
    Oracle,
}

/// URL prefix recognizers, checked in order
static RECOGNIZERS: Lazy<Vec<(Regex, DatabaseType)>> = Lazy::new(|| {
    [
        (r"(?i)^(jdbc:)?postgres(ql)?://", DatabaseType::PostgreSQL),
        (r"(?i)^(jdbc:)?(mysql|mariadb)://", DatabaseType::MySQL),
        (r"(?i)^jdbc:h2:", DatabaseType::H2),
        (r"(?i)^(jdbc:)?(microsoft:)?sqlserver://", DatabaseType::SQLServer),
        (r"(?i)^jdbc:oracle:", DatabaseType::Oracle),
    ]
    .into_iter()
    .map(|(pattern, db_type)| (Regex::new(pattern).expect("static dialect pattern"), db_type))
    .collect()
});

impl DatabaseType {
    /// Recognize the dialect of a connection URL
    pub fn from_url(url: &str) -> Result<Self, AppError> {
        RECOGNIZERS
            .iter()
            .find(|(pattern, _)| pattern.is_match(url.trim()))
            .map(|(_, db_type)| *db_type)
            .ok_or_else(|| AppError::Config(format!("Cannot recognize database type of url `{}`", url)))
    }

    /// Default port used when the URL omits one
    pub fn default_port(self) -> Option<u16> {
        match self {
            DatabaseType::PostgreSQL => Some(5432),
            DatabaseType::MySQL => Some(3306),
            DatabaseType::SQLServer => Some(1433),
            DatabaseType::Oracle => Some(1521),
            DatabaseType::H2 => None,
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatabaseType::PostgreSQL => "PostgreSQL",
            DatabaseType::MySQL => "MySQL",
            DatabaseType::H2 => "H2",
            DatabaseType::SQLServer => "SQLServer",
            DatabaseType::Oracle => "Oracle",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognize_postgres_variants() {
        for url in [
            "postgres://u:p@localhost/db",
            "postgresql://u:p@localhost:5433/db",
            "jdbc:postgresql://localhost/db",
            "POSTGRES://host/db",
        ] {
            assert_eq!(DatabaseType::from_url(url).unwrap(), DatabaseType::PostgreSQL, "{}", url);
        }
    }

    #[test]
    fn test_recognize_other_dialects() {
        assert_eq!(DatabaseType::from_url("jdbc:mysql://h/db").unwrap(), DatabaseType::MySQL);
        assert_eq!(DatabaseType::from_url("mariadb://h/db").unwrap(), DatabaseType::MySQL);
        assert_eq!(DatabaseType::from_url("jdbc:h2:mem:test").unwrap(), DatabaseType::H2);
        assert_eq!(DatabaseType::from_url("jdbc:sqlserver://h").unwrap(), DatabaseType::SQLServer);
        assert_eq!(DatabaseType::from_url("jdbc:oracle:thin:@h:1521:x").unwrap(), DatabaseType::Oracle);
    }

    #[test]
    fn test_unknown_url() {
        assert!(DatabaseType::from_url("redis://localhost").is_err());
        assert!(DatabaseType::from_url("").is_err());
    }
}
