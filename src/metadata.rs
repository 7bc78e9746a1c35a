//! Table metadata of a schema
//!
//! Metadata is loaded per backend by a [`MetaDataLoader`], then decorated by
//! the schema's table-contained rules: actual tables covered by a rule are
//! folded into their logic table, everything else stays listed under the
//! backend it was found on.

use crate::datasource::{DataSourceMap, DatabaseType};
use crate::error::AppError;
use crate::rule::RuleHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// One column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetaData {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub primary_key: bool,
}

/// Columns of one table, in ordinal order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetaData {
    pub columns: Vec<ColumnMetaData>,
}

impl TableMetaData {
    pub fn new(columns: Vec<ColumnMetaData>) -> Self {
        Self { columns }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter(|c| c.primary_key).map(|c| c.name.as_str())
    }
}

/// Table name -> table metadata
pub type SchemaMetaData = BTreeMap<String, TableMetaData>;

/// Metadata of a schema after rule decoration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSchemaMetaData {
    /// Logic tables owned by a rule
    #[serde(default)]
    pub configured: SchemaMetaData,
    /// Tables no rule covers, per backend
    #[serde(default)]
    pub unconfigured: BTreeMap<String, SchemaMetaData>,
}

impl RuleSchemaMetaData {
    /// Every table name a client may address, logic tables first
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configured.keys().cloned().collect();
        let mut rest: BTreeSet<&String> = BTreeSet::new();
        for tables in self.unconfigured.values() {
            rest.extend(tables.keys());
        }
        names.extend(rest.into_iter().filter(|t| !self.configured.contains_key(*t)).cloned());
        names
    }

    pub fn find_table(&self, name: &str) -> Option<&TableMetaData> {
        self.configured
            .get(name)
            .or_else(|| self.unconfigured.values().find_map(|tables| tables.get(name)))
    }
}

/// Where a backend lives, as derived from its connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceMetaData {
    pub host: String,
    pub port: u16,
    pub catalog: String,
}

/// Metadata of one schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    pub data_sources: BTreeMap<String, DataSourceMetaData>,
    pub schema: RuleSchemaMetaData,
}

impl MetaData {
    /// Combine backend locations with decorated table metadata.
    ///
    /// Backends whose URL cannot be resolved into an endpoint are left out
    /// of `data_sources`.
    pub fn new(data_sources: &DataSourceMap, schema: RuleSchemaMetaData) -> Self {
        let data_sources = data_sources
            .iter()
            .filter_map(|(name, ds)| match ds.parameters().endpoint() {
                Ok(endpoint) => Some((
                    name.clone(),
                    DataSourceMetaData {
                        host: endpoint.host,
                        port: endpoint.port,
                        catalog: endpoint.database,
                    },
                )),
                Err(e) => {
                    debug!(backend = %name, "No endpoint metadata: {}", e);
                    None
                }
            })
            .collect();

        Self { data_sources, schema }
    }

    /// Same backend locations, different table metadata
    pub fn with_schema(&self, schema: RuleSchemaMetaData) -> Self {
        Self {
            data_sources: self.data_sources.clone(),
            schema,
        }
    }
}

/// Loads raw table metadata for every backend of a schema
#[async_trait]
pub trait MetaDataLoader: Send + Sync {
    async fn load(
        &self,
        dialect: DatabaseType,
        data_sources: &DataSourceMap,
    ) -> Result<BTreeMap<String, SchemaMetaData>, AppError>;
}

/// Fold loaded per-backend metadata into logic tables.
///
/// A logic table takes the columns of its first data node. With `check`
/// set, every other data node found must carry the same column names.
pub fn decorate(
    loaded: BTreeMap<String, SchemaMetaData>,
    rules: &[RuleHandle],
    check: bool,
) -> Result<RuleSchemaMetaData, AppError> {
    let mut unconfigured = loaded;
    let mut configured = SchemaMetaData::new();

    let table_rules = rules
        .iter()
        .filter_map(|rule| rule.as_table_contained())
        .flat_map(|rule| rule.table_rules().iter());

    for table_rule in table_rules {
        let mut logic: Option<(String, TableMetaData)> = None;

        for node in &table_rule.data_nodes {
            let Some(actual) = unconfigured
                .get_mut(&node.data_source)
                .and_then(|tables| tables.remove(&node.table))
            else {
                continue;
            };

            match &logic {
                Some((first, expected)) => {
                    if check && !expected.column_names().eq(actual.column_names()) {
                        return Err(AppError::InvalidRule(format!(
                            "Cannot get uniformed table structure for `{}`: `{}` and `{}` differ",
                            table_rule.logic_table, first, node
                        )));
                    }
                }
                None => logic = Some((node.to_string(), actual)),
            }
        }

        match logic {
            Some((_, table)) => {
                configured.insert(table_rule.logic_table.clone(), table);
            }
            None => warn!(table = %table_rule.logic_table, "No actual table found for logic table"),
        }
    }

    unconfigured.retain(|_, tables| !tables.is_empty());
    Ok(RuleSchemaMetaData {
        configured,
        unconfigured,
    })
}

/// Reads columns from `information_schema` of every PostgreSQL backend
#[derive(Debug, Default)]
pub struct PostgresMetaDataLoader;

impl PostgresMetaDataLoader {
    pub fn new() -> Self {
        Self
    }

    async fn load_backend(client: &tokio_postgres::Client) -> Result<SchemaMetaData, AppError> {
        let query = r#"
            SELECT
                c.table_name,
                c.column_name,
                c.data_type,
                COALESCE(
                    (SELECT true FROM information_schema.table_constraints tc
                     JOIN information_schema.key_column_usage kcu
                        ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                     WHERE tc.constraint_type = 'PRIMARY KEY'
                        AND tc.table_schema = c.table_schema
                        AND tc.table_name = c.table_name
                        AND kcu.column_name = c.column_name
                     LIMIT 1),
                    false
                ) AS is_primary_key
            FROM information_schema.columns c
            WHERE c.table_schema = current_schema()
            ORDER BY c.table_name, c.ordinal_position
        "#;

        let rows = client.query(query, &[]).await?;

        let mut tables = SchemaMetaData::new();
        for row in rows {
            let table: String = row.get("table_name");
            tables.entry(table).or_default().columns.push(ColumnMetaData {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                primary_key: row.get("is_primary_key"),
            });
        }
        Ok(tables)
    }
}

#[async_trait]
impl MetaDataLoader for PostgresMetaDataLoader {
    async fn load(
        &self,
        dialect: DatabaseType,
        data_sources: &DataSourceMap,
    ) -> Result<BTreeMap<String, SchemaMetaData>, AppError> {
        let mut loaded = BTreeMap::new();
        if dialect != DatabaseType::PostgreSQL {
            debug!(%dialect, "Skipping metadata load for non-PostgreSQL schema");
            return Ok(loaded);
        }

        for (name, data_source) in data_sources {
            let tables = async {
                let connection = data_source.pool().get_connection().await?;
                let client = connection.client().ok_or_else(|| {
                    AppError::Connection("Connection does not expose a PostgreSQL client".to_string())
                })?;
                Self::load_backend(client).await
            }
            .await
            .map_err(|e| AppError::configuration_build(name.as_str(), e))?;

            debug!(backend = %name, tables = tables.len(), "Loaded table metadata");
            loaded.insert(name.clone(), tables);
        }
        Ok(loaded)
    }
}
