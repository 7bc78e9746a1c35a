//! Runtime snapshot types
//!
//! [`SchemaContexts`] is the complete, immutable configuration the proxy
//! serves from. Every change produces a new value that shares untouched
//! schema contexts by `Arc` with its predecessor.

pub mod builder;
pub mod runtime;

pub use builder::SchemaContextBuilder;
pub use runtime::{CachedDatabaseMetaData, ExecutorKernel, RuntimeContext, SqlParserEngine};

use crate::auth::Authentication;
use crate::datasource::{close_all, DataSource, DataSourceMap, DatabaseType};
use crate::metadata::MetaData;
use crate::properties::ConfigurationProperties;
use crate::rule::{RuleConfiguration, RuleHandle};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration side of a schema: rules, data sources and metadata
#[derive(Debug)]
pub struct LogicSchema {
    pub dialect: DatabaseType,
    pub configurations: Vec<RuleConfiguration>,
    pub rules: Vec<RuleHandle>,
    pub data_sources: Arc<DataSourceMap>,
    pub metadata: Arc<MetaData>,
}

impl LogicSchema {
    /// Same rules and data sources over different metadata
    pub fn with_metadata(&self, metadata: MetaData) -> Self {
        Self {
            dialect: self.dialect,
            configurations: self.configurations.clone(),
            rules: self.rules.clone(),
            data_sources: self.data_sources.clone(),
            metadata: Arc::new(metadata),
        }
    }

    /// Same data sources and metadata under different rules
    pub fn with_rules(&self, configurations: Vec<RuleConfiguration>, rules: Vec<RuleHandle>) -> Self {
        Self {
            dialect: self.dialect,
            configurations,
            rules,
            data_sources: self.data_sources.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// One schema of the runtime snapshot
#[derive(Debug)]
pub struct SchemaContext {
    name: String,
    schema: Arc<LogicSchema>,
    runtime: Arc<RuntimeContext>,
}

impl SchemaContext {
    pub fn new(name: impl Into<String>, schema: Arc<LogicSchema>, runtime: Arc<RuntimeContext>) -> Self {
        Self {
            name: name.into(),
            schema,
            runtime,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<LogicSchema> {
        &self.schema
    }

    pub fn runtime(&self) -> &Arc<RuntimeContext> {
        &self.runtime
    }

    pub fn dialect(&self) -> DatabaseType {
        self.schema.dialect
    }

    pub fn data_sources(&self) -> &DataSourceMap {
        &self.schema.data_sources
    }

    pub fn data_source(&self, name: &str) -> Option<&DataSource> {
        self.schema.data_sources.get(name)
    }

    pub fn rules(&self) -> &[RuleHandle] {
        &self.schema.rules
    }

    pub fn rule_configurations(&self) -> &[RuleConfiguration] {
        &self.schema.configurations
    }

    pub fn metadata(&self) -> &MetaData {
        &self.schema.metadata
    }

    /// Close every pool and the transaction engine, logging failures
    pub fn close(&self) {
        close_all(self.schema.data_sources.values());
        self.runtime.transaction_engine().close_quietly();
    }
}

/// The runtime snapshot
#[derive(Debug, Clone)]
pub struct SchemaContexts {
    schemas: HashMap<String, Arc<SchemaContext>>,
    properties: Arc<ConfigurationProperties>,
    authentication: Arc<Authentication>,
    dialect: Option<DatabaseType>,
    generation: u64,
    published_at: DateTime<Utc>,
}

impl Default for SchemaContexts {
    fn default() -> Self {
        Self {
            schemas: HashMap::new(),
            properties: Arc::new(ConfigurationProperties::default()),
            authentication: Arc::new(Authentication::default()),
            dialect: None,
            generation: 0,
            published_at: Utc::now(),
        }
    }
}

impl SchemaContexts {
    /// Wholly new snapshot following `self`
    pub fn replace(
        &self,
        schemas: HashMap<String, Arc<SchemaContext>>,
        authentication: Arc<Authentication>,
        properties: Arc<ConfigurationProperties>,
        dialect: Option<DatabaseType>,
    ) -> Self {
        Self {
            schemas,
            properties,
            authentication,
            dialect,
            generation: self.generation + 1,
            published_at: Utc::now(),
        }
    }

    fn successor(&self, schemas: HashMap<String, Arc<SchemaContext>>) -> Self {
        self.replace(
            schemas,
            self.authentication.clone(),
            self.properties.clone(),
            self.dialect,
        )
    }

    /// Copy with `context` inserted or replacing the entry of the same name
    pub fn with_schema(&self, context: Arc<SchemaContext>) -> Self {
        let mut schemas = self.schemas.clone();
        schemas.insert(context.name().to_string(), context);
        let mut next = self.successor(schemas);
        next.dialect = next.dialect.or_else(|| next.schemas.values().next().map(|s| s.dialect()));
        next
    }

    /// Copy without `name`
    pub fn without_schema(&self, name: &str) -> Self {
        let mut schemas = self.schemas.clone();
        schemas.remove(name);
        self.successor(schemas)
    }

    /// Copy with the given entries replaced
    pub fn with_schemas(&self, replaced: impl IntoIterator<Item = Arc<SchemaContext>>) -> Self {
        let mut schemas = self.schemas.clone();
        schemas.extend(replaced.into_iter().map(|ctx| (ctx.name().to_string(), ctx)));
        self.successor(schemas)
    }

    /// Copy with new properties and the given entries replaced
    pub fn with_properties(
        &self,
        properties: Arc<ConfigurationProperties>,
        replaced: impl IntoIterator<Item = Arc<SchemaContext>>,
    ) -> Self {
        let mut next = self.with_schemas(replaced);
        next.properties = properties;
        next
    }

    /// Copy with new authentication, schemas shared
    pub fn with_authentication(&self, authentication: Arc<Authentication>) -> Self {
        let mut next = self.successor(self.schemas.clone());
        next.authentication = authentication;
        next
    }

    pub fn schemas(&self) -> &HashMap<String, Arc<SchemaContext>> {
        &self.schemas
    }

    pub fn schema(&self, name: &str) -> Option<&Arc<SchemaContext>> {
        self.schemas.get(name)
    }

    pub fn properties(&self) -> &Arc<ConfigurationProperties> {
        &self.properties
    }

    pub fn authentication(&self) -> &Arc<Authentication> {
        &self.authentication
    }

    /// Dialect shared by every schema; `None` until the first schema arrives
    pub fn dialect(&self) -> Option<DatabaseType> {
        self.dialect
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }
}
