//! Builds schema contexts from data sources, rules and properties

use super::runtime::{CachedDatabaseMetaData, ExecutorKernel, RuntimeContext, SqlParserEngine};
use super::{LogicSchema, SchemaContext};
use crate::datasource::{DataSourceMap, DatabaseType};
use crate::error::AppError;
use crate::metadata::{self, MetaData, MetaDataLoader};
use crate::properties::ConfigurationProperties;
use crate::rule::{RuleConfiguration, RulesBuilder};
use crate::transaction::TransactionManagerEngine;
use std::sync::Arc;
use tracing::debug;

/// Schema Builder
///
/// Owns nothing mutable. The data sources it is given stay owned by the
/// caller until a context is returned, so on error the caller closes them.
#[derive(Clone)]
pub struct SchemaContextBuilder {
    loader: Arc<dyn MetaDataLoader>,
}

impl SchemaContextBuilder {
    pub fn new(loader: Arc<dyn MetaDataLoader>) -> Self {
        Self { loader }
    }

    /// Build one fully initialized schema context
    pub async fn build(
        &self,
        name: &str,
        data_sources: DataSourceMap,
        dialect: DatabaseType,
        rule_configurations: Vec<RuleConfiguration>,
        props: &ConfigurationProperties,
    ) -> Result<SchemaContext, AppError> {
        let rules = RulesBuilder::build(&rule_configurations, data_sources.keys().map(String::as_str))?;

        let loaded = self.loader.load(dialect, &data_sources).await?;
        let decorated = metadata::decorate(loaded, &rules, props.check_table_metadata_enabled())?;
        let metadata = MetaData::new(&data_sources, decorated);

        let schema = LogicSchema {
            dialect,
            configurations: rule_configurations,
            rules,
            data_sources: Arc::new(data_sources),
            metadata: Arc::new(metadata),
        };
        let runtime = self.build_runtime(&schema, props);

        debug!(
            schema = %name,
            backends = schema.data_sources.len(),
            rules = schema.rules.len(),
            executor_size = runtime.executor().size(),
            "Built schema context"
        );

        Ok(SchemaContext::new(name, Arc::new(schema), Arc::new(runtime)))
    }

    /// Fresh runtime for a schema. The transaction engine is started last.
    pub fn build_runtime(&self, schema: &LogicSchema, props: &ConfigurationProperties) -> RuntimeContext {
        let cached = CachedDatabaseMetaData::load(schema.dialect, &schema.data_sources).map(Arc::new);
        let executor = ExecutorKernel::new(props.executor_size());
        let parser = Arc::new(SqlParserEngine::new(schema.dialect));
        let transaction_engine = Arc::new(TransactionManagerEngine::init(&schema.data_sources));
        RuntimeContext::new(cached, executor, parser, transaction_engine)
    }
}
