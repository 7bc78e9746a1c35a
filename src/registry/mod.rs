//! Context registry
//!
//! The single mutable point of the proxy. The current [`SchemaContexts`] is
//! published through an [`ArcSwap`]: readers load it without locking and
//! always see one complete generation. Every change event runs under one
//! writer lock, builds a new snapshot off to the side and swaps it in.

pub mod backend;
pub mod event;

pub use backend::{BackendDataSource, PoolingMode};
pub use event::{ContextEvent, SchemaConfiguration};

use crate::auth::Authentication;
use crate::context::{ExecutorKernel, SchemaContext, SchemaContextBuilder, SchemaContexts};
use crate::datasource::{
    close_all, create_data_sources, DataSourceReconciler, DatabaseType, ParameterMap, PoolFactory,
};
use crate::error::AppError;
use crate::heartbeat::HeartbeatHandler;
use crate::metadata::{MetaDataLoader, RuleSchemaMetaData};
use crate::properties::{ConfigurationProperties, Props};
use crate::rule::{DataSourceDisabledEvent, RuleConfiguration, RulesBuilder};
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct ContextRegistry {
    contexts: Arc<ArcSwap<SchemaContexts>>,
    writer: Mutex<()>,
    circuit_break: AtomicBool,
    factory: Arc<dyn PoolFactory>,
    builder: SchemaContextBuilder,
    heartbeat: Arc<dyn HeartbeatHandler>,
    backend: BackendDataSource,
}

impl ContextRegistry {
    /// Empty registry; nothing is served until `Initialize` or `SchemaAdded`
    pub fn new(
        factory: Arc<dyn PoolFactory>,
        loader: Arc<dyn MetaDataLoader>,
        heartbeat: Arc<dyn HeartbeatHandler>,
    ) -> Self {
        let contexts = Arc::new(ArcSwap::from_pointee(SchemaContexts::default()));
        Self {
            backend: BackendDataSource::new(contexts.clone()),
            contexts,
            writer: Mutex::new(()),
            circuit_break: AtomicBool::new(false),
            factory,
            builder: SchemaContextBuilder::new(loader),
            heartbeat,
        }
    }

    /// Apply one change event; returns the generation published afterwards
    pub async fn handle(&self, event: ContextEvent) -> Result<u64, AppError> {
        let kind = event.kind();
        debug!(event = kind, "Handling context event");

        let result = match event {
            ContextEvent::Initialize {
                schemas,
                authentication,
                props,
            } => self.initialize(schemas, authentication, props).await,
            ContextEvent::SchemaAdded {
                schema_name,
                data_sources,
                rules,
            } => self.add_schema(&schema_name, &data_sources, rules).await,
            ContextEvent::SchemaDeleted { schema_name } => self.delete_schema(&schema_name).await,
            ContextEvent::PropertiesChanged { props } => self.change_properties(props).await,
            ContextEvent::AuthenticationChanged { authentication } => {
                self.change_authentication(authentication).await
            }
            ContextEvent::CircuitStateChanged { open } => self.change_circuit_state(open).await,
            ContextEvent::MetaDataChanged { schema_names, metadata } => {
                self.change_metadata(&schema_names, metadata).await
            }
            ContextEvent::RuleConfigurationsChanged { schema_name, rules } => {
                self.change_rule_configurations(&schema_name, rules).await
            }
            ContextEvent::DisabledStateChanged {
                schema_name,
                data_source_name,
                disabled,
            } => {
                self.change_disabled_state(&schema_name, &data_source_name, disabled)
                    .await
            }
            ContextEvent::DataSourceChanged {
                schema_name,
                data_sources,
            } => self.change_data_sources(&schema_name, &data_sources).await,
            ContextEvent::HeartbeatDetect => Ok(self.detect_heartbeat().await),
        };

        if let Err(e) = &result {
            warn!(event = kind, "Context event rejected: {}", e);
        }
        result
    }

    /// Build every schema and replace the snapshot wholesale.
    ///
    /// The dialect comes from the first configured connection URL. If any
    /// schema fails, the schemas already built are closed and nothing is
    /// published.
    pub async fn initialize(
        &self,
        schemas: IndexMap<String, SchemaConfiguration>,
        authentication: Authentication,
        props: Props,
    ) -> Result<u64, AppError> {
        let props = ConfigurationProperties::new(props)?;
        let dialect = schemas
            .values()
            .flat_map(|schema| schema.data_sources.values())
            .next()
            .ok_or_else(|| AppError::Config("No data source configured in any schema".to_string()))?
            .database_type()?;

        let _guard = self.writer.lock().await;

        let mut built: HashMap<String, Arc<SchemaContext>> = HashMap::with_capacity(schemas.len());
        for (name, schema) in schemas {
            match self
                .build_schema(&name, &schema.data_sources, dialect, schema.rules, &props)
                .await
            {
                Ok(context) => {
                    built.insert(name, Arc::new(context));
                }
                Err(e) => {
                    built.values().for_each(|ctx| ctx.close());
                    return Err(e);
                }
            }
        }

        let previous = self.contexts.load_full();
        let next = previous.replace(built, Arc::new(authentication), Arc::new(props), Some(dialect));
        self.backend.clear();
        let generation = self.publish(next);

        previous.schemas().values().for_each(|ctx| ctx.close());
        info!(generation, %dialect, "Schema contexts initialized");
        Ok(generation)
    }

    /// Build and publish one new schema
    pub async fn add_schema(
        &self,
        schema_name: &str,
        data_sources: &ParameterMap,
        rules: Vec<RuleConfiguration>,
    ) -> Result<u64, AppError> {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();

        let dialect = match current.dialect() {
            Some(dialect) => dialect,
            None => data_sources
                .values()
                .next()
                .ok_or_else(|| AppError::Config(format!("Schema `{}` has no data source", schema_name)))?
                .database_type()?,
        };

        let context = self
            .build_schema(schema_name, data_sources, dialect, rules, current.properties())
            .await?;
        let replaced = current.schema(schema_name).cloned();
        let generation = self.publish(current.with_schema(Arc::new(context)));

        if let Some(old) = replaced {
            warn!(schema = %schema_name, "Added schema replaced an existing one");
            old.close();
            self.backend.prune_schema(schema_name);
        }
        info!(schema = %schema_name, generation, "Schema added");
        Ok(generation)
    }

    /// Remove a schema, then close its pools and transaction engine
    pub async fn delete_schema(&self, schema_name: &str) -> Result<u64, AppError> {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();

        let Some(removed) = current.schema(schema_name).cloned() else {
            info!(schema = %schema_name, "Ignoring deletion of unknown schema");
            return Ok(current.generation());
        };

        let generation = self.publish(current.without_schema(schema_name));
        removed.close();
        self.backend.prune_schema(schema_name);
        info!(schema = %schema_name, generation, "Schema deleted");
        Ok(generation)
    }

    /// Swap properties and give every schema a runtime with a resized executor
    pub async fn change_properties(&self, props: Props) -> Result<u64, AppError> {
        let props = Arc::new(ConfigurationProperties::new(props)?);

        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();

        let rebuilt: Vec<Arc<SchemaContext>> = current
            .schemas()
            .values()
            .map(|ctx| {
                let runtime = ctx.runtime().with_executor(ExecutorKernel::new(props.executor_size()));
                Arc::new(SchemaContext::new(ctx.name(), ctx.schema().clone(), Arc::new(runtime)))
            })
            .collect();

        let generation = self.publish(current.with_properties(props.clone(), rebuilt));
        info!(generation, props = ?props.raw(), "Properties changed");
        Ok(generation)
    }

    pub async fn change_authentication(&self, authentication: Authentication) -> Result<u64, AppError> {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();

        let users: Vec<&str> = authentication.user_names().collect();
        info!(users = ?users, "Authentication changed");
        let generation = self.publish(current.with_authentication(Arc::new(authentication)));
        debug!(generation, "Authentication published");
        Ok(generation)
    }

    /// Flip the circuit-break flag; the snapshot is untouched
    pub async fn change_circuit_state(&self, open: bool) -> Result<u64, AppError> {
        let _guard = self.writer.lock().await;
        let previous = self.circuit_break.swap(open, Ordering::AcqRel);
        if previous != open {
            info!(open, "Circuit break state changed");
        }
        Ok(self.contexts.load().generation())
    }

    /// Replace the metadata of the named schemas, sharing everything else
    pub async fn change_metadata(
        &self,
        schema_names: &[String],
        metadata: RuleSchemaMetaData,
    ) -> Result<u64, AppError> {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();

        let mut replaced = Vec::with_capacity(schema_names.len());
        for name in schema_names {
            let Some(ctx) = current.schema(name) else {
                warn!(schema = %name, "Metadata changed for unknown schema");
                continue;
            };
            let schema = ctx.schema().with_metadata(ctx.metadata().with_schema(metadata.clone()));
            replaced.push(Arc::new(SchemaContext::new(
                ctx.name(),
                Arc::new(schema),
                ctx.runtime().clone(),
            )));
        }

        if replaced.is_empty() {
            return Ok(current.generation());
        }
        let count = replaced.len();
        let generation = self.publish(current.with_schemas(replaced));
        info!(schemas = count, generation, "Metadata changed");
        Ok(generation)
    }

    /// Rebuild one schema's rules against its current data sources
    pub async fn change_rule_configurations(
        &self,
        schema_name: &str,
        configurations: Vec<RuleConfiguration>,
    ) -> Result<u64, AppError> {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();
        let ctx = current
            .schema(schema_name)
            .ok_or_else(|| AppError::SchemaNotFound(schema_name.to_string()))?;

        let rules = RulesBuilder::build(&configurations, ctx.data_sources().keys().map(String::as_str))?;
        let schema = ctx.schema().with_rules(configurations, rules);
        let context = SchemaContext::new(schema_name, Arc::new(schema), ctx.runtime().clone());

        let generation = self.publish(current.with_schema(Arc::new(context)));
        info!(schema = %schema_name, generation, "Rule configurations changed");
        Ok(generation)
    }

    /// Tell every status-aware rule of a schema that a backend changed state
    pub async fn change_disabled_state(
        &self,
        schema_name: &str,
        data_source_name: &str,
        disabled: bool,
    ) -> Result<u64, AppError> {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();
        let ctx = current
            .schema(schema_name)
            .ok_or_else(|| AppError::SchemaNotFound(schema_name.to_string()))?;

        let event = DataSourceDisabledEvent {
            data_source_name: data_source_name.to_string(),
            disabled,
        };
        let mut notified = 0;
        for rule in ctx.rules() {
            if let Some(rule) = rule.as_status_contained() {
                rule.update_rule_status(&event);
                notified += 1;
            }
        }
        info!(
            schema = %schema_name,
            backend = %data_source_name,
            disabled,
            rules = notified,
            "Data source state changed"
        );
        Ok(current.generation())
    }

    /// Reconcile one schema's data sources and rebuild it fully.
    ///
    /// New pools are built before anything is closed. Superseded pools and
    /// the old transaction engine are closed only after the rebuilt schema
    /// is published; on failure the new pools are closed instead.
    pub async fn change_data_sources(&self, schema_name: &str, parameters: &ParameterMap) -> Result<u64, AppError> {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();
        let ctx = current
            .schema(schema_name)
            .ok_or_else(|| AppError::SchemaNotFound(schema_name.to_string()))?;

        let reconciliation = DataSourceReconciler::new(self.factory.as_ref()).reconcile(ctx.data_sources(), parameters)?;

        let rebuilt = self
            .builder
            .build(
                schema_name,
                reconciliation.data_sources().clone(),
                ctx.dialect(),
                ctx.rule_configurations().to_vec(),
                current.properties(),
            )
            .await;

        let rebuilt = match rebuilt {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                reconciliation.abort();
                return Err(e);
            }
        };

        let generation = self.publish(current.with_schema(Arc::new(rebuilt)));
        let deleted = reconciliation.changes().deleted.clone();
        reconciliation.commit();
        ctx.runtime().transaction_engine().close_quietly();
        self.backend.prune_data_sources(schema_name, &deleted);

        info!(schema = %schema_name, generation, "Data sources changed");
        Ok(generation)
    }

    /// Hand the current schema map to the heartbeat handler
    pub async fn detect_heartbeat(&self) -> u64 {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load();
        self.heartbeat.handle(current.schemas());
        current.generation()
    }

    /// Publish an empty snapshot and close every schema
    pub async fn close(&self) {
        let _guard = self.writer.lock().await;
        let current = self.contexts.load_full();
        let next = current.replace(
            HashMap::new(),
            current.authentication().clone(),
            current.properties().clone(),
            current.dialect(),
        );
        self.publish(next);
        self.backend.clear();

        current.schemas().values().for_each(|ctx| ctx.close());
        info!(schemas = current.schemas().len(), "Schema contexts closed");
    }

    async fn build_schema(
        &self,
        schema_name: &str,
        parameters: &ParameterMap,
        dialect: DatabaseType,
        rules: Vec<RuleConfiguration>,
        props: &ConfigurationProperties,
    ) -> Result<SchemaContext, AppError> {
        let data_sources = create_data_sources(self.factory.as_ref(), parameters)?;
        let owned = data_sources.clone();
        self.builder
            .build(schema_name, data_sources, dialect, rules, props)
            .await
            .map_err(|e| {
                close_all(owned.values());
                e
            })
    }

    fn publish(&self, next: SchemaContexts) -> u64 {
        let generation = next.generation();
        self.contexts.store(Arc::new(next));
        generation
    }

    pub fn schema_exists(&self, name: &str) -> bool {
        !name.is_empty() && self.contexts.load().schema(name).is_some()
    }

    pub fn get_schema(&self, name: &str) -> Result<Arc<SchemaContext>, AppError> {
        self.contexts
            .load()
            .schema(name)
            .cloned()
            .ok_or_else(|| AppError::SchemaNotFound(name.to_string()))
    }

    /// Schema names of one generation, sorted
    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contexts.load().schemas().keys().cloned().collect();
        names.sort();
        names
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Arc<SchemaContexts> {
        self.contexts.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.contexts.load().generation()
    }

    pub fn is_circuit_break(&self) -> bool {
        self.circuit_break.load(Ordering::Acquire)
    }

    /// Connection acquirer bound to this registry's snapshots
    pub fn backend_data_source(&self) -> &BackendDataSource {
        &self.backend
    }
}
