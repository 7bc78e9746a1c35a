//! In-memory pools, metadata and registry fixtures for unit tests

use crate::context::{SchemaContext, SchemaContextBuilder};
use crate::datasource::{
    create_data_sources, BackendConnection, BackendPool, Connection, ConnectionParameters, DataSourceMap,
    DatabaseType, PoolFactory, PoolHandle, PoolStatus,
};
use crate::error::AppError;
use crate::heartbeat::PoolStatusHeartbeat;
use crate::metadata::{ColumnMetaData, MetaDataLoader, SchemaMetaData, TableMetaData};
use crate::properties::ConfigurationProperties;
use crate::registry::ContextRegistry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Parameters of a backend called `name`
pub fn params(name: &str) -> ConnectionParameters {
    ConnectionParameters::new(format!("postgres://localhost:5432/{}", name))
}

#[derive(Debug)]
pub struct MockConnection {
    data_source_name: String,
    live: Arc<AtomicUsize>,
}

impl BackendConnection for MockConnection {
    fn data_source_name(&self) -> &str {
        &self.data_source_name
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pool with failure injection and an optional gate that holds every
/// `get_connection` until a permit is added.
#[derive(Debug)]
pub struct MockPool {
    name: String,
    parameters: ConnectionParameters,
    fail_close: bool,
    closed: AtomicBool,
    close_attempts: AtomicUsize,
    attempts: AtomicUsize,
    fail_on_attempt: Mutex<Option<usize>>,
    live: Arc<AtomicUsize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockPool {
    fn new(name: &str, parameters: &ConnectionParameters, fail_close: bool) -> Self {
        Self {
            name: name.to_string(),
            parameters: parameters.clone(),
            fail_close,
            closed: AtomicBool::new(false),
            close_attempts: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            fail_on_attempt: Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_attempts(&self) -> usize {
        self.close_attempts.load(Ordering::SeqCst)
    }

    /// Calls to `get_connection` so far, including failed and waiting ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Connections handed out and not yet dropped
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Fail the `attempt`-th call (1-based) to `get_connection`
    pub fn fail_on_attempt(&self, attempt: usize) {
        *self.fail_on_attempt.lock() = Some(attempt);
    }

    /// Hold every `get_connection` until released; returns the gate
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Wait until `count` calls are inside `get_connection`
    pub async fn wait_in_flight(&self, count: usize) {
        for _ in 0..200 {
            if self.in_flight() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pool `{}` never reached {} in-flight calls", self.name, count);
    }
}

#[async_trait]
impl BackendPool for MockPool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_connection(&self) -> Result<Connection, AppError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.is_closed() {
            return Err(AppError::Connection(format!("pool `{}` is closed", self.name)));
        }
        if *self.fail_on_attempt.lock() == Some(attempt) {
            return Err(AppError::Connection(format!("connection {} to `{}` refused", attempt, self.name)));
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            data_source_name: self.name.clone(),
            live: self.live.clone(),
        }))
    }

    fn close(&self) -> Result<(), AppError> {
        self.close_attempts.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(AppError::Connection(format!("pool `{}` refused to close", self.name)));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        MockPool::is_closed(self)
    }

    fn status(&self) -> PoolStatus {
        let live = self.live_connections();
        PoolStatus {
            max_size: self.parameters.max_pool_size,
            size: live,
            available: self.parameters.max_pool_size.saturating_sub(live),
        }
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    built: Vec<Arc<MockPool>>,
    fail_build: HashSet<String>,
    fail_close: HashSet<String>,
}

/// Pool factory recording every pool it builds
#[derive(Debug, Clone, Default)]
pub struct MockPoolFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockPoolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_build(&self, name: &str) {
        self.state.lock().fail_build.insert(name.to_string());
    }

    pub fn fail_close(&self, name: &str) {
        self.state.lock().fail_close.insert(name.to_string());
    }

    /// Latest pool built for `name`
    pub fn pool(&self, name: &str) -> Arc<MockPool> {
        self.pools_named(name)
            .pop()
            .unwrap_or_else(|| panic!("no pool built for `{}`", name))
    }

    /// Every pool built for `name`, oldest first
    pub fn pools_named(&self, name: &str) -> Vec<Arc<MockPool>> {
        self.state
            .lock()
            .built
            .iter()
            .filter(|p| p.name == name)
            .cloned()
            .collect()
    }

    pub fn built_count(&self) -> usize {
        self.state.lock().built.len()
    }
}

impl PoolFactory for MockPoolFactory {
    fn build(&self, name: &str, parameters: &ConnectionParameters) -> Result<PoolHandle, AppError> {
        let mut state = self.state.lock();
        if state.fail_build.contains(name) {
            return Err(AppError::Connection(format!("cannot reach `{}`", parameters.url)));
        }
        let pool = Arc::new(MockPool::new(name, parameters, state.fail_close.contains(name)));
        state.built.push(pool.clone());
        Ok(pool)
    }
}

/// Metadata loader answering from a fixed table list
#[derive(Debug, Default)]
pub struct StaticMetaDataLoader {
    tables: BTreeMap<String, SchemaMetaData>,
}

impl StaticMetaDataLoader {
    pub fn with_table(backend: &str, table: &str) -> Self {
        Self::default().table(backend, table, &["id"])
    }

    pub fn table(mut self, backend: &str, table: &str, columns: &[&str]) -> Self {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnMetaData {
                name: name.to_string(),
                data_type: "integer".to_string(),
                primary_key: i == 0,
            })
            .collect();
        self.tables
            .entry(backend.to_string())
            .or_default()
            .insert(table.to_string(), TableMetaData::new(columns));
        self
    }
}

#[async_trait]
impl MetaDataLoader for StaticMetaDataLoader {
    async fn load(
        &self,
        _dialect: DatabaseType,
        data_sources: &DataSourceMap,
    ) -> Result<BTreeMap<String, SchemaMetaData>, AppError> {
        Ok(self
            .tables
            .iter()
            .filter(|(backend, _)| data_sources.contains_key(*backend))
            .map(|(backend, tables)| (backend.clone(), tables.clone()))
            .collect())
    }
}

/// A built schema context over mock pools, without rules
pub async fn schema_context(factory: &MockPoolFactory, name: &str, backends: &[&str]) -> SchemaContext {
    let parameters = backends.iter().map(|b| (b.to_string(), params(b))).collect();
    let data_sources = create_data_sources(factory, &parameters).unwrap();
    SchemaContextBuilder::new(Arc::new(StaticMetaDataLoader::default()))
        .build(
            name,
            data_sources,
            DatabaseType::PostgreSQL,
            Vec::new(),
            &ConfigurationProperties::default(),
        )
        .await
        .unwrap()
}

/// Registry over `factory` with a static loader and a pool-status heartbeat
pub fn registry(factory: &MockPoolFactory, loader: StaticMetaDataLoader) -> (ContextRegistry, Arc<PoolStatusHeartbeat>) {
    let heartbeat = Arc::new(PoolStatusHeartbeat::new());
    let registry = ContextRegistry::new(Arc::new(factory.clone()), Arc::new(loader), heartbeat.clone());
    (registry, heartbeat)
}
