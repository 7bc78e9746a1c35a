//! Connection acquisition
//!
//! Resolves `(schema, backend)` against the currently published snapshot and
//! hands out connections, honoring pooling mode and transaction affinity.

use crate::context::{SchemaContext, SchemaContexts};
use crate::datasource::{Connection, PoolHandle};
use crate::error::AppError;
use crate::transaction::{TransactionManager, TransactionType};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// How a batch of connections for one backend may be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolingMode {
    /// Each connection is created independently, no synchronization
    StrictPerConnection,
    /// Acquisitions for the same backend are serialized
    SharedMemory,
}

type LockKey = (String, String);

/// Connection acquirer over the registry's published snapshot
#[derive(Debug)]
pub struct BackendDataSource {
    contexts: Arc<ArcSwap<SchemaContexts>>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl BackendDataSource {
    pub(crate) fn new(contexts: Arc<ArcSwap<SchemaContexts>>) -> Self {
        Self {
            contexts,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// One connection, outside any shared-memory serialization
    pub async fn get_connection(&self, schema_name: &str, data_source_name: &str) -> Result<Connection, AppError> {
        self.get_connections(schema_name, data_source_name, 1, PoolingMode::StrictPerConnection)
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal("No connection acquired".to_string()))
    }

    /// `count` connections under a `LOCAL` transaction
    pub async fn get_connections(
        &self,
        schema_name: &str,
        data_source_name: &str,
        count: usize,
        mode: PoolingMode,
    ) -> Result<Vec<Connection>, AppError> {
        self.get_connections_with_transaction(schema_name, data_source_name, count, mode, TransactionType::Local, None)
            .await
    }

    /// `count` connections, bound to transaction `transaction_id` of
    /// `transaction_type` while it is active.
    ///
    /// Without an id, or once that transaction has finished, connections come
    /// straight from the pool. If connection *k* of a batch fails, the *k - 1*
    /// already created are released before the error is returned.
    pub async fn get_connections_with_transaction(
        &self,
        schema_name: &str,
        data_source_name: &str,
        count: usize,
        mode: PoolingMode,
        transaction_type: TransactionType,
        transaction_id: Option<Uuid>,
    ) -> Result<Vec<Connection>, AppError> {
        let snapshot = self.contexts.load_full();
        self.acquire(&snapshot, schema_name, data_source_name, count, mode, transaction_type, transaction_id)
            .await
    }

    /// Open a transaction of `transaction_type` on a schema and return its id
    pub fn begin_transaction(&self, schema_name: &str, transaction_type: TransactionType) -> Result<Uuid, AppError> {
        self.transaction_manager(schema_name, transaction_type)?.begin()
    }

    pub async fn commit_transaction(
        &self,
        schema_name: &str,
        transaction_type: TransactionType,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        self.transaction_manager(schema_name, transaction_type)?
            .commit(transaction_id)
            .await
    }

    pub async fn rollback_transaction(
        &self,
        schema_name: &str,
        transaction_type: TransactionType,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        self.transaction_manager(schema_name, transaction_type)?
            .rollback(transaction_id)
            .await
    }

    fn transaction_manager(
        &self,
        schema_name: &str,
        transaction_type: TransactionType,
    ) -> Result<Arc<dyn TransactionManager>, AppError> {
        self.contexts
            .load()
            .schema(schema_name)
            .ok_or_else(|| AppError::SchemaNotFound(schema_name.to_string()))?
            .runtime()
            .transaction_engine()
            .transaction_manager(transaction_type)
            .ok_or_else(|| AppError::Transaction(format!("{} transactions need no manager", transaction_type)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn acquire(
        &self,
        snapshot: &SchemaContexts,
        schema_name: &str,
        data_source_name: &str,
        count: usize,
        mode: PoolingMode,
        transaction_type: TransactionType,
        transaction_id: Option<Uuid>,
    ) -> Result<Vec<Connection>, AppError> {
        let (context, pool) = resolve(snapshot, schema_name, data_source_name)?;
        let transaction = transaction_id.and_then(|id| {
            context
                .runtime()
                .transaction_engine()
                .transaction_manager(transaction_type)
                .map(|manager| (manager, id))
        });
        let transaction = transaction.as_ref().map(|(manager, id)| (&**manager, *id));

        if count == 0 {
            return Ok(Vec::new());
        }

        match mode {
            PoolingMode::StrictPerConnection => {
                create_connections(&pool, transaction, data_source_name, count).await
            }
            PoolingMode::SharedMemory => {
                let lock = self.lock_for(schema_name, data_source_name);
                let _guard = lock.lock().await;
                // The schema may have been removed while this call waited.
                let current = self.contexts.load_full();
                if let Err(e) = resolve(&current, schema_name, data_source_name) {
                    self.release_lock(schema_name, data_source_name, &lock);
                    return Err(e);
                }
                debug!(schema = %schema_name, backend = %data_source_name, count, "Acquiring under shared-memory lock");
                create_connections(&pool, transaction, data_source_name, count).await
            }
        }
    }

    /// Remove a lock re-inserted by an acquisition that raced a removal
    fn release_lock(&self, schema_name: &str, data_source_name: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        let key = (schema_name.to_string(), data_source_name.to_string());
        if locks.get(&key).is_some_and(|held| Arc::ptr_eq(held, lock)) {
            locks.remove(&key);
        }
    }

    fn lock_for(&self, schema_name: &str, data_source_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry((schema_name.to_string(), data_source_name.to_string()))
            .or_default()
            .clone()
    }

    /// Drop the acquisition locks of a schema
    pub(crate) fn prune_schema(&self, schema_name: &str) {
        self.locks.lock().retain(|(schema, _), _| schema != schema_name);
    }

    /// Drop the acquisition locks of some backends of a schema
    pub(crate) fn prune_data_sources(&self, schema_name: &str, data_source_names: &[String]) {
        self.locks
            .lock()
            .retain(|(schema, backend), _| schema != schema_name || !data_source_names.contains(backend));
    }

    pub(crate) fn clear(&self) {
        self.locks.lock().clear();
    }

    /// Number of `(schema, backend)` pairs holding an acquisition lock
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}

fn resolve<'a>(
    snapshot: &'a SchemaContexts,
    schema_name: &str,
    data_source_name: &str,
) -> Result<(&'a SchemaContext, PoolHandle), AppError> {
    let context = snapshot
        .schema(schema_name)
        .ok_or_else(|| AppError::SchemaNotFound(schema_name.to_string()))?;
    let pool = context
        .data_source(data_source_name)
        .ok_or_else(|| AppError::DataSourceNotFound {
            schema: schema_name.to_string(),
            backend: data_source_name.to_string(),
        })?
        .pool()
        .clone();
    Ok((&**context, pool))
}

type ActiveTransaction<'a> = Option<(&'a dyn TransactionManager, Uuid)>;

async fn create_connection(
    pool: &PoolHandle,
    transaction: ActiveTransaction<'_>,
    data_source_name: &str,
) -> Result<Connection, AppError> {
    match transaction {
        Some((manager, id)) if manager.is_in_transaction(id) => manager.get_connection(id, data_source_name).await,
        _ => pool.get_connection().await,
    }
}

async fn create_connections(
    pool: &PoolHandle,
    transaction: ActiveTransaction<'_>,
    data_source_name: &str,
    count: usize,
) -> Result<Vec<Connection>, AppError> {
    if count == 1 {
        return create_connection(pool, transaction, data_source_name).await.map(|c| vec![c]);
    }

    let mut acquired = Vec::with_capacity(count);
    for _ in 0..count {
        match create_connection(pool, transaction, data_source_name).await {
            Ok(connection) => acquired.push(connection),
            Err(e) => {
                let released = acquired.len();
                drop(acquired);
                warn!(
                    backend = %data_source_name,
                    requested = count,
                    released,
                    "Batch acquisition failed: {}", e
                );
                return Err(AppError::BatchAcquisition {
                    requested: count,
                    released,
                    source: Box::new(e),
                });
            }
        }
    }
    Ok(acquired)
}
