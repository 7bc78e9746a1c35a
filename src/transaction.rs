//! Transaction managers
//!
//! `LOCAL` transactions have no manager: each statement gets whatever the
//! pool hands out. Distributed types (`XA`, `BASE`) get a manager that
//! pins one connection per backend for the lifetime of a transaction.

use crate::datasource::{Connection, DataSourceMap, PoolHandle};
use crate::error::AppError;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transaction type requested by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Local,
    Xa,
    Base,
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(TransactionType::Local),
            "XA" => Ok(TransactionType::Xa),
            "BASE" => Ok(TransactionType::Base),
            other => Err(format!("unknown transaction type `{}`", other)),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::Local => "LOCAL",
            TransactionType::Xa => "XA",
            TransactionType::Base => "BASE",
        };
        f.write_str(name)
    }
}

/// Manager of one distributed transaction type within a schema.
///
/// Every `begin` opens a separate transaction identified by the returned
/// id; connections are only ever shared within one transaction.
#[async_trait]
pub trait TransactionManager: Send + Sync + fmt::Debug {
    fn transaction_type(&self) -> TransactionType;

    fn is_in_transaction(&self, transaction_id: Uuid) -> bool;

    /// Connection bound to transaction `transaction_id` for `data_source_name`
    async fn get_connection(&self, transaction_id: Uuid, data_source_name: &str) -> Result<Connection, AppError>;

    /// Open a new transaction and return its id
    fn begin(&self) -> Result<Uuid, AppError>;

    async fn commit(&self, transaction_id: Uuid) -> Result<(), AppError>;

    async fn rollback(&self, transaction_id: Uuid) -> Result<(), AppError>;

    fn close(&self) -> Result<(), AppError>;
}

type PinnedConnections = Arc<tokio::sync::Mutex<HashMap<String, Connection>>>;

/// Pins one connection per backend and transaction between `begin` and
/// `commit`/`rollback`
#[derive(Debug)]
pub struct ConnectionPinningManager {
    transaction_type: TransactionType,
    pools: IndexMap<String, PoolHandle>,
    transactions: RwLock<HashMap<Uuid, PinnedConnections>>,
    closed: AtomicBool,
}

impl ConnectionPinningManager {
    pub fn new(transaction_type: TransactionType, data_sources: &DataSourceMap) -> Self {
        Self {
            transaction_type,
            pools: data_sources
                .iter()
                .map(|(name, ds)| (name.clone(), ds.pool().clone()))
                .collect(),
            transactions: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of transactions currently open
    pub fn active_transactions(&self) -> usize {
        self.transactions.read().len()
    }

    fn not_active(&self, transaction_id: Uuid) -> AppError {
        AppError::Transaction(format!(
            "{} transaction {} is not active",
            self.transaction_type, transaction_id
        ))
    }

    async fn finish(&self, transaction_id: Uuid, outcome: &str) -> Result<(), AppError> {
        let pinned = self
            .transactions
            .write()
            .remove(&transaction_id)
            .ok_or_else(|| self.not_active(transaction_id))?;
        let released = {
            let mut pinned = pinned.lock().await;
            let count = pinned.len();
            pinned.clear();
            count
        };
        debug!(transaction = %transaction_id, released, "Transaction {}", outcome);
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for ConnectionPinningManager {
    fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    fn is_in_transaction(&self, transaction_id: Uuid) -> bool {
        self.transactions.read().contains_key(&transaction_id)
    }

    async fn get_connection(&self, transaction_id: Uuid, data_source_name: &str) -> Result<Connection, AppError> {
        let pinned = self
            .transactions
            .read()
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| self.not_active(transaction_id))?;

        let mut pinned = pinned.lock().await;
        if let Some(connection) = pinned.get(data_source_name) {
            return Ok(connection.clone());
        }

        let pool = self.pools.get(data_source_name).ok_or_else(|| {
            AppError::Transaction(format!("Data source `{}` is not part of this transaction", data_source_name))
        })?;
        let connection = pool.get_connection().await?;
        pinned.insert(data_source_name.to_string(), connection.clone());
        Ok(connection)
    }

    fn begin(&self) -> Result<Uuid, AppError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::Transaction(format!(
                "{} transaction manager is closed",
                self.transaction_type
            )));
        }
        let id = Uuid::new_v4();
        self.transactions.write().insert(id, PinnedConnections::default());
        debug!(transaction = %id, kind = %self.transaction_type, "Transaction begun");
        Ok(id)
    }

    async fn commit(&self, transaction_id: Uuid) -> Result<(), AppError> {
        self.finish(transaction_id, "commit").await
    }

    async fn rollback(&self, transaction_id: Uuid) -> Result<(), AppError> {
        self.finish(transaction_id, "rollback").await
    }

    fn close(&self) -> Result<(), AppError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let open: Vec<(Uuid, PinnedConnections)> = self.transactions.write().drain().collect();
        let mut busy = 0;
        for (id, pinned) in open {
            warn!(transaction = %id, "Closing manager with an active transaction");
            match pinned.try_lock() {
                Ok(mut pinned) => pinned.clear(),
                Err(_) => busy += 1,
            }
        }
        if busy > 0 {
            return Err(AppError::ResourceClose {
                resource: format!("{} transaction manager", self.transaction_type),
                reason: format!("pinned connections of {} transaction(s) are in use", busy),
            });
        }
        Ok(())
    }
}

/// Per-schema set of transaction managers, owned by one runtime context
#[derive(Debug)]
pub struct TransactionManagerEngine {
    managers: HashMap<TransactionType, Arc<dyn TransactionManager>>,
    closed: AtomicBool,
}

impl TransactionManagerEngine {
    /// Start managers for every distributed transaction type
    pub fn init(data_sources: &DataSourceMap) -> Self {
        let managers = [TransactionType::Xa, TransactionType::Base]
            .into_iter()
            .map(|kind| {
                let manager: Arc<dyn TransactionManager> =
                    Arc::new(ConnectionPinningManager::new(kind, data_sources));
                (kind, manager)
            })
            .collect();

        Self {
            managers,
            closed: AtomicBool::new(false),
        }
    }

    /// Manager for `transaction_type`; `LOCAL` never has one
    pub fn transaction_manager(&self, transaction_type: TransactionType) -> Option<Arc<dyn TransactionManager>> {
        self.managers.get(&transaction_type).cloned()
    }

    /// Close every manager. Idempotent; reports the first failure after trying all.
    pub fn close(&self) -> Result<(), AppError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for manager in self.managers.values() {
            if let Err(e) = manager.close() {
                first_error.get_or_insert(e);
            }
        }
        info!(managers = self.managers.len(), "Transaction manager engine closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Close, logging instead of failing
    pub fn close_quietly(&self) {
        if let Err(e) = self.close() {
            warn!("{}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::create_data_sources;
    use crate::testing::{params, MockPoolFactory};
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn data_sources(factory: &MockPoolFactory) -> DataSourceMap {
        let parameters = ["ds_0", "ds_1"]
            .into_iter()
            .map(|n| (n.to_string(), params(n)))
            .collect();
        create_data_sources(factory, &parameters).unwrap()
    }

    #[test]
    fn test_parse_transaction_type() {
        assert_eq!("xa".parse::<TransactionType>().unwrap(), TransactionType::Xa);
        assert_eq!(" LOCAL ".parse::<TransactionType>().unwrap(), TransactionType::Local);
        assert!("2pc".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_local_has_no_manager() {
        let factory = MockPoolFactory::new();
        let engine = TransactionManagerEngine::init(&data_sources(&factory));
        assert!(engine.transaction_manager(TransactionType::Local).is_none());
        assert!(engine.transaction_manager(TransactionType::Xa).is_some());
        assert!(engine.transaction_manager(TransactionType::Base).is_some());
    }

    #[tokio::test]
    async fn test_pinned_connection_per_backend() {
        let factory = MockPoolFactory::new();
        let manager = ConnectionPinningManager::new(TransactionType::Xa, &data_sources(&factory));

        assert!(manager.get_connection(Uuid::new_v4(), "ds_0").await.is_err());

        let tx = assert_ok!(manager.begin());
        assert!(manager.is_in_transaction(tx));
        let first = manager.get_connection(tx, "ds_0").await.unwrap();
        let second = manager.get_connection(tx, "ds_0").await.unwrap();
        let other = manager.get_connection(tx, "ds_1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(factory.pool("ds_0").live_connections(), 1);

        drop((first, second, other));
        assert_ok!(manager.commit(tx).await);
        assert!(!manager.is_in_transaction(tx));
        assert_eq!(factory.pool("ds_0").live_connections(), 0);
    }

    #[tokio::test]
    async fn test_finish_twice_fails() {
        let factory = MockPoolFactory::new();
        let manager = ConnectionPinningManager::new(TransactionType::Base, &data_sources(&factory));

        let tx = assert_ok!(manager.begin());
        assert_ok!(manager.rollback(tx).await);
        assert!(manager.rollback(tx).await.is_err());
        assert!(manager.commit(tx).await.is_err());
    }

    #[tokio::test]
    async fn test_transactions_are_isolated() {
        let factory = MockPoolFactory::new();
        let manager = ConnectionPinningManager::new(TransactionType::Xa, &data_sources(&factory));

        let a = assert_ok!(manager.begin());
        let b = assert_ok!(manager.begin());
        assert_ne!(a, b);
        assert_eq!(manager.active_transactions(), 2);

        let conn_a = manager.get_connection(a, "ds_0").await.unwrap();
        let conn_b = manager.get_connection(b, "ds_0").await.unwrap();
        assert!(!Arc::ptr_eq(&conn_a, &conn_b));
        assert_eq!(factory.pool("ds_0").live_connections(), 2);

        drop(conn_a);
        assert_ok!(manager.commit(a).await);
        assert!(!manager.is_in_transaction(a));
        assert!(manager.is_in_transaction(b));
        assert!(Arc::ptr_eq(&conn_b, &manager.get_connection(b, "ds_0").await.unwrap()));
        assert_eq!(factory.pool("ds_0").live_connections(), 1);
    }

    #[tokio::test]
    async fn test_engine_close_is_idempotent() {
        let factory = MockPoolFactory::new();
        let engine = TransactionManagerEngine::init(&data_sources(&factory));
        let manager = engine.transaction_manager(TransactionType::Xa).unwrap();
        let tx = assert_ok!(manager.begin());
        let _conn = manager.get_connection(tx, "ds_1").await.unwrap();

        assert_ok!(engine.close());
        assert!(engine.is_closed());
        assert!(!manager.is_in_transaction(tx));
        assert!(manager.begin().is_err());
        assert_ok!(engine.close());
    }
}
