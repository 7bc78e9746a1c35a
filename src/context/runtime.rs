//! Per-schema runtime: executor, parser engine, cached backend metadata
//! and the transaction manager engine.

use crate::datasource::{DataSourceMap, DatabaseType};
use crate::error::AppError;
use crate::transaction::TransactionManagerEngine;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Bounded task runner for statement execution
#[derive(Debug, Clone)]
pub struct ExecutorKernel {
    size: usize,
    permits: Option<Arc<Semaphore>>,
}

impl ExecutorKernel {
    /// `size` concurrent tasks at most; 0 means unbounded
    pub fn new(size: usize) -> Self {
        let permits = (size > 0).then(|| Arc::new(Semaphore::new(size)));
        Self { size, permits }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run every task, returning results in input order.
    ///
    /// The first failing task's error is returned once all tasks finished.
    pub async fn execute<T, F>(&self, tasks: Vec<F>) -> Result<Vec<T>, AppError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let permits = self.permits.clone();
            set.spawn(async move {
                let _permit = match permits {
                    Some(permits) => Some(
                        permits
                            .acquire_owned()
                            .await
                            .map_err(|e| AppError::Internal(format!("Executor closed: {}", e)))?,
                    ),
                    None => None,
                };
                task.await.map(|value| (index, value))
            });
        }

        let mut results = Vec::with_capacity(set.len());
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(AppError::Internal(format!("Executor task failed: {}", e)));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, value)| value).collect())
    }
}

/// Handle to the external SQL parser for one dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlParserEngine {
    dialect: DatabaseType,
}

impl SqlParserEngine {
    pub fn new(dialect: DatabaseType) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> DatabaseType {
        self.dialect
    }
}

/// Backend facts cached from the schema's first data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedDatabaseMetaData {
    pub database_type: DatabaseType,
    pub url: String,
    pub user_name: String,
    pub read_only: bool,
    pub max_pool_size: usize,
}

impl CachedDatabaseMetaData {
    pub fn load(dialect: DatabaseType, data_sources: &DataSourceMap) -> Option<Self> {
        data_sources.values().next().map(|ds| {
            let params = ds.parameters();
            Self {
                database_type: dialect,
                url: params.display_url(),
                user_name: params.username.clone(),
                read_only: params.read_only,
                max_pool_size: params.max_pool_size,
            }
        })
    }
}

/// Everything a schema needs at query time besides its configuration
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    cached_metadata: Option<Arc<CachedDatabaseMetaData>>,
    executor: ExecutorKernel,
    sql_parser: Arc<SqlParserEngine>,
    transaction_engine: Arc<TransactionManagerEngine>,
}

impl RuntimeContext {
    pub fn new(
        cached_metadata: Option<Arc<CachedDatabaseMetaData>>,
        executor: ExecutorKernel,
        sql_parser: Arc<SqlParserEngine>,
        transaction_engine: Arc<TransactionManagerEngine>,
    ) -> Self {
        Self {
            cached_metadata,
            executor,
            sql_parser,
            transaction_engine,
        }
    }

    /// Same parser, cached metadata and transaction engine with a new executor
    pub fn with_executor(&self, executor: ExecutorKernel) -> Self {
        Self {
            executor,
            ..self.clone()
        }
    }

    pub fn cached_metadata(&self) -> Option<&CachedDatabaseMetaData> {
        self.cached_metadata.as_deref()
    }

    pub fn executor(&self) -> &ExecutorKernel {
        &self.executor
    }

    pub fn sql_parser(&self) -> &Arc<SqlParserEngine> {
        &self.sql_parser
    }

    pub fn transaction_engine(&self) -> &Arc<TransactionManagerEngine> {
        &self.transaction_engine
    }
}
