//! Backend pool seam
//!
//! The registry never talks to a driver directly: it asks a [`PoolFactory`]
//! for a [`BackendPool`] per backend and hands out [`Connection`]s from it.

use super::parameter::ConnectionParameters;
use crate::error::AppError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A live connection to one backend.
///
/// Dropping the last reference returns the connection to its pool.
pub trait BackendConnection: Send + Sync + fmt::Debug {
    /// Name of the backend this connection belongs to
    fn data_source_name(&self) -> &str;

    /// Underlying Postgres client, when the backend is driven by tokio-postgres
    fn client(&self) -> Option<&tokio_postgres::Client> {
        None
    }
}

/// Shared handle to a backend connection
pub type Connection = Arc<dyn BackendConnection>;

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
}

/// A pool of connections to one backend
#[async_trait]
pub trait BackendPool: Send + Sync + fmt::Debug {
    /// Backend name this pool was built for
    fn name(&self) -> &str;

    /// Obtain a fresh connection from the pool
    async fn get_connection(&self) -> Result<Connection, AppError>;

    /// Close the pool; outstanding connections are discarded on return
    fn close(&self) -> Result<(), AppError>;

    fn is_closed(&self) -> bool;

    fn status(&self) -> PoolStatus;
}

/// Shared handle to a backend pool
pub type PoolHandle = Arc<dyn BackendPool>;

/// Creates backend pools from connection parameters
pub trait PoolFactory: Send + Sync {
    fn build(&self, name: &str, parameters: &ConnectionParameters) -> Result<PoolHandle, AppError>;
}
