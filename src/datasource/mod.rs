//! Backend data sources
//!
//! A data source couples the parameters a backend was configured with and
//! the pool built from them, so a schema's parameter map and pool map can
//! never disagree on their key sets.

pub mod dialect;
pub mod parameter;
pub mod pool;
pub mod postgres;
pub mod reconcile;

pub use dialect::DatabaseType;
pub use parameter::{ConnectionParameters, Endpoint};
pub use pool::{BackendConnection, BackendPool, Connection, PoolFactory, PoolHandle, PoolStatus};
pub use postgres::PostgresPoolFactory;
pub use reconcile::{DataSourceChanges, DataSourceReconciler, Reconciliation};

use crate::error::AppError;
use indexmap::IndexMap;
use tracing::warn;

/// Backend name -> connection parameters, in configuration order
pub type ParameterMap = IndexMap<String, ConnectionParameters>;

/// Backend name -> data source, in configuration order
pub type DataSourceMap = IndexMap<String, DataSource>;

/// One backend: its parameters and the pool built from them
#[derive(Debug, Clone)]
pub struct DataSource {
    parameters: ConnectionParameters,
    pool: PoolHandle,
}

impl DataSource {
    pub fn new(parameters: ConnectionParameters, pool: PoolHandle) -> Self {
        Self { parameters, pool }
    }

    pub fn parameters(&self) -> &ConnectionParameters {
        &self.parameters
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    /// Close the pool, logging instead of failing
    pub fn close_quietly(&self) {
        if let Err(e) = self.pool.close() {
            let err = AppError::ResourceClose {
                resource: format!("data source `{}`", self.pool.name()),
                reason: e.to_string(),
            };
            warn!(backend = self.pool.name(), "{}", err);
        }
    }
}

/// Validate parameters and build one data source through the factory
pub fn build_data_source(
    factory: &dyn PoolFactory,
    name: &str,
    parameters: &ConnectionParameters,
) -> Result<DataSource, AppError> {
    parameters
        .check()
        .and_then(|_| factory.build(name, parameters))
        .map(|pool| DataSource::new(parameters.clone(), pool))
        .map_err(|e| AppError::configuration_build(name, e))
}

/// Build every data source of a parameter map.
///
/// On the first failure the data sources already built are closed before
/// the error is returned.
pub fn create_data_sources(
    factory: &dyn PoolFactory,
    parameters: &ParameterMap,
) -> Result<DataSourceMap, AppError> {
    let mut result = DataSourceMap::with_capacity(parameters.len());
    for (name, params) in parameters {
        match build_data_source(factory, name, params) {
            Ok(data_source) => {
                result.insert(name.clone(), data_source);
            }
            Err(e) => {
                close_all(result.values());
                return Err(e);
            }
        }
    }
    Ok(result)
}

/// Close every data source, best effort
pub fn close_all<'a>(data_sources: impl IntoIterator<Item = &'a DataSource>) {
    for data_source in data_sources {
        data_source.close_quietly();
    }
}

/// Parameter view of a data source map
pub fn parameters_of(data_sources: &DataSourceMap) -> ParameterMap {
    data_sources
        .iter()
        .map(|(name, ds)| (name.clone(), ds.parameters.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{params, MockPoolFactory};

    #[test]
    fn test_create_data_sources_in_order() {
        let factory = MockPoolFactory::new();
        let parameters: ParameterMap = [("ds_1", params("ds_1")), ("ds_0", params("ds_0"))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let created = create_data_sources(&factory, &parameters).unwrap();
        let names: Vec<_> = created.keys().cloned().collect();
        assert_eq!(names, vec!["ds_1", "ds_0"]);
        assert_eq!(parameters_of(&created), parameters);
    }

    #[test]
    fn test_create_data_sources_closes_built_on_failure() {
        let factory = MockPoolFactory::new();
        factory.fail_build("ds_2");
        let parameters: ParameterMap = ["ds_0", "ds_1", "ds_2"]
            .into_iter()
            .map(|k| (k.to_string(), params(k)))
            .collect();

        let err = create_data_sources(&factory, &parameters).unwrap_err();
        match err {
            AppError::ConfigurationBuild { backend, .. } => assert_eq!(backend, "ds_2"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(factory.pool("ds_0").is_closed());
        assert!(factory.pool("ds_1").is_closed());
    }

    #[test]
    fn test_invalid_parameters_name_backend() {
        let factory = MockPoolFactory::new();
        let mut bad = params("ds_0");
        bad.max_pool_size = 0;

        let err = build_data_source(&factory, "ds_0", &bad).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationBuild { ref backend, .. } if backend == "ds_0"));
        assert_eq!(factory.built_count(), 0);
    }

    #[test]
    fn test_close_failure_is_swallowed() {
        let factory = MockPoolFactory::new();
        factory.fail_close("ds_0");
        let data_source = build_data_source(&factory, "ds_0", &params("ds_0")).unwrap();

        data_source.close_quietly();
        assert_eq!(factory.pool("ds_0").close_attempts(), 1);
    }
}
