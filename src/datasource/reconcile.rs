//! Data source reconciliation
//!
//! Diffs the parameter map a schema is currently running with against a
//! new one and builds only the pools that actually changed.

use super::{build_data_source, close_all, DataSource, DataSourceMap, ParameterMap, PoolFactory};
use crate::error::AppError;
use tracing::{debug, info};

/// Backend names grouped by how they changed between two parameter maps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSourceChanges {
    /// In the new map only
    pub added: Vec<String>,
    /// In the old map only
    pub deleted: Vec<String>,
    /// In both maps with different parameters
    pub modified: Vec<String>,
}

impl DataSourceChanges {
    /// Compare two parameter maps by value
    pub fn compute(old: &ParameterMap, new: &ParameterMap) -> Self {
        let deleted = old
            .keys()
            .filter(|name| !new.contains_key(*name))
            .cloned()
            .collect();

        let added = new
            .keys()
            .filter(|name| !old.contains_key(*name))
            .cloned()
            .collect();

        let modified = new
            .iter()
            .filter(|(name, params)| old.get(*name).is_some_and(|current| current != *params))
            .map(|(name, _)| name.clone())
            .collect();

        Self {
            added,
            deleted,
            modified,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    /// Whether the old pool of `name` must be closed
    pub fn supersedes(&self, name: &str) -> bool {
        self.deleted.iter().any(|n| n == name) || self.modified.iter().any(|n| n == name)
    }
}

/// Outcome of a successful reconciliation, not yet committed
#[derive(Debug)]
#[must_use = "a reconciliation must be committed or aborted"]
pub struct Reconciliation {
    changes: DataSourceChanges,
    data_sources: DataSourceMap,
    built: Vec<DataSource>,
    superseded: Vec<DataSource>,
}

impl Reconciliation {
    pub fn changes(&self) -> &DataSourceChanges {
        &self.changes
    }

    /// Final data source map: retained old pools, then rebuilt, then added
    pub fn data_sources(&self) -> &DataSourceMap {
        &self.data_sources
    }

    /// Close the old pools of deleted and modified backends
    pub fn commit(self) {
        close_all(&self.superseded);
    }

    /// Close the pools built by this reconciliation, leaving the old ones open
    pub fn abort(self) {
        close_all(&self.built);
    }
}

/// Drives pool creation for a parameter change of one schema
pub struct DataSourceReconciler<'a> {
    factory: &'a dyn PoolFactory,
}

impl<'a> DataSourceReconciler<'a> {
    pub fn new(factory: &'a dyn PoolFactory) -> Self {
        Self { factory }
    }

    /// Build pools for added and modified backends and assemble the new map.
    ///
    /// Nothing is closed here. If any pool fails to build, the pools already
    /// built by this call are closed and the error names the failing backend.
    pub fn reconcile(
        &self,
        current: &DataSourceMap,
        new_parameters: &ParameterMap,
    ) -> Result<Reconciliation, AppError> {
        let old_parameters = super::parameters_of(current);
        let changes = DataSourceChanges::compute(&old_parameters, new_parameters);

        debug!(
            added = ?changes.added,
            deleted = ?changes.deleted,
            modified = ?changes.modified,
            "Computed data source changes"
        );

        let mut data_sources: DataSourceMap = current
            .iter()
            .filter(|(name, _)| !changes.supersedes(name))
            .map(|(name, ds)| (name.clone(), ds.clone()))
            .collect();

        let mut built = Vec::with_capacity(changes.modified.len() + changes.added.len());
        for name in changes.modified.iter().chain(changes.added.iter()) {
            let params = &new_parameters[name.as_str()];
            match build_data_source(self.factory, name, params) {
                Ok(data_source) => {
                    data_sources.insert(name.clone(), data_source.clone());
                    built.push(data_source);
                }
                Err(e) => {
                    close_all(&built);
                    return Err(e);
                }
            }
        }

        let superseded = current
            .iter()
            .filter(|(name, _)| changes.supersedes(name))
            .map(|(_, ds)| ds.clone())
            .collect();

        if !changes.is_empty() {
            info!(
                added = changes.added.len(),
                deleted = changes.deleted.len(),
                modified = changes.modified.len(),
                "Reconciled data sources"
            );
        }

        Ok(Reconciliation {
            changes,
            data_sources,
            built,
            superseded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{create_data_sources, ConnectionParameters};
    use crate::testing::{params, MockPoolFactory};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn map(entries: &[(&str, ConnectionParameters)]) -> ParameterMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn resized(name: &str, size: usize) -> ConnectionParameters {
        let mut p = params(name);
        p.max_pool_size = size;
        p
    }

    #[test]
    fn test_compute_changes() {
        let old = map(&[("a", params("a")), ("b", params("b")), ("c", params("c"))]);
        let new = map(&[("b", resized("b", 20)), ("c", params("c")), ("d", params("d"))]);

        let changes = DataSourceChanges::compute(&old, &new);
        assert_eq!(changes.deleted, vec!["a".to_string()]);
        assert_eq!(changes.added, vec!["d".to_string()]);
        assert_eq!(changes.modified, vec!["b".to_string()]);
    }

    #[test]
    fn test_self_reconcile_is_empty() {
        let old = map(&[("a", params("a")), ("b", params("b"))]);
        let changes = DataSourceChanges::compute(&old, &old.clone());
        assert!(changes.is_empty());
    }

    #[test]
    fn test_change_sets_partition_keys() {
        let cases = vec![
            (map(&[]), map(&[("a", params("a"))])),
            (map(&[("a", params("a"))]), map(&[])),
            (
                map(&[("a", params("a")), ("b", params("b")), ("x", params("x"))]),
                map(&[("b", resized("b", 3)), ("c", params("c")), ("x", params("x"))]),
            ),
            (
                map(&[("a", params("a")), ("b", params("b"))]),
                map(&[("a", resized("a", 9)), ("b", resized("b", 9))]),
            ),
        ];

        for (old, new) in cases {
            let changes = DataSourceChanges::compute(&old, &new);
            let added: HashSet<_> = changes.added.iter().cloned().collect();
            let deleted: HashSet<_> = changes.deleted.iter().cloned().collect();
            let modified: HashSet<_> = changes.modified.iter().cloned().collect();
            let unchanged: HashSet<_> = old
                .keys()
                .filter(|k| new.contains_key(*k) && !modified.contains(*k))
                .cloned()
                .collect();
            let old_keys: HashSet<_> = old.keys().cloned().collect();
            let new_keys: HashSet<_> = new.keys().cloned().collect();

            assert!(deleted.is_disjoint(&added));
            let old_cover: HashSet<_> = deleted.union(&modified).cloned().collect();
            assert_eq!(old_cover.union(&unchanged).cloned().collect::<HashSet<_>>(), old_keys);
            let new_cover: HashSet<_> = added.union(&modified).cloned().collect();
            assert_eq!(new_cover.union(&unchanged).cloned().collect::<HashSet<_>>(), new_keys);
        }
    }

    #[test]
    fn test_reconcile_builds_only_changed_pools() {
        let factory = MockPoolFactory::new();
        let current = create_data_sources(
            &factory,
            &map(&[("a", params("a")), ("b", params("b")), ("c", params("c"))]),
        )
        .unwrap();
        let new = map(&[("b", resized("b", 20)), ("c", params("c")), ("d", params("d"))]);

        let reconciliation = DataSourceReconciler::new(&factory).reconcile(&current, &new).unwrap();

        let names: Vec<_> = reconciliation.data_sources().keys().cloned().collect();
        assert_eq!(names, vec!["c", "b", "d"]);
        assert!(Arc::ptr_eq(
            reconciliation.data_sources()["c"].pool(),
            current["c"].pool()
        ));
        assert!(!Arc::ptr_eq(
            reconciliation.data_sources()["b"].pool(),
            current["b"].pool()
        ));
        assert_eq!(reconciliation.data_sources()["b"].parameters().max_pool_size, 20);

        // Nothing closed until commit
        assert!(!current["a"].pool().is_closed());
        assert!(!current["b"].pool().is_closed());

        reconciliation.commit();
        assert!(current["a"].pool().is_closed());
        assert!(current["b"].pool().is_closed());
        assert!(!current["c"].pool().is_closed());
    }

    #[test]
    fn test_reconcile_failure_closes_new_pools_only() {
        let factory = MockPoolFactory::new();
        let current = create_data_sources(&factory, &map(&[("a", params("a"))])).unwrap();
        factory.fail_build("e");
        let new = map(&[("a", resized("a", 7)), ("d", params("d")), ("e", params("e"))]);

        let err = DataSourceReconciler::new(&factory).reconcile(&current, &new).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationBuild { ref backend, .. } if backend == "e"));

        assert!(!current["a"].pool().is_closed());
        let rebuilt_a = factory.pools_named("a");
        assert_eq!(rebuilt_a.len(), 2);
        assert!(rebuilt_a[1].is_closed());
        assert!(factory.pool("d").is_closed());
    }

    #[test]
    fn test_abort_keeps_old_pools() {
        let factory = MockPoolFactory::new();
        let current = create_data_sources(&factory, &map(&[("a", params("a"))])).unwrap();
        let new = map(&[("a", resized("a", 2))]);

        let reconciliation = DataSourceReconciler::new(&factory).reconcile(&current, &new).unwrap();
        let rebuilt = reconciliation.data_sources()["a"].pool().clone();
        reconciliation.abort();

        assert!(rebuilt.is_closed());
        assert!(!current["a"].pool().is_closed());
    }
}
