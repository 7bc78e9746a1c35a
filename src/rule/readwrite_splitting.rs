//! Read/write splitting rule with replica availability tracking

use super::{DataSourceDisabledEvent, ProxyRule, StatusContainedRule};
use crate::error::AppError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Read/write splitting rule configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadWriteSplittingRuleConfiguration {
    pub name: String,
    pub primary: String,
    #[serde(default)]
    pub replicas: Vec<String>,
}

/// Instantiated read/write splitting rule.
///
/// The disabled set is the only state in a published snapshot that is
/// mutated in place.
#[derive(Debug)]
pub struct ReadWriteSplittingRule {
    name: String,
    primary: String,
    replicas: Vec<String>,
    disabled: RwLock<HashSet<String>>,
}

impl ReadWriteSplittingRule {
    pub fn new(
        config: &ReadWriteSplittingRuleConfiguration,
        data_source_names: &HashSet<&str>,
    ) -> Result<Self, AppError> {
        if config.name.trim().is_empty() {
            return Err(AppError::InvalidRule("Read/write splitting rule name is required".to_string()));
        }
        if let Some(missing) = std::iter::once(&config.primary)
            .chain(config.replicas.iter())
            .find(|name| !data_source_names.contains(name.as_str()))
        {
            return Err(AppError::InvalidRule(format!(
                "Read/write splitting rule `{}` refers to unknown data source `{}`",
                config.name, missing
            )));
        }
        if config.replicas.iter().any(|r| r == &config.primary) {
            return Err(AppError::InvalidRule(format!(
                "Primary `{}` cannot also be a replica",
                config.primary
            )));
        }

        Ok(Self {
            name: config.name.clone(),
            primary: config.primary.clone(),
            replicas: config.replicas.clone(),
            disabled: RwLock::new(HashSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    /// Replicas not currently disabled, in configuration order
    pub fn available_replicas(&self) -> Vec<String> {
        let disabled = self.disabled.read();
        self.replicas
            .iter()
            .filter(|r| !disabled.contains(*r))
            .cloned()
            .collect()
    }
}

impl ProxyRule for ReadWriteSplittingRule {
    fn kind(&self) -> &'static str {
        "readwrite_splitting"
    }

    fn as_status_contained(&self) -> Option<&dyn StatusContainedRule> {
        Some(self)
    }
}

impl StatusContainedRule for ReadWriteSplittingRule {
    fn update_rule_status(&self, event: &DataSourceDisabledEvent) {
        if !self.replicas.contains(&event.data_source_name) {
            debug!(
                rule = %self.name,
                backend = %event.data_source_name,
                "Ignoring status change of a non-replica data source"
            );
            return;
        }

        let mut disabled = self.disabled.write();
        let changed = if event.disabled {
            disabled.insert(event.data_source_name.clone())
        } else {
            disabled.remove(&event.data_source_name)
        };
        if changed {
            info!(
                rule = %self.name,
                backend = %event.data_source_name,
                disabled = event.disabled,
                "Replica status updated"
            );
        }
    }

    fn is_disabled(&self, data_source_name: &str) -> bool {
        self.disabled.read().contains(data_source_name)
    }
}
