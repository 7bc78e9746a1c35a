//! Rule configurations and instantiated rules
//!
//! How rules route SQL is decided elsewhere; this module only turns
//! configurations into rule objects bound to a schema's backends and lets
//! status-aware rules observe backend availability.

pub mod readwrite_splitting;
pub mod sharding;

pub use readwrite_splitting::{ReadWriteSplittingRule, ReadWriteSplittingRuleConfiguration};
pub use sharding::{DataNode, ShardingRule, ShardingRuleConfiguration, ShardingTableRuleConfiguration, TableRule};

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A rule configuration, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConfiguration {
    Sharding(ShardingRuleConfiguration),
    ReadwriteSplitting(ReadWriteSplittingRuleConfiguration),
}

/// A backend was disabled or re-enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceDisabledEvent {
    pub data_source_name: String,
    pub disabled: bool,
}

/// An instantiated rule of one schema
pub trait ProxyRule: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;

    /// Present when the rule tracks backend availability
    fn as_status_contained(&self) -> Option<&dyn StatusContainedRule> {
        None
    }

    /// Present when the rule maps logic tables onto backends
    fn as_table_contained(&self) -> Option<&dyn TableContainedRule> {
        None
    }
}

/// Rule that keeps its own view of backend availability
pub trait StatusContainedRule: Send + Sync {
    fn update_rule_status(&self, event: &DataSourceDisabledEvent);

    fn is_disabled(&self, data_source_name: &str) -> bool;
}

/// Rule that owns logic tables
pub trait TableContainedRule: Send + Sync {
    fn table_rules(&self) -> &[TableRule];
}

pub type RuleHandle = Arc<dyn ProxyRule>;

/// Instantiates rule configurations against a schema's backend names
pub struct RulesBuilder;

impl RulesBuilder {
    pub fn build<'a>(
        configurations: &[RuleConfiguration],
        data_source_names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<RuleHandle>, AppError> {
        let names: HashSet<&str> = data_source_names.into_iter().collect();

        configurations
            .iter()
            .map(|config| -> Result<RuleHandle, AppError> {
                Ok(match config {
                    RuleConfiguration::Sharding(c) => Arc::new(ShardingRule::new(c, &names)?),
                    RuleConfiguration::ReadwriteSplitting(c) => Arc::new(ReadWriteSplittingRule::new(c, &names)?),
                })
            })
            .collect()
    }
}
