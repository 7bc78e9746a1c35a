//! Sharding rule: logic tables mapped onto actual data nodes

use super::{ProxyRule, TableContainedRule};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Sharding rule configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingRuleConfiguration {
    #[serde(default)]
    pub tables: Vec<ShardingTableRuleConfiguration>,
    /// Backend for tables no table rule covers
    #[serde(default)]
    pub default_data_source: Option<String>,
}

/// One logic table and its actual data nodes (`ds_0.t_order_0`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingTableRuleConfiguration {
    pub logic_table: String,
    pub actual_data_nodes: Vec<String>,
}

/// An actual table on one backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl FromStr for DataNode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() && !table.contains('.') => Ok(Self {
                data_source: ds.to_string(),
                table: table.to_string(),
            }),
            _ => Err(AppError::InvalidRule(format!(
                "Invalid data node `{}`, expected `data_source.table`",
                s
            ))),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

/// Instantiated table rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRule {
    pub logic_table: String,
    pub data_nodes: Vec<DataNode>,
}

/// Instantiated sharding rule
#[derive(Debug)]
pub struct ShardingRule {
    tables: Vec<TableRule>,
    default_data_source: Option<String>,
}

impl ShardingRule {
    /// Instantiate a sharding rule, checking every node against `data_source_names`
    pub fn new(config: &ShardingRuleConfiguration, data_source_names: &HashSet<&str>) -> Result<Self, AppError> {
        let mut seen = HashSet::new();
        let mut tables = Vec::with_capacity(config.tables.len());

        for table in &config.tables {
            let logic_table = table.logic_table.trim().to_lowercase();
            if logic_table.is_empty() {
                return Err(AppError::InvalidRule("Logic table name is required".to_string()));
            }
            if !seen.insert(logic_table.clone()) {
                return Err(AppError::InvalidRule(format!("Duplicate logic table `{}`", logic_table)));
            }
            if table.actual_data_nodes.is_empty() {
                return Err(AppError::InvalidRule(format!(
                    "Logic table `{}` has no actual data nodes",
                    logic_table
                )));
            }

            let data_nodes = table
                .actual_data_nodes
                .iter()
                .map(|node| node.parse::<DataNode>())
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(node) = data_nodes
                .iter()
                .find(|node| !data_source_names.contains(node.data_source.as_str()))
            {
                return Err(AppError::InvalidRule(format!(
                    "Data node `{}` of `{}` refers to an unknown data source",
                    node, logic_table
                )));
            }

            tables.push(TableRule {
                logic_table,
                data_nodes,
            });
        }

        if let Some(default) = &config.default_data_source {
            if !data_source_names.contains(default.as_str()) {
                return Err(AppError::InvalidRule(format!(
                    "Default data source `{}` does not exist",
                    default
                )));
            }
        }

        Ok(Self {
            tables,
            default_data_source: config.default_data_source.clone(),
        })
    }

    /// Table rule of a logic table, case-insensitive
    pub fn find_table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        let logic_table = logic_table.to_lowercase();
        self.tables.iter().find(|t| t.logic_table == logic_table)
    }

    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }

    /// Backends referenced by any table rule or as default
    pub fn data_source_names(&self) -> BTreeSet<&str> {
        self.tables
            .iter()
            .flat_map(|t| t.data_nodes.iter().map(|n| n.data_source.as_str()))
            .chain(self.default_data_source.as_deref())
            .collect()
    }
}

impl ProxyRule for ShardingRule {
    fn kind(&self) -> &'static str {
        "sharding"
    }

    fn as_table_contained(&self) -> Option<&dyn TableContainedRule> {
        Some(self)
    }
}

impl TableContainedRule for ShardingRule {
    fn table_rules(&self) -> &[TableRule] {
        &self.tables
    }
}
