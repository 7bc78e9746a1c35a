//! Change events applied by the registry

use crate::auth::Authentication;
use crate::datasource::ParameterMap;
use crate::metadata::RuleSchemaMetaData;
use crate::properties::Props;
use crate::rule::RuleConfiguration;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Data sources and rules of one schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaConfiguration {
    #[serde(default)]
    pub data_sources: ParameterMap,
    #[serde(default)]
    pub rules: Vec<RuleConfiguration>,
}

/// Every change the registry reacts to, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextEvent {
    #[serde(rename_all = "camelCase")]
    Initialize {
        schemas: IndexMap<String, SchemaConfiguration>,
        #[serde(default)]
        authentication: Authentication,
        #[serde(default)]
        props: Props,
    },
    #[serde(rename_all = "camelCase")]
    SchemaAdded {
        schema_name: String,
        data_sources: ParameterMap,
        #[serde(default)]
        rules: Vec<RuleConfiguration>,
    },
    #[serde(rename_all = "camelCase")]
    SchemaDeleted { schema_name: String },
    PropertiesChanged { props: Props },
    AuthenticationChanged { authentication: Authentication },
    CircuitStateChanged { open: bool },
    #[serde(rename_all = "camelCase")]
    MetaDataChanged {
        schema_names: Vec<String>,
        metadata: RuleSchemaMetaData,
    },
    #[serde(rename_all = "camelCase")]
    RuleConfigurationsChanged {
        schema_name: String,
        rules: Vec<RuleConfiguration>,
    },
    #[serde(rename_all = "camelCase")]
    DisabledStateChanged {
        schema_name: String,
        data_source_name: String,
        disabled: bool,
    },
    #[serde(rename_all = "camelCase")]
    DataSourceChanged {
        schema_name: String,
        data_sources: ParameterMap,
    },
    HeartbeatDetect,
}

impl ContextEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ContextEvent::Initialize { .. } => "initialize",
            ContextEvent::SchemaAdded { .. } => "schema_added",
            ContextEvent::SchemaDeleted { .. } => "schema_deleted",
            ContextEvent::PropertiesChanged { .. } => "properties_changed",
            ContextEvent::AuthenticationChanged { .. } => "authentication_changed",
            ContextEvent::CircuitStateChanged { .. } => "circuit_state_changed",
            ContextEvent::MetaDataChanged { .. } => "meta_data_changed",
            ContextEvent::RuleConfigurationsChanged { .. } => "rule_configurations_changed",
            ContextEvent::DisabledStateChanged { .. } => "disabled_state_changed",
            ContextEvent::DataSourceChanged { .. } => "data_source_changed",
            ContextEvent::HeartbeatDetect => "heartbeat_detect",
        }
    }
}
