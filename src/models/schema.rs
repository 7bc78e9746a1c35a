//! Schema-related DTOs

use crate::context::{SchemaContext, SchemaContexts};
use crate::datasource::{DataSource, DatabaseType, PoolStatus};
use crate::heartbeat::HeartbeatResult;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Response listing the published schemas
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaListResponse {
    pub schemas: Vec<String>,
    pub generation: u64,
    pub published_at: DateTime<Utc>,
    pub circuit_break: bool,
}

impl SchemaListResponse {
    pub fn new(snapshot: &SchemaContexts, circuit_break: bool) -> Self {
        let mut schemas: Vec<String> = snapshot.schemas().keys().cloned().collect();
        schemas.sort();
        Self {
            schemas,
            generation: snapshot.generation(),
            published_at: snapshot.published_at(),
            circuit_break,
        }
    }
}

/// One backend of a schema, password never included
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceView {
    pub name: String,
    pub url: String,
    pub username: String,
    pub max_pool_size: usize,
    pub min_pool_size: usize,
    pub read_only: bool,
    pub status: PoolStatus,
    pub closed: bool,
}

impl DataSourceView {
    fn new(name: &str, data_source: &DataSource) -> Self {
        let parameters = data_source.parameters();
        Self {
            name: name.to_string(),
            url: parameters.display_url(),
            username: parameters.username.clone(),
            max_pool_size: parameters.max_pool_size,
            min_pool_size: parameters.min_pool_size,
            read_only: parameters.read_only,
            status: data_source.pool().status(),
            closed: data_source.pool().is_closed(),
        }
    }
}

/// Detailed view of one schema
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDetail {
    pub name: String,
    pub dialect: DatabaseType,
    pub data_sources: Vec<DataSourceView>,
    pub rules: Vec<String>,
    pub tables: Vec<String>,
    pub executor_size: usize,
}

impl From<&SchemaContext> for SchemaDetail {
    fn from(ctx: &SchemaContext) -> Self {
        Self {
            name: ctx.name().to_string(),
            dialect: ctx.dialect(),
            data_sources: ctx
                .data_sources()
                .iter()
                .map(|(name, ds)| DataSourceView::new(name, ds))
                .collect(),
            rules: ctx.rules().iter().map(|r| r.kind().to_string()).collect(),
            tables: ctx.metadata().schema.table_names(),
            executor_size: ctx.runtime().executor().size(),
        }
    }
}

/// Response to an applied event
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub event: String,
    pub generation: u64,
}

/// Latest pool-status heartbeat results
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub results: Vec<HeartbeatResult>,
}
