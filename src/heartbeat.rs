//! Heartbeat over the published schemas

use crate::context::SchemaContext;
use crate::datasource::PoolStatus;
use crate::registry::{ContextEvent, ContextRegistry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receives the schema map on every heartbeat
pub trait HeartbeatHandler: Send + Sync {
    fn handle(&self, schemas: &HashMap<String, Arc<SchemaContext>>);
}

/// Status of one backend pool at heartbeat time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResult {
    pub schema: String,
    pub data_source: String,
    pub status: PoolStatus,
    pub closed: bool,
    pub detected_at: DateTime<Utc>,
}

/// Records pool occupancy of every backend
#[derive(Debug, Default)]
pub struct PoolStatusHeartbeat {
    last: Mutex<Vec<HeartbeatResult>>,
}

impl PoolStatusHeartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results of the latest heartbeat, sorted by schema then backend
    pub fn last_results(&self) -> Vec<HeartbeatResult> {
        self.last.lock().clone()
    }
}

impl HeartbeatHandler for PoolStatusHeartbeat {
    fn handle(&self, schemas: &HashMap<String, Arc<SchemaContext>>) {
        let detected_at = Utc::now();
        let mut results: Vec<HeartbeatResult> = schemas
            .values()
            .flat_map(|ctx| {
                ctx.data_sources().iter().map(move |(name, ds)| HeartbeatResult {
                    schema: ctx.name().to_string(),
                    data_source: name.clone(),
                    status: ds.pool().status(),
                    closed: ds.pool().is_closed(),
                    detected_at,
                })
            })
            .collect();
        results.sort_by(|a, b| (&a.schema, &a.data_source).cmp(&(&b.schema, &b.data_source)));

        for result in results.iter().filter(|r| r.closed) {
            warn!(schema = %result.schema, backend = %result.data_source, "Published data source is closed");
        }
        debug!(data_sources = results.len(), "Heartbeat detected");

        *self.last.lock() = results;
    }
}

/// Deliver a heartbeat event to the registry every `period`
pub fn spawn(registry: Arc<ContextRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = registry.handle(ContextEvent::HeartbeatDetect).await {
                warn!("Heartbeat failed: {}", e);
            }
        }
    })
}
