//! Proxy Context - live runtime-context registry of a sharding database proxy
//!
//! Holds one immutable snapshot of every logical schema the proxy serves
//! and reconciles configuration change events into new snapshots:
//! - Registry: copy-on-write publication of schema contexts per change event
//! - Data sources: pools are rebuilt only for backends whose parameters changed
//! - Connection acquirer: batch acquisition with pooling mode and transaction affinity
//!
//! A small admin API exposes the published snapshot and accepts change events.

pub mod auth;
pub mod config;
pub mod context;
pub mod datasource;
pub mod error;
pub mod heartbeat;
pub mod metadata;
pub mod models;
pub mod properties;
pub mod registry;
pub mod routes;
pub mod rule;
pub mod state;
pub mod transaction;

#[cfg(test)]
mod testing;
