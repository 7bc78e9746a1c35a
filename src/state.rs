//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::config::Settings;
use crate::heartbeat::PoolStatusHeartbeat;
use crate::registry::ContextRegistry;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// The live schema registry
    pub registry: Arc<ContextRegistry>,

    /// Heartbeat handler the registry reports to
    pub heartbeat: Arc<PoolStatusHeartbeat>,

    pub settings: Settings,
}

impl AppState {
    pub fn new(registry: Arc<ContextRegistry>, heartbeat: Arc<PoolStatusHeartbeat>, settings: Settings) -> Self {
        Self {
            registry,
            heartbeat,
            settings,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
