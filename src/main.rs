//! Proxy Context server
//!
//! Boots the schema registry from an optional bootstrap file, runs the
//! pool-status heartbeat and serves the admin API.

use proxy_context::config::{BootstrapConfig, Settings};
use proxy_context::datasource::PostgresPoolFactory;
use proxy_context::heartbeat::{self, PoolStatusHeartbeat};
use proxy_context::metadata::PostgresMetaDataLoader;
use proxy_context::registry::ContextRegistry;
use proxy_context::routes::create_router;
use proxy_context::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Proxy Context registry...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let pool_heartbeat = Arc::new(PoolStatusHeartbeat::new());
    let registry = Arc::new(ContextRegistry::new(
        Arc::new(PostgresPoolFactory::new()),
        Arc::new(PostgresMetaDataLoader::new()),
        pool_heartbeat.clone(),
    ));

    match &settings.proxy.bootstrap_file {
        Some(path) => {
            let bootstrap = BootstrapConfig::from_file(path)?;
            let generation = registry.handle(bootstrap.into_event()).await?;
            info!(
                "✅ Registry initialized from {:?}: {} schema(s), generation {}",
                path,
                registry.schema_names().len(),
                generation
            );
        }
        None => {
            warn!("⚠️  PROXY_BOOTSTRAP_FILE not set, starting with an empty registry");
        }
    }

    let heartbeat_task = settings
        .proxy
        .heartbeat_interval
        .map(|period| {
            info!("💓 Heartbeat every {:?}", period);
            heartbeat::spawn(registry.clone(), period)
        });

    let state = Arc::new(AppState::new(registry.clone(), pool_heartbeat, settings.clone()));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Admin API listening on http://{}", addr);
    if !settings.server.host.is_loopback() {
        warn!("⚠️  Admin API is unauthenticated and bound to {}, keep it behind a firewall", addr);
    }
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /health                   - Liveness check");
    info!("   GET  /api/schemas              - List published schemas");
    info!("   GET  /api/schemas/{{name}}       - Describe one schema");
    info!("   GET  /api/heartbeat            - Latest pool status");
    info!("   POST /api/events               - Apply a change event");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = heartbeat_task {
        task.abort();
    }
    registry.close().await;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,proxy_context=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
