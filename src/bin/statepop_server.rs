//! statepop server
//!
//! - Opens the SQLite snapshot store (creates schema on first run)
//! - Spawns the refresh scheduler (one run at startup, then every N minutes)
//! - Serves the read API until CTRL+C
//!
//! Usage:
//!   cargo run --release --bin statepop_server
//!
//! See `ServiceConfig::from_env` for environment variables.

use dotenv::dotenv;
use log::{error, info};
use statepop::api::{self, AppState};
use statepop::config::ServiceConfig;
use statepop::pipeline::{
    ArcGisCountiesClient, Refresher, RefreshScheduler, SnapshotStore, SqliteSnapshotStore,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 statepop server v{}", env!("CARGO_PKG_VERSION"));

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("✅ Configuration loaded");
    info!("   ├─ Layer: {}", config.arcgis.layer_url);
    info!("   ├─ Page size: {}", config.arcgis.max_record_count);
    info!("   ├─ Refresh interval: {} min", config.refresh_interval.as_secs() / 60);
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Bind: {}", config.bind_addr);
    info!("   └─ Environment: {:?}", config.environment);

    info!("🔧 Initializing database...");
    let store = Arc::new(SqliteSnapshotStore::open(&config.db_path)?);
    info!("✅ Database initialized ({} states stored)", store.count().await?);

    let client = Arc::new(ArcGisCountiesClient::new(config.arcgis.clone())?);
    let refresher = Arc::new(Refresher::new(client, store.clone()));

    let shutdown = CancellationToken::new();
    let scheduler = RefreshScheduler::new(refresher.clone(), config.refresh_interval)
        .spawn(shutdown.clone());

    let state = Arc::new(AppState {
        store,
        refresher,
        expose_error_details: config.is_development(),
        shutdown: shutdown.clone(),
    });
    let app = api::router(state, config.is_development());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("🌐 Listening on http://{}", listener.local_addr()?);
    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::spawn(api::cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await?;

    shutdown.cancel();
    if let Err(e) = scheduler.await {
        error!("❌ Refresh scheduler task failed: {}", e);
    }

    info!("✅ statepop server stopped");
    Ok(())
}
