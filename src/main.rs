//! Opsforge — task orchestration and self-healing core
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (./data, 0.0.0.0:8080)
//! cargo run --release
//!
//! # Explicit config file
//! cargo run --release -- --config /etc/opsforge/opsforge.toml
//! ```
//!
//! # Environment Variables
//!
//! - `OPSFORGE_CONFIG`: Path to the TOML config file
//! - `OPSFORGE_CORS_ORIGINS`: Comma-separated allowed CORS origins
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use opsforge::api::{create_app, AppContext};
use opsforge::config::CoreConfig;
use opsforge::coordinator::{TaskCoordinator, TaskCoordinatorHandle};
use opsforge::healing::{HealingEngine, HealingHandle, StrategyContext};
use opsforge::queue::{JobQueue, JobQueueHandle};
use opsforge::resync::{DisabledResync, HttpResyncClient, ResyncService};
use opsforge::storage::{KvStore, SledKvStore, SledSnapshotStore, SnapshotStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "opsforge")]
#[command(about = "Opsforge task orchestration and self-healing core")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides OPSFORGE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the server bind address (default from config, "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the data directory for the sled database
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let mut config = CoreConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    info!(
        addr = %config.server.addr,
        data_dir = %config.storage.data_dir,
        "Opsforge starting"
    );

    // Shared sled database: snapshots and the expiring key-value store
    let db_path = PathBuf::from(&config.storage.data_dir).join("opsforge-db");
    let db = sled::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let snapshots: Arc<dyn SnapshotStore> =
        Arc::new(SledSnapshotStore::open(&db).context("Failed to open snapshot store")?);
    let kv: Arc<dyn KvStore> =
        Arc::new(SledKvStore::open(&db).context("Failed to open key-value store")?);

    // Resync collaborator: HTTP client when configured, otherwise disabled
    let resync: Arc<dyn ResyncService> = match config.healing.resync_url.as_deref() {
        Some(url) => match HttpResyncClient::new(url) {
            Some(client) => {
                info!(endpoint = url, "Resync service configured");
                Arc::new(client)
            }
            None => Arc::new(DisabledResync),
        },
        None => Arc::new(DisabledResync),
    };

    // Channels first, so the three mutually-dependent actors can hold each
    // other's handles before any of them starts
    let (coordinator_handle, coordinator_rx) = TaskCoordinatorHandle::channel();
    let (queue_handle, queue_rx) = JobQueueHandle::channel();
    let (healing_handle, healing_rx) = HealingHandle::channel();

    let coordinator = TaskCoordinator::new(
        coordinator_rx,
        healing_handle.clone(),
        snapshots.clone(),
        config.coordinator.clone(),
    );
    let queue = JobQueue::new(
        queue_rx,
        healing_handle.clone(),
        snapshots.clone(),
        config.queue.clone(),
    );
    let engine = HealingEngine::new(
        healing_rx,
        StrategyContext {
            queue: queue_handle.clone(),
            coordinator: coordinator_handle.clone(),
            kv,
            resync,
            config: config.healing.clone(),
        },
        snapshots,
    );

    tokio::spawn(coordinator.run());
    tokio::spawn(queue.run());
    tokio::spawn(engine.run());

    let app = create_app(AppContext {
        coordinator: coordinator_handle,
        queue: queue_handle,
        healing: healing_handle,
    });

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;

    info!(addr = %config.server.addr, "API listening");
    axum::serve(listener, app)
        .await
        .context("API server exited")?;

    Ok(())
}
