//! Valmon server
//!
//! Run with: cargo run -- --config valmon.toml
//!
//! Settings come from the config file and `VALMON__`-prefixed environment
//! variables (e.g. `VALMON__ALERT__PROPORTION=0.2`). Log level follows
//! `RUST_LOG` (default: valmon=info).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use valmon::alerts::Notifier;
use valmon::config::Settings;
use valmon::db::DbCli;
use valmon::monitor::{ChainMonitor, MonitorService};
use valmon::storage::{SnapshotManager, StorageEngine};

#[derive(Debug, Parser)]
#[command(name = "valmon", version, about = "Cosmos validator monitor")]
struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start without restoring the latest snapshot
    #[arg(long)]
    fresh: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "valmon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let engine = Arc::new(StorageEngine::new());
    let snapshots = Arc::new(SnapshotManager::new(settings.storage.persistence())?);
    if !cli.fresh {
        match snapshots.restore_latest(&engine)? {
            Some(meta) => tracing::info!(
                snapshot_id = %meta.id,
                tables = meta.tables.len(),
                "Restored store from snapshot"
            ),
            None => tracing::info!("No snapshot found, starting empty"),
        }
    }

    let notifier = Arc::new(Notifier::new());
    let mut service = MonitorService::new(Arc::clone(&engine)).with_snapshots(Arc::clone(&snapshots));

    for chain in &settings.monitor.chains {
        let endpoint = match settings.endpoint(chain) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!(chain = %chain.name, error = %e, "Skipping chain");
                continue;
            }
        };
        let cli = match endpoint.connect(&chain.name) {
            Ok(cli) => cli,
            Err(e) => {
                tracing::error!(chain = %chain.name, endpoint = %endpoint, error = %e, "Skipping chain");
                continue;
            }
        };
        let db = DbCli::new(&chain.name, Arc::clone(&engine))?;

        tracing::info!(
            chain = %chain.name,
            endpoint = %endpoint,
            validators = chain.validators.len(),
            "Chain configured"
        );
        service.add_chain(
            ChainMonitor::new(cli, db, chain.validators.clone())
                .with_limits(settings.monitor.limits(chain))
                .with_alerts(settings.alert.clone())
                .with_notifier(Arc::clone(&notifier)),
        );
    }

    if settings.monitor.chains.is_empty() {
        tracing::warn!("No chains configured");
    }

    let handle = service.start(settings.monitor.interval())?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    service.stop().await;
    handle.await?;

    Ok(())
}
