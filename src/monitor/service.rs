//! Background driver running poll cycles on an interval

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::{ChainMonitor, MonitorError};
use crate::storage::{SnapshotManager, StorageEngine};

/// Runs every chain's cycle in turn, then snapshots the store
pub struct MonitorService {
    /// Chains to poll; moved into the background task on start
    chains: Option<Vec<ChainMonitor>>,
    /// Storage engine shared by the chains
    engine: Arc<StorageEngine>,
    /// Snapshot writer, if persistence is enabled
    snapshots: Option<Arc<SnapshotManager>>,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl MonitorService {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            chains: Some(Vec::new()),
            engine,
            snapshots: None,
            shutdown_tx: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<SnapshotManager>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Register a chain; ignored once started
    pub fn add_chain(&mut self, chain: ChainMonitor) {
        match self.chains.as_mut() {
            Some(chains) => chains.push(chain),
            None => tracing::warn!(chain = %chain.chain_name(), "Monitor already running, chain ignored"),
        }
    }

    /// Start the background loop. The first cycle runs immediately.
    pub fn start(
        &mut self,
        poll_interval: Duration,
    ) -> Result<tokio::task::JoinHandle<()>, MonitorError> {
        let mut chains = self.chains.take().ok_or(MonitorError::AlreadyStarted)?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let engine = Arc::clone(&self.engine);
        let snapshots = self.snapshots.clone();

        tracing::info!(
            chains = chains.len(),
            interval_secs = poll_interval.as_secs(),
            "Monitor started"
        );

        Ok(tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_once(&mut chains, &engine, snapshots.as_deref()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Monitor shutting down");
                        break;
                    }
                }
            }
        }))
    }

    /// Stop the background loop
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// One pass over every chain. A failing chain is logged and skipped.
    pub async fn run_once(
        chains: &mut [ChainMonitor],
        engine: &StorageEngine,
        snapshots: Option<&SnapshotManager>,
    ) {
        for chain in chains.iter_mut() {
            if let Err(e) = chain.run_cycle().await {
                tracing::error!(chain = %chain.chain_name(), error = %e, "Poll cycle failed");
            }
        }

        let Some(snapshots) = snapshots else {
            return;
        };
        match snapshots.create_snapshot(engine) {
            Ok(meta) => {
                tracing::debug!(snapshot_id = %meta.id, "Store snapshot saved");
                if let Err(e) = snapshots.cleanup_old_snapshots() {
                    tracing::warn!(error = %e, "Failed to prune snapshots");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to save snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::VAL_SIGN;
    use crate::db::DbCli;
    use crate::monitor::CycleLimits;
    use crate::rpc::testing::*;
    use crate::rpc::{ChainCli, RpcError};
    use crate::storage::PersistenceConfig;
    use crate::types::MonitorObj;
    use tempfile::TempDir;

    fn chain_monitor(name: &str, chain: Arc<FakeChain>, engine: Arc<StorageEngine>) -> ChainMonitor {
        ChainMonitor::new(
            ChainCli::new(name, chain),
            DbCli::new(name, engine).unwrap(),
            vec![MonitorObj::new("A", operator(1))],
        )
        .with_limits(CycleLimits {
            start_height: 1,
            ..Default::default()
        })
    }

    fn healthy_chain() -> Arc<FakeChain> {
        let chain = Arc::new(FakeChain::new());
        chain.add_validator(validator(1, "A", 10, false));
        for h in 1..=6 {
            chain.add_block(block(h, 2, vec![sig(true, Some(1))]));
        }
        chain
    }

    #[tokio::test]
    async fn test_run_once_skips_failing_chain_and_snapshots() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StorageEngine::new());
        let snapshots = SnapshotManager::new(PersistenceConfig::new(dir.path())).unwrap();

        let broken = Arc::new(FakeChain::new());
        broken.fail_with(RpcError::Transport("refused".into()));
        let mut chains = vec![
            chain_monitor("evmos", broken, Arc::clone(&engine)),
            chain_monitor("cosmos", healthy_chain(), Arc::clone(&engine)),
        ];

        MonitorService::run_once(&mut chains, &engine, Some(&snapshots)).await;

        let db = DbCli::new("cosmos", Arc::clone(&engine)).unwrap();
        assert_eq!(db.get_block_height_from_db("cosmos").unwrap(), 5);
        assert_eq!(engine.table_stats(VAL_SIGN).unwrap().row_count, 5);
        assert!(snapshots.latest_snapshot().is_some());

        let restored = StorageEngine::new();
        snapshots.restore_latest(&restored).unwrap();
        let db = DbCli::new("cosmos", Arc::new(restored)).unwrap();
        assert_eq!(db.get_block_height_from_db("cosmos").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let engine = Arc::new(StorageEngine::new());
        let mut service = MonitorService::new(Arc::clone(&engine));
        service.add_chain(chain_monitor("cosmos", healthy_chain(), Arc::clone(&engine)));

        let handle = service.start(Duration::from_millis(20)).unwrap();
        assert!(matches!(
            service.start(Duration::from_millis(20)),
            Err(MonitorError::AlreadyStarted)
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        service.stop().await;
        handle.await.unwrap();

        let db = DbCli::new("cosmos", engine).unwrap();
        assert_eq!(db.get_block_height_from_db("cosmos").unwrap(), 5);
    }
}
