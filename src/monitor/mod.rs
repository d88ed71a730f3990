//! The poll cycle: fetch chain state, persist it, classify problems and
//! notify. [`ChainMonitor`] runs one cycle for one chain; [`MonitorService`]
//! drives all chains on an interval.

mod service;

pub use service::MonitorService;

use crate::alerts::{AlertSettings, Findings, Notifier, Renderer};
use crate::db::{DbCli, DbError};
use crate::rpc::{ChainCli, RpcError};
use crate::types::{MonitorObj, Proposal, ValIsActive, ValIsJail, ValSignMissed};
use std::collections::HashSet;
use std::sync::Arc;

/// Trailing heights that must all be missed to raise a sync alert
pub const CONSECUTIVE_MISSES: i64 = 5;

/// Window the missed-signature proportion is measured over
pub const MISS_WINDOW: i64 = 100;

/// Per-cycle limits
#[derive(Debug, Clone)]
pub struct CycleLimits {
    /// Heights processed per cycle at most
    pub max_blocks_per_cycle: i64,
    /// Heights covered by the stats tables, ending at the last processed height
    pub stats_window: i64,
    /// First height to process when nothing is stored yet; 0 starts at the tip
    pub start_height: i64,
}

impl Default for CycleLimits {
    fn default() -> Self {
        Self {
            max_blocks_per_cycle: 100,
            stats_window: 10_000,
            start_height: 0,
        }
    }
}

/// Outcome of one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub latest_height: i64,
    /// Closed range of heights whose signatures were stored
    pub processed: Option<(i64, i64)>,
    pub findings: Findings,
    pub notified: bool,
}

/// Whether a validator's missed heights up to `end` breach the sync rule:
/// the trailing five heights all missed, or at least `proportion` of the
/// last hundred.
pub fn sync_breach(missed: &[i64], end: i64, proportion: f64) -> bool {
    let missed: HashSet<i64> = missed.iter().copied().collect();

    let trailing = (end - CONSECUTIVE_MISSES + 1..=end).all(|h| missed.contains(&h));
    let recent = missed
        .iter()
        .filter(|&&h| h > end - MISS_WINDOW && h <= end)
        .count();

    trailing || (proportion > 0.0 && recent as f64 >= proportion * MISS_WINDOW as f64)
}

/// One chain's watch list with its client, store and alert settings
pub struct ChainMonitor {
    cli: ChainCli,
    db: DbCli,
    monitors: Vec<MonitorObj>,
    limits: CycleLimits,
    alerts: AlertSettings,
    renderer: Renderer,
    notifier: Arc<Notifier>,
}

impl ChainMonitor {
    pub fn new(cli: ChainCli, db: DbCli, monitors: Vec<MonitorObj>) -> Self {
        let alerts = AlertSettings::default();
        Self {
            cli,
            db,
            monitors,
            limits: CycleLimits::default(),
            renderer: Renderer::new(&alerts),
            alerts,
            notifier: Arc::new(Notifier::new()),
        }
    }

    pub fn with_limits(mut self, limits: CycleLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_alerts(mut self, alerts: AlertSettings) -> Self {
        self.renderer = Renderer::new(&alerts);
        self.alerts = alerts;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn chain_name(&self) -> &str {
        self.db.chain_name()
    }

    pub fn monitors(&self) -> &[MonitorObj] {
        &self.monitors
    }

    /// Run one cycle. Only an unreachable node fails the cycle; later steps
    /// log their errors and the cycle carries on.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, MonitorError> {
        let chain = self.chain_name().to_string();
        let latest = self.cli.get_latest_block_height().await?;
        let mut report = CycleReport {
            latest_height: latest,
            ..Default::default()
        };

        self.check_validators(latest, &mut report.findings).await;

        report.processed = self.sync_blocks(latest).await?;
        if let Some((_, to)) = report.processed {
            self.update_stats(to);
            report.findings.missed = self.check_sync(to);
        }

        self.check_ranking(latest, &mut report.findings).await;
        report.findings.proposals = self.check_proposals().await;

        if let Some(body) = self.renderer.render(&report.findings) {
            match self.notifier.notify(&self.alerts.targets, &chain, &body).await {
                Ok(()) => report.notified = true,
                Err(e) => tracing::error!(chain = %chain, error = %e, "Failed to send notification"),
            }
        }

        tracing::info!(
            chain = %chain,
            latest,
            processed = ?report.processed,
            alerting = !report.findings.is_empty(),
            "Cycle complete"
        );
        Ok(report)
    }

    /// Store validator snapshots and collect jailed and inactive monitors
    async fn check_validators(&mut self, height: i64, findings: &mut Findings) {
        let addrs: Vec<String> = self.monitors.iter().map(|m| m.operator_addr.clone()).collect();
        let infos = match self.cli.get_val_info(&addrs).await {
            Ok(infos) => infos,
            Err(e) => {
                tracing::error!(chain = %self.chain_name(), error = %e, "Failed to fetch validator info");
                return;
            }
        };

        if let Err(e) = self.db.batch_save_val_info(&infos) {
            tracing::error!(chain = %self.chain_name(), error = %e, "Failed to store validator info");
        }

        let chain = self.chain_name().to_string();
        for info in &infos {
            let Some(monitor) = self
                .monitors
                .iter_mut()
                .find(|m| m.operator_addr == info.operator_addr)
            else {
                continue;
            };
            monitor.refresh_from(info);

            if info.jailed {
                findings.jailed.push(ValIsJail {
                    chain_name: chain.clone(),
                    moniker: monitor.moniker.clone(),
                    operator_addr: monitor.operator_addr.clone(),
                    block_height: height,
                });
            } else if !info.is_bonded() {
                findings.inactive.push(ValIsActive {
                    chain_name: chain.clone(),
                    moniker: monitor.moniker.clone(),
                    operator_addr: monitor.operator_addr.clone(),
                    block_height: height,
                });
            }
        }
    }

    /// Fetch and store signing records from the resume point towards the tip.
    /// The tip itself waits for its commit in the next block.
    async fn sync_blocks(&mut self, latest: i64) -> Result<Option<(i64, i64)>, MonitorError> {
        let chain = self.chain_name().to_string();

        // Without a consensus address a monitor matches no signature
        let unresolved: Vec<&str> = self
            .monitors
            .iter()
            .filter(|m| m.operator_addr_hex.is_empty())
            .map(|m| m.moniker.as_str())
            .collect();
        if !unresolved.is_empty() {
            tracing::warn!(chain = %chain, ?unresolved, "Consensus address unknown, block sync deferred");
            return Ok(None);
        }

        let stored = self.db.get_block_height_from_db(&chain)?;

        let from = if stored > 0 {
            stored + 1
        } else if self.limits.start_height > 0 {
            self.limits.start_height
        } else {
            latest - 1
        };
        let to = from
            .saturating_add(self.limits.max_blocks_per_cycle.max(1) - 1)
            .min(latest - 1);
        if from < 1 || from > to {
            tracing::debug!(chain = %chain, from, latest, "No new blocks to process");
            return Ok(None);
        }

        let mut assignments = Vec::new();
        let mut signs = Vec::new();
        let mut missed = Vec::new();
        let mut last = from - 1;

        for height in from..=to {
            match self.cli.get_val_performance(height, &self.monitors).await {
                Ok((a, s, m)) => {
                    assignments.extend(a);
                    signs.extend(s);
                    missed.extend(m);
                    last = height;
                }
                Err(e) => {
                    tracing::error!(chain = %chain, height, error = %e, "Failed to fetch block performance");
                    break;
                }
            }
        }

        if last < from {
            return Ok(None);
        }

        if let Err(e) = self.db.save_block_records(&assignments, &signs, &missed, last) {
            tracing::error!(chain = %chain, from, to = last, error = %e, "Failed to store signing records");
            return Ok(None);
        }

        tracing::debug!(
            chain = %chain,
            from,
            to = last,
            signed = signs.len(),
            missed = missed.len(),
            proposed = assignments.len(),
            "Blocks processed"
        );
        Ok(Some((from, last)))
    }

    fn update_stats(&self, to: i64) {
        let from = (to - self.limits.stats_window + 1).max(1);
        if let Err(e) = self.db.batch_save_val_stats(from, to) {
            tracing::error!(chain = %self.chain_name(), error = %e, "Failed to update validator stats");
        }
    }

    /// Monitors breaching the sync rule at `end`
    fn check_sync(&self, end: i64) -> Vec<ValSignMissed> {
        let mut breaches = Vec::new();

        for monitor in &self.monitors {
            let missed = match self
                .db
                .get_missed_heights(&monitor.operator_addr, end - MISS_WINDOW + 1, end)
            {
                Ok(missed) => missed,
                Err(e) => {
                    tracing::error!(chain = %self.chain_name(), error = %e, "Failed to load missed heights");
                    continue;
                }
            };

            if sync_breach(&missed, end, self.alerts.proportion) {
                breaches.push(ValSignMissed {
                    chain_name: self.chain_name().to_string(),
                    moniker: monitor.moniker.clone(),
                    operator_addr: monitor.operator_addr.clone(),
                    block_height: end,
                });
            }
        }

        breaches
    }

    async fn check_ranking(&self, height: i64, findings: &mut Findings) {
        match self.cli.get_val_ranking(height, &self.monitors).await {
            Ok(rankings) => {
                findings.ranking = rankings
                    .into_iter()
                    .filter(|r| r.ranking > self.alerts.ranking_threshold)
                    .collect();
            }
            Err(e) => {
                tracing::error!(chain = %self.chain_name(), error = %e, "Failed to fetch validator ranking");
            }
        }
    }

    /// Store proposals in voting period; return the ones seen for the first
    /// time, one per proposal id
    async fn check_proposals(&self) -> Vec<Proposal> {
        let proposals = match self.cli.get_proposal(&self.monitors).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(chain = %self.chain_name(), error = %e, "Failed to fetch proposals");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let fresh: Vec<Proposal> = proposals
            .iter()
            .filter(|p| !self.db.proposal_exists(p.proposal_id, &p.operator_addr))
            .filter(|p| seen.insert(p.proposal_id))
            .cloned()
            .collect();

        if let Err(e) = self.db.batch_save_proposals(&proposals) {
            tracing::error!(chain = %self.chain_name(), error = %e, "Failed to store proposals");
        }

        fresh
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Monitor already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{SIGN_NUM, SYNC_HEIGHT, UPTIME, VAL_SIGN, VAL_SIGN_MISSED};
    use crate::rpc::testing::*;
    use crate::storage::StorageEngine;

    fn chain_with_blocks(to: i64, miss_from: i64) -> Arc<FakeChain> {
        let chain = Arc::new(FakeChain::new());
        chain.add_validator(validator(1, "A", 300, false));
        chain.add_validator(validator(2, "B", 200, true));
        // Block h carries the commit for h - 1
        for h in 1..=to {
            let signed_by_a = h - 1 < miss_from;
            chain.add_block(block(h, 3, vec![sig(signed_by_a, Some(1)), sig(true, Some(3))]));
        }
        chain
    }

    fn monitor_for(chain: Arc<FakeChain>, engine: Arc<StorageEngine>) -> ChainMonitor {
        let cli = ChainCli::new("cosmos", chain);
        let db = DbCli::new("cosmos", engine).unwrap();
        let monitors = vec![
            MonitorObj::new("A", operator(1)),
            MonitorObj::new("B", operator(2)),
        ];
        ChainMonitor::new(cli, db, monitors).with_limits(CycleLimits {
            max_blocks_per_cycle: 50,
            stats_window: 1000,
            start_height: 1,
        })
    }

    #[test]
    fn test_sync_breach_trailing_misses() {
        assert!(sync_breach(&[96, 97, 98, 99, 100], 100, 0.5));
        assert!(!sync_breach(&[95, 97, 98, 99, 100], 100, 0.5));
    }

    #[test]
    fn test_sync_breach_proportion() {
        let missed: Vec<i64> = (1..=100).step_by(10).collect();
        assert!(sync_breach(&missed, 100, 0.1));
        assert!(!sync_breach(&missed, 100, 0.11));
        assert!(!sync_breach(&missed, 200, 0.1));
        assert!(!sync_breach(&[], 100, 0.0));
    }

    #[tokio::test]
    async fn test_cycle_stores_and_classifies() {
        let engine = Arc::new(StorageEngine::new());
        let mut monitor = monitor_for(chain_with_blocks(21, 15), Arc::clone(&engine));

        let report = monitor.run_cycle().await.unwrap();

        assert_eq!(report.latest_height, 21);
        assert_eq!(report.processed, Some((1, 20)));
        assert_eq!(engine.table_stats(VAL_SIGN).unwrap().row_count, 14);
        assert_eq!(engine.table_stats(VAL_SIGN_MISSED).unwrap().row_count, 6);

        let jailed: Vec<_> = report.findings.jailed.iter().map(|j| j.moniker.as_str()).collect();
        assert_eq!(jailed, ["B"]);
        assert!(report.findings.inactive.is_empty());

        assert_eq!(report.findings.missed.len(), 1);
        assert_eq!(report.findings.missed[0].moniker, "A");
        assert_eq!(report.findings.missed[0].block_height, 20);
        assert!(report.notified);

        assert_eq!(monitor.monitors()[0].operator_addr_hex, consensus_hex(1));
        assert!(engine.table_stats(SIGN_NUM).unwrap().row_count > 0);
        assert!(engine.table_stats(UPTIME).unwrap().row_count > 0);
    }

    #[tokio::test]
    async fn test_cycle_resumes_without_duplicates() {
        let engine = Arc::new(StorageEngine::new());
        let chain = chain_with_blocks(11, 100);
        let mut monitor = monitor_for(Arc::clone(&chain), Arc::clone(&engine));

        assert_eq!(monitor.run_cycle().await.unwrap().processed, Some((1, 10)));
        assert_eq!(monitor.run_cycle().await.unwrap().processed, None);

        for h in 12..=15 {
            chain.add_block(block(h, 3, vec![sig(true, Some(1))]));
        }
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.processed, Some((11, 14)));
        assert_eq!(engine.table_stats(VAL_SIGN).unwrap().row_count, 14);
        assert!(report.findings.missed.is_empty());
    }

    #[tokio::test]
    async fn test_new_proposals_alert_once() {
        let engine = Arc::new(StorageEngine::new());
        let chain = chain_with_blocks(3, 100);
        chain.add_proposal(proposal(9, "Raise gas limit"));
        let mut monitor = monitor_for(chain, engine);

        let first = monitor.run_cycle().await.unwrap();
        assert_eq!(first.findings.proposals.len(), 1);
        assert_eq!(first.findings.proposals[0].proposal_id, 9);

        let second = monitor.run_cycle().await.unwrap();
        assert!(second.findings.proposals.is_empty());
    }

    #[tokio::test]
    async fn test_ranking_threshold() {
        let engine = Arc::new(StorageEngine::new());
        let chain = chain_with_blocks(3, 100);
        chain.add_validator(validator(4, "C", 900, false));
        let mut monitor = monitor_for(chain, engine).with_alerts(AlertSettings {
            ranking_threshold: 1,
            ..Default::default()
        });

        let report = monitor.run_cycle().await.unwrap();
        let ranked: Vec<_> = report.findings.ranking.iter().map(|r| (r.moniker.as_str(), r.ranking)).collect();
        assert_eq!(ranked, [("A", 2), ("B", 3)]);
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_cycle() {
        let engine = Arc::new(StorageEngine::new());
        let chain = chain_with_blocks(3, 100);
        chain.fail_with(RpcError::Transport("connection refused".into()));
        let mut monitor = monitor_for(chain, Arc::clone(&engine));

        assert!(matches!(monitor.run_cycle().await, Err(MonitorError::Rpc(_))));
        assert_eq!(engine.table_stats(VAL_SIGN).unwrap().row_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_consensus_address_defers_sync() {
        let engine = Arc::new(StorageEngine::new());
        let chain = Arc::new(FakeChain::new());
        chain.add_validator(validator(1, "A", 300, false));
        for h in 1..=11 {
            chain.add_block(block(h, 3, vec![sig(false, Some(1))]));
        }
        chain.fail_validator_lookups(Some(RpcError::Status {
            status: 503,
            message: "node is syncing".into(),
        }));

        let cli = ChainCli::new("cosmos", chain.clone());
        let db = DbCli::new("cosmos", Arc::clone(&engine)).unwrap();
        let mut monitor = ChainMonitor::new(cli, db, vec![MonitorObj::new("A", operator(1))])
            .with_limits(CycleLimits {
                start_height: 1,
                ..Default::default()
            });

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.processed, None);
        assert!(report.findings.missed.is_empty());
        assert_eq!(engine.table_stats(VAL_SIGN_MISSED).unwrap().row_count, 0);
        assert_eq!(monitor.db.get_block_height_from_db("cosmos").unwrap(), 0);

        chain.fail_validator_lookups(None);
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.processed, Some((1, 10)));
        assert_eq!(engine.table_stats(VAL_SIGN_MISSED).unwrap().row_count, 10);
        assert_eq!(report.findings.missed.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_resume_point() {
        let engine = Arc::new(StorageEngine::new());
        let mut monitor = monitor_for(chain_with_blocks(11, 100), Arc::clone(&engine));
        // Same validator listed twice yields a duplicate signing key
        monitor.monitors.push(MonitorObj {
            operator_addr_hex: consensus_hex(1),
            ..MonitorObj::new("A again", operator(1))
        });

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.processed, None);
        assert_eq!(engine.table_stats(VAL_SIGN).unwrap().row_count, 0);
        assert_eq!(engine.table_stats(SYNC_HEIGHT).unwrap().row_count, 0);
        assert_eq!(monitor.db.get_block_height_from_db("cosmos").unwrap(), 0);

        monitor.monitors.pop();
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.processed, Some((1, 10)));
        assert_eq!(engine.table_stats(VAL_SIGN).unwrap().row_count, 10);
    }

    #[tokio::test]
    async fn test_huge_block_limit_clamps_to_tip() {
        let engine = Arc::new(StorageEngine::new());
        let mut monitor = monitor_for(chain_with_blocks(6, 100), engine).with_limits(CycleLimits {
            max_blocks_per_cycle: i64::MAX,
            stats_window: 1000,
            start_height: 2,
        });

        assert_eq!(monitor.run_cycle().await.unwrap().processed, Some((2, 5)));
    }
}
