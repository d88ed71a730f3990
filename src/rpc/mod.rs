//! Chain client adapter: staking, governance, distribution and block queries
//! against a Cosmos-SDK node over gRPC (or its REST gateway), mapped into
//! monitor records.

pub mod address;
mod client;
mod grpc;
mod performance;
#[cfg(test)]
pub(crate) mod testing;
pub mod wire;

pub use client::RestQueryClient;
pub use grpc::GrpcQueryClient;
pub use performance::Performance;

use crate::types::{MonitorObj, Proposal, ValInfo, ValRanking};
use async_trait::async_trait;
use std::sync::Arc;

/// Upstream queries the monitor relies on. `Ok(None)` means the node answered
/// that the object does not exist.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    async fn validator(&self, operator_addr: &str) -> Result<Option<wire::Validator>, RpcError>;

    /// Every validator in the bonded set, all pages
    async fn bonded_validators(&self) -> Result<Vec<wire::Validator>, RpcError>;

    async fn withdraw_address(&self, delegator_addr: &str) -> Result<Option<String>, RpcError>;

    async fn block(&self, height: i64) -> Result<Option<wire::Block>, RpcError>;

    async fn latest_block(&self) -> Result<wire::Block, RpcError>;

    /// Validator set at a height, in commit-signature order
    async fn validator_set(&self, height: i64)
        -> Result<Option<Vec<wire::SetValidator>>, RpcError>;

    async fn voting_proposals(&self) -> Result<Vec<wire::GovProposal>, RpcError>;

    async fn vote(&self, proposal_id: i64, voter: &str) -> Result<Option<wire::Vote>, RpcError>;
}

/// Per-chain client producing monitor records
#[derive(Clone)]
pub struct ChainCli {
    chain_name: String,
    query: Arc<dyn ChainQuery>,
}

impl ChainCli {
    /// Connect to a node's gRPC services, e.g. `http://10.0.0.1:9090`
    pub fn connect(chain_name: impl Into<String>, endpoint: &str) -> Result<Self, RpcError> {
        let client = GrpcQueryClient::new(endpoint)?;
        Ok(Self::new(chain_name, Arc::new(client)))
    }

    /// Connect to a node's REST gateway instead, e.g. `http://10.0.0.1:1317`
    pub fn connect_rest(chain_name: impl Into<String>, endpoint: &str) -> Result<Self, RpcError> {
        let client = RestQueryClient::new(endpoint)?;
        Ok(Self::new(chain_name, Arc::new(client)))
    }

    pub fn new(chain_name: impl Into<String>, query: Arc<dyn ChainQuery>) -> Self {
        Self {
            chain_name: chain_name.into(),
            query,
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// Current snapshot of each validator. Addresses the node does not know
    /// are skipped.
    pub async fn get_val_info(&self, operator_addrs: &[String]) -> Result<Vec<ValInfo>, RpcError> {
        let mut infos = Vec::with_capacity(operator_addrs.len());

        for addr in operator_addrs {
            let Some(val) = self.query.validator(addr).await? else {
                tracing::warn!(chain = %self.chain_name, operator_addr = %addr, "Validator not found");
                continue;
            };

            let self_stake_addr = self_stake_address(addr)?;
            let reward_addr = self
                .query
                .withdraw_address(&self_stake_addr)
                .await?
                .unwrap_or_else(|| self_stake_addr.clone());
            let (commission_rates, max_rate, max_change_rate) = val.commission()?;

            infos.push(ValInfo {
                moniker: val.description.moniker.clone(),
                operator_addr: val.operator_address.clone(),
                operator_addr_hex: val.consensus_hex()?,
                self_stake_addr,
                reward_addr,
                jailed: val.jailed,
                status: val.status_code(),
                voting_power: val.tokens.clone(),
                identity: val.description.identity.clone(),
                website: val.description.website.clone(),
                details: val.description.details.clone(),
                security_contact: val.description.security_contact.clone(),
                commission_rates,
                max_rate,
                max_change_rate,
                min_self_delegation: val.min_self_delegation.clone(),
            });
        }

        tracing::debug!(chain = %self.chain_name, count = infos.len(), "Validator info fetched");
        Ok(infos)
    }

    /// One row per (proposal in voting period, monitor), flagged when the
    /// monitor's self-stake account has voted.
    pub async fn get_proposal(&self, monitors: &[MonitorObj]) -> Result<Vec<Proposal>, RpcError> {
        let proposals = self.query.voting_proposals().await?;
        let mut out = Vec::with_capacity(proposals.len() * monitors.len());

        for proposal in &proposals {
            let proposal_id = proposal.id()?;
            let description = proposal.description();

            for monitor in monitors {
                let voter = if monitor.self_stake_addr.is_empty() {
                    self_stake_address(&monitor.operator_addr)?
                } else {
                    monitor.self_stake_addr.clone()
                };
                let voted = self.query.vote(proposal_id, &voter).await?.is_some();

                out.push(Proposal {
                    chain_name: self.chain_name.clone(),
                    proposal_id,
                    voting_start_time: proposal.voting_start_time.clone(),
                    voting_end_time: proposal.voting_end_time.clone(),
                    description: description.clone(),
                    moniker: monitor.moniker.clone(),
                    operator_addr: monitor.operator_addr.clone(),
                    status: i32::from(voted),
                });
            }
        }

        Ok(out)
    }

    /// 1-based position of each monitor in the bonded set ordered by tokens,
    /// `bonded + 1` for monitors outside it.
    pub async fn get_val_ranking(
        &self,
        height: i64,
        monitors: &[MonitorObj],
    ) -> Result<Vec<ValRanking>, RpcError> {
        let bonded = self.query.bonded_validators().await?;

        let mut ranked = bonded
            .iter()
            .map(|v| -> Result<_, RpcError> { Ok((v.token_amount()?, v.operator_address.as_str())) })
            .collect::<Result<Vec<_>, _>>()?;
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let outside = ranked.len() as i64 + 1;
        Ok(monitors
            .iter()
            .map(|m| {
                let ranking = ranked
                    .iter()
                    .position(|(_, addr)| *addr == m.operator_addr)
                    .map(|pos| pos as i64 + 1)
                    .unwrap_or(outside);
                ValRanking {
                    chain_name: self.chain_name.clone(),
                    moniker: m.moniker.clone(),
                    operator_addr: m.operator_addr.clone(),
                    block_height: height,
                    ranking,
                }
            })
            .collect())
    }

    pub async fn get_latest_block_height(&self) -> Result<i64, RpcError> {
        self.query.latest_block().await?.height()
    }
}

fn self_stake_address(operator_addr: &str) -> Result<String, RpcError> {
    address::account_address(operator_addr).map_err(|e| RpcError::Decode(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Node returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not available: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_get_val_info() {
        let chain = FakeChain::new();
        let op = operator(1);
        chain.add_validator(validator(1, "X", 500, false));
        chain.set_withdraw(&address::account_address(&op).unwrap(), "cosmos1reward");

        let cli = ChainCli::new("cosmos", Arc::new(chain));
        let infos = cli
            .get_val_info(&[op.clone(), operator(9)])
            .await
            .unwrap();

        assert_eq!(infos.len(), 1);
        let info = &infos[0];
        assert_eq!(info.moniker, "X");
        assert_eq!(info.operator_addr, op);
        assert_eq!(info.operator_addr_hex, consensus_hex(1));
        assert_eq!(info.reward_addr, "cosmos1reward");
        assert!(info.self_stake_addr.starts_with("cosmos1"));
        assert!(info.is_bonded());
        assert_eq!(info.voting_power, "500");
    }

    #[tokio::test]
    async fn test_reward_address_defaults_to_self_stake() {
        let chain = FakeChain::new();
        chain.add_validator(validator(2, "Y", 1, true));

        let cli = ChainCli::new("cosmos", Arc::new(chain));
        let infos = cli.get_val_info(&[operator(2)]).await.unwrap();

        assert!(infos[0].jailed);
        assert_eq!(infos[0].reward_addr, infos[0].self_stake_addr);
    }

    #[tokio::test]
    async fn test_failure_aborts_call() {
        let chain = FakeChain::new();
        chain.add_validator(validator(1, "X", 1, false));
        chain.fail_with(RpcError::Transport("connection reset".into()));

        let cli = ChainCli::new("cosmos", Arc::new(chain));
        let err = cli.get_val_info(&[operator(1)]).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_get_proposal_marks_votes() {
        let chain = FakeChain::new();
        chain.add_proposal(proposal(4, "Upgrade to v9"));
        let voter = monitor(1, "X");
        let idle = monitor(2, "Y");
        chain.add_vote(4, &address::account_address(&voter.operator_addr).unwrap());

        let cli = ChainCli::new("cosmos", Arc::new(chain));
        let proposals = cli.get_proposal(&[voter, idle]).await.unwrap();

        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].proposal_id, 4);
        assert_eq!(proposals[0].status, 1);
        assert_eq!(proposals[0].description, "Upgrade to v9");
        assert_eq!(proposals[1].status, 0);
        assert_eq!(proposals[1].moniker, "Y");
    }

    #[tokio::test]
    async fn test_get_val_ranking() {
        let chain = FakeChain::new();
        chain.add_validator(validator(1, "A", 100, false));
        chain.add_validator(validator(2, "B", 300, false));
        chain.add_validator(validator(3, "C", 200, false));

        let cli = ChainCli::new("cosmos", Arc::new(chain));
        let rankings = cli
            .get_val_ranking(50, &[monitor(1, "A"), monitor(2, "B"), monitor(7, "Z")])
            .await
            .unwrap();

        let ranks: Vec<i64> = rankings.iter().map(|r| r.ranking).collect();
        assert_eq!(ranks, vec![3, 1, 4]);
        assert!(rankings.iter().all(|r| r.block_height == 50));
    }

    #[tokio::test]
    async fn test_latest_block_height() {
        let chain = FakeChain::new();
        chain.add_block(block(41, 1, vec![]));
        chain.add_block(block(42, 1, vec![]));

        let cli = ChainCli::new("cosmos", Arc::new(chain));
        assert_eq!(cli.get_latest_block_height().await.unwrap(), 42);
    }

    #[test]
    fn test_connect_rejects_bad_endpoint() {
        assert!(matches!(
            ChainCli::connect("cosmos", "not a url"),
            Err(RpcError::Connection(_))
        ));
        assert!(matches!(
            ChainCli::connect_rest("cosmos", "not a url"),
            Err(RpcError::Connection(_))
        ));
    }
}
