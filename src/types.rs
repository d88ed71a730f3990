//! Domain records shared by the chain client, the persistence layer and alerting

use serde::{Deserialize, Serialize};

/// Bond status codes as reported by the staking module
pub const BOND_STATUS_UNSPECIFIED: i32 = 0;
pub const BOND_STATUS_UNBONDED: i32 = 1;
pub const BOND_STATUS_UNBONDING: i32 = 2;
pub const BOND_STATUS_BONDED: i32 = 3;

/// Validator identity and stake snapshot, superseded on every poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValInfo {
    pub moniker: String,
    pub operator_addr: String,
    /// Hex consensus address
    pub operator_addr_hex: String,
    pub self_stake_addr: String,
    /// Withdraw address of the self-stake account
    pub reward_addr: String,
    pub jailed: bool,
    pub status: i32,
    /// Bonded tokens as reported by the node
    pub voting_power: String,
    pub identity: String,
    pub website: String,
    pub details: String,
    pub security_contact: String,
    pub commission_rates: f64,
    pub max_rate: f64,
    pub max_change_rate: f64,
    pub min_self_delegation: String,
}

impl ValInfo {
    pub fn is_bonded(&self) -> bool {
        self.status == BOND_STATUS_BONDED
    }
}

/// One signed block for one validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValSign {
    pub moniker: String,
    pub operator_addr: String,
    pub block_height: i64,
    /// 1 when the validator signed
    pub status: i32,
    pub double_sign: bool,
    /// Partition bucket, `block_height % 10`
    pub child_table: i64,
}

/// One missed block for one validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValSignMissed {
    pub chain_name: String,
    pub moniker: String,
    pub operator_addr: String,
    pub block_height: i64,
}

/// A height at which the validator was the block proposer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalAssignment {
    pub moniker: String,
    pub operator_addr: String,
    pub block_height: i64,
    pub child_table: i64,
}

/// Governance proposal as seen by one monitored validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub chain_name: String,
    pub proposal_id: i64,
    pub voting_start_time: String,
    pub voting_end_time: String,
    pub description: String,
    pub moniker: String,
    pub operator_addr: String,
    /// 1 when the monitor has voted
    pub status: i32,
}

/// Watch-list entry. Only `moniker` and `operator_addr` are required; the
/// derived addresses are filled in from chain state when left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorObj {
    pub moniker: String,
    pub operator_addr: String,
    #[serde(default)]
    pub operator_addr_hex: String,
    #[serde(default)]
    pub self_stake_addr: String,
}

impl MonitorObj {
    pub fn new(moniker: impl Into<String>, operator_addr: impl Into<String>) -> Self {
        Self {
            moniker: moniker.into(),
            operator_addr: operator_addr.into(),
            operator_addr_hex: String::new(),
            self_stake_addr: String::new(),
        }
    }

    /// Fill derived addresses from a fresh validator snapshot
    pub fn refresh_from(&mut self, info: &ValInfo) {
        if self.operator_addr_hex.is_empty() {
            self.operator_addr_hex = info.operator_addr_hex.clone();
        }
        if self.self_stake_addr.is_empty() {
            self.self_stake_addr = info.self_stake_addr.clone();
        }
    }
}

/// A monitored validator found jailed
#[derive(Debug, Clone, PartialEq)]
pub struct ValIsJail {
    pub chain_name: String,
    pub moniker: String,
    pub operator_addr: String,
    pub block_height: i64,
}

/// A monitored validator found outside the bonded set
#[derive(Debug, Clone, PartialEq)]
pub struct ValIsActive {
    pub chain_name: String,
    pub moniker: String,
    pub operator_addr: String,
    pub block_height: i64,
}

/// Position of a monitored validator in the bonded set, 1-based
#[derive(Debug, Clone, PartialEq)]
pub struct ValRanking {
    pub chain_name: String,
    pub moniker: String,
    pub operator_addr: String,
    pub block_height: i64,
    pub ranking: i64,
}
