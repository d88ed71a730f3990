//! In-memory chain used by adapter and monitor tests

use super::wire::*;
use super::{address, ChainQuery, RpcError};
use crate::types::MonitorObj;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Default)]
struct State {
    validators: Vec<Validator>,
    withdraw: HashMap<String, String>,
    blocks: BTreeMap<i64, Block>,
    sets: HashMap<i64, Vec<SetValidator>>,
    proposals: Vec<GovProposal>,
    votes: HashSet<(i64, String)>,
    failure: Option<RpcError>,
    validator_failure: Option<RpcError>,
}

#[derive(Default)]
pub struct FakeChain {
    state: Mutex<State>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_validator(&self, val: Validator) {
        let mut state = self.state.lock();
        state.validators.retain(|v| v.operator_address != val.operator_address);
        state.validators.push(val);
    }

    pub fn set_withdraw(&self, delegator: &str, withdraw: &str) {
        self.state
            .lock()
            .withdraw
            .insert(delegator.to_string(), withdraw.to_string());
    }

    pub fn add_block(&self, block: Block) {
        let height = block.height().unwrap_or_default();
        self.state.lock().blocks.insert(height, block);
    }

    pub fn set_validator_set(&self, height: i64, seeds: &[u8]) {
        let set = seeds
            .iter()
            .map(|&seed| SetValidator {
                address: String::new(),
                pub_key: Some(PubKey {
                    type_url: "/cosmos.crypto.ed25519.PubKey".into(),
                    key: pubkey(seed),
                }),
                voting_power: "1".into(),
            })
            .collect();
        self.state.lock().sets.insert(height, set);
    }

    pub fn add_proposal(&self, proposal: GovProposal) {
        self.state.lock().proposals.push(proposal);
    }

    pub fn add_vote(&self, proposal_id: i64, voter: &str) {
        self.state
            .lock()
            .votes
            .insert((proposal_id, voter.to_string()));
    }

    /// Every later query fails with `err`
    pub fn fail_with(&self, err: RpcError) {
        self.state.lock().failure = Some(err);
    }

    /// Validator lookups fail with `err` until cleared with `None`
    pub fn fail_validator_lookups(&self, err: Option<RpcError>) {
        self.state.lock().validator_failure = err;
    }

    fn check(&self) -> Result<(), RpcError> {
        match &self.state.lock().failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainQuery for FakeChain {
    async fn validator(&self, operator_addr: &str) -> Result<Option<Validator>, RpcError> {
        self.check()?;
        let state = self.state.lock();
        if let Some(err) = &state.validator_failure {
            return Err(err.clone());
        }
        Ok(state
            .validators
            .iter()
            .find(|v| v.operator_address == operator_addr)
            .cloned())
    }

    async fn bonded_validators(&self) -> Result<Vec<Validator>, RpcError> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .validators
            .iter()
            .filter(|v| v.status == BOND_STATUS_BONDED)
            .cloned()
            .collect())
    }

    async fn withdraw_address(&self, delegator_addr: &str) -> Result<Option<String>, RpcError> {
        self.check()?;
        Ok(self.state.lock().withdraw.get(delegator_addr).cloned())
    }

    async fn block(&self, height: i64) -> Result<Option<Block>, RpcError> {
        self.check()?;
        Ok(self.state.lock().blocks.get(&height).cloned())
    }

    async fn latest_block(&self) -> Result<Block, RpcError> {
        self.check()?;
        self.state
            .lock()
            .blocks
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| RpcError::Status {
                status: 500,
                message: "no blocks".into(),
            })
    }

    async fn validator_set(&self, height: i64) -> Result<Option<Vec<SetValidator>>, RpcError> {
        self.check()?;
        Ok(self.state.lock().sets.get(&height).cloned())
    }

    async fn voting_proposals(&self) -> Result<Vec<GovProposal>, RpcError> {
        self.check()?;
        Ok(self.state.lock().proposals.clone())
    }

    async fn vote(&self, proposal_id: i64, voter: &str) -> Result<Option<Vote>, RpcError> {
        self.check()?;
        let voted = self
            .state
            .lock()
            .votes
            .contains(&(proposal_id, voter.to_string()));
        Ok(voted.then(|| Vote {
            proposal_id: proposal_id.to_string(),
            voter: voter.to_string(),
            option: "VOTE_OPTION_YES".into(),
        }))
    }
}

/// Base64 ed25519 key derived from a seed byte
pub fn pubkey(seed: u8) -> String {
    STANDARD.encode([seed; 32])
}

fn consensus_bytes(seed: u8) -> Vec<u8> {
    Sha256::digest([seed; 32])[..20].to_vec()
}

pub fn consensus_hex(seed: u8) -> String {
    hex::encode(consensus_bytes(seed))
}

/// Consensus address as it appears in block headers and commits
pub fn consensus_b64(seed: u8) -> String {
    STANDARD.encode(consensus_bytes(seed))
}

pub fn operator(seed: u8) -> String {
    address::encode("cosmosvaloper", &[seed; 20]).unwrap()
}

pub fn monitor(seed: u8, moniker: &str) -> MonitorObj {
    MonitorObj {
        moniker: moniker.to_string(),
        operator_addr: operator(seed),
        operator_addr_hex: consensus_hex(seed),
        self_stake_addr: String::new(),
    }
}

pub fn validator(seed: u8, moniker: &str, tokens: u64, jailed: bool) -> Validator {
    Validator {
        operator_address: operator(seed),
        consensus_pubkey: Some(PubKey {
            type_url: "/cosmos.crypto.ed25519.PubKey".into(),
            key: pubkey(seed),
        }),
        jailed,
        status: if jailed {
            "BOND_STATUS_UNBONDING".into()
        } else {
            BOND_STATUS_BONDED.into()
        },
        tokens: tokens.to_string(),
        description: Description {
            moniker: moniker.to_string(),
            ..Default::default()
        },
        commission: Commission {
            commission_rates: CommissionRates {
                rate: "0.050000000000000000".into(),
                max_rate: "0.200000000000000000".into(),
                max_change_rate: "0.010000000000000000".into(),
            },
        },
        min_self_delegation: "1".into(),
    }
}

/// Signature entry: `Some(seed)` names the signer, `None` leaves the address
/// empty as for absent validators
pub fn sig(commit: bool, signer: Option<u8>) -> CommitSig {
    let flag = if commit {
        "BLOCK_ID_FLAG_COMMIT"
    } else {
        "BLOCK_ID_FLAG_ABSENT"
    };
    CommitSig {
        block_id_flag: serde_json::Value::String(flag.into()),
        validator_address: signer.map(consensus_b64),
    }
}

/// Block at `height` proposed by `proposer`, carrying the commit for `height - 1`
pub fn block(height: i64, proposer: u8, signatures: Vec<CommitSig>) -> Block {
    Block {
        header: Header {
            height: height.to_string(),
            time: "2023-01-01T00:00:00Z".into(),
            proposer_address: consensus_b64(proposer),
        },
        last_commit: Some(Commit {
            height: (height - 1).to_string(),
            signatures,
        }),
    }
}

pub fn proposal(id: i64, description: &str) -> GovProposal {
    GovProposal {
        proposal_id: id.to_string(),
        content: Some(ProposalContent {
            title: format!("Proposal {}", id),
            description: description.to_string(),
        }),
        status: PROPOSAL_STATUS_VOTING_PERIOD.into(),
        voting_start_time: "2022-12-12T00:00:00Z".into(),
        voting_end_time: "2022-12-24T00:00:00Z".into(),
    }
}
