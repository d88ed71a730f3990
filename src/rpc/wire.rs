//! JSON shapes served by the node's gRPC gateway. Integers arrive as strings
//! and byte fields as base64, so accessors parse on demand.

use super::address;
use super::RpcError;
use crate::types;
use serde::Deserialize;

pub const BOND_STATUS_BONDED: &str = "BOND_STATUS_BONDED";
pub const PROPOSAL_STATUS_VOTING_PERIOD: &str = "PROPOSAL_STATUS_VOTING_PERIOD";
const BLOCK_ID_FLAG_COMMIT: &str = "BLOCK_ID_FLAG_COMMIT";
const BLOCK_ID_FLAG_COMMIT_CODE: i64 = 2;

fn parse_int<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, RpcError> {
    value
        .parse()
        .map_err(|_| RpcError::Decode(format!("{} is not an integer: '{}'", field, value)))
}

fn parse_dec(field: &str, value: &str) -> Result<f64, RpcError> {
    if value.is_empty() {
        return Ok(0.0);
    }
    value
        .parse()
        .map_err(|_| RpcError::Decode(format!("{} is not a decimal: '{}'", field, value)))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageResponse {
    #[serde(default)]
    pub next_key: Option<String>,
    #[serde(default)]
    pub total: Option<String>,
}

impl PageResponse {
    /// Continuation key, if another page follows
    pub fn next(&self) -> Option<&str> {
        self.next_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubKey {
    #[serde(rename = "@type", default)]
    pub type_url: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub moniker: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub security_contact: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommissionRates {
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub max_rate: String,
    #[serde(default)]
    pub max_change_rate: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commission {
    #[serde(default)]
    pub commission_rates: CommissionRates,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Validator {
    pub operator_address: String,
    #[serde(default)]
    pub consensus_pubkey: Option<PubKey>,
    #[serde(default)]
    pub jailed: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tokens: String,
    #[serde(default)]
    pub description: Description,
    #[serde(default)]
    pub commission: Commission,
    #[serde(default)]
    pub min_self_delegation: String,
}

impl Validator {
    pub fn status_code(&self) -> i32 {
        match self.status.as_str() {
            "BOND_STATUS_UNBONDED" => types::BOND_STATUS_UNBONDED,
            "BOND_STATUS_UNBONDING" => types::BOND_STATUS_UNBONDING,
            BOND_STATUS_BONDED => types::BOND_STATUS_BONDED,
            _ => types::BOND_STATUS_UNSPECIFIED,
        }
    }

    /// Bonded tokens; empty counts as zero
    pub fn token_amount(&self) -> Result<u128, RpcError> {
        if self.tokens.is_empty() {
            return Ok(0);
        }
        parse_int("tokens", &self.tokens)
    }

    /// Hex consensus address derived from the consensus public key
    pub fn consensus_hex(&self) -> Result<String, RpcError> {
        let pubkey = self.consensus_pubkey.as_ref().ok_or_else(|| {
            RpcError::Decode(format!("validator {} has no consensus key", self.operator_address))
        })?;
        address::consensus_hex(&pubkey.key).map_err(|e| RpcError::Decode(e.to_string()))
    }

    pub fn commission(&self) -> Result<(f64, f64, f64), RpcError> {
        let rates = &self.commission.commission_rates;
        Ok((
            parse_dec("rate", &rates.rate)?,
            parse_dec("max_rate", &rates.max_rate)?,
            parse_dec("max_change_rate", &rates.max_change_rate)?,
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorResponse {
    pub validator: Validator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorsResponse {
    #[serde(default)]
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub pagination: Option<PageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawAddressResponse {
    pub withdraw_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub height: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub proposer_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitSig {
    /// Either the enum name or its numeric code, depending on the gateway
    pub block_id_flag: serde_json::Value,
    #[serde(default)]
    pub validator_address: Option<String>,
}

impl CommitSig {
    pub fn is_commit(&self) -> bool {
        match &self.block_id_flag {
            serde_json::Value::String(s) => s == BLOCK_ID_FLAG_COMMIT,
            serde_json::Value::Number(n) => n.as_i64() == Some(BLOCK_ID_FLAG_COMMIT_CODE),
            _ => false,
        }
    }

    /// Hex signer address; absent votes carry no address
    pub fn address_hex(&self) -> Result<Option<String>, RpcError> {
        match self.validator_address.as_deref() {
            None | Some("") => Ok(None),
            Some(b64) => address::hex_from_base64(b64)
                .map(Some)
                .map_err(|e| RpcError::Decode(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub signatures: Vec<CommitSig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub header: Header,
    #[serde(default)]
    pub last_commit: Option<Commit>,
}

impl Block {
    pub fn height(&self) -> Result<i64, RpcError> {
        parse_int("header.height", &self.header.height)
    }

    pub fn proposer_hex(&self) -> Result<String, RpcError> {
        address::hex_from_base64(&self.header.proposer_address)
            .map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Signatures for the previous height
    pub fn last_commit_signatures(&self) -> &[CommitSig] {
        self.last_commit
            .as_ref()
            .map(|c| c.signatures.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResponse {
    pub block: Block,
}

/// Entry of the validator set at a height; order matches commit signatures
#[derive(Debug, Clone, Deserialize)]
pub struct SetValidator {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub pub_key: Option<PubKey>,
    #[serde(default)]
    pub voting_power: String,
}

impl SetValidator {
    pub fn consensus_hex(&self) -> Result<String, RpcError> {
        let pubkey = self
            .pub_key
            .as_ref()
            .ok_or_else(|| RpcError::Decode(format!("{} has no public key", self.address)))?;
        address::consensus_hex(&pubkey.key).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorSetResponse {
    #[serde(default)]
    pub validators: Vec<SetValidator>,
    #[serde(default)]
    pub pagination: Option<PageResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProposalContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GovProposal {
    pub proposal_id: String,
    #[serde(default)]
    pub content: Option<ProposalContent>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub voting_start_time: String,
    #[serde(default)]
    pub voting_end_time: String,
}

impl GovProposal {
    pub fn id(&self) -> Result<i64, RpcError> {
        parse_int("proposal_id", &self.proposal_id)
    }

    /// Proposal text, falling back to the title when the body is empty
    pub fn description(&self) -> String {
        match &self.content {
            Some(c) if !c.description.is_empty() => c.description.clone(),
            Some(c) => c.title.clone(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposalsResponse {
    #[serde(default)]
    pub proposals: Vec<GovProposal>,
    #[serde(default)]
    pub pagination: Option<PageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vote {
    #[serde(default)]
    pub proposal_id: String,
    #[serde(default)]
    pub voter: String,
    #[serde(default)]
    pub option: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoteResponse {
    pub vote: Vote,
}
