//! Node queries over the Cosmos-SDK gRPC services. Protobuf replies are
//! mapped onto the gateway shapes in [`super::wire`] so both transports feed
//! the same adapter code.

use super::wire::*;
use super::{ChainQuery, RpcError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat};
use cosmos_sdk_proto::cosmos::base::query::v1beta1 as query;
use cosmos_sdk_proto::cosmos::base::tendermint::v1beta1 as tendermint;
use cosmos_sdk_proto::cosmos::crypto::ed25519;
use cosmos_sdk_proto::cosmos::distribution::v1beta1 as distribution;
use cosmos_sdk_proto::cosmos::gov::v1beta1 as gov;
use cosmos_sdk_proto::cosmos::staking::v1beta1 as staking;
use prost::Message;
use std::time::Duration;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Status};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_LIMIT: u64 = 100;

/// SDK decimals travel over gRPC as integers scaled by 10^18
const LEGACY_DEC_PRECISION: usize = 18;

/// Client for a node's gRPC query services
#[derive(Debug, Clone)]
pub struct GrpcQueryClient {
    channel: Channel,
}

impl GrpcQueryClient {
    pub fn new(endpoint: &str) -> Result<Self, RpcError> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    /// The channel connects lazily; an unreachable node surfaces on the
    /// first query.
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, RpcError> {
        let invalid = |reason: String| {
            RpcError::Connection(format!("invalid endpoint '{}': {}", endpoint, reason))
        };

        let url = reqwest::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        let mut builder = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| invalid(e.to_string()))?
            .timeout(timeout)
            .connect_timeout(timeout);

        match url.scheme() {
            "http" => {}
            "https" => {
                builder = builder
                    .tls_config(ClientTlsConfig::new())
                    .map_err(|e| invalid(e.to_string()))?;
            }
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        }

        Ok(Self {
            channel: builder.connect_lazy(),
        })
    }

    fn staking(&self) -> staking::query_client::QueryClient<Channel> {
        staking::query_client::QueryClient::new(self.channel.clone())
    }

    fn distribution(&self) -> distribution::query_client::QueryClient<Channel> {
        distribution::query_client::QueryClient::new(self.channel.clone())
    }

    fn tendermint(&self) -> tendermint::service_client::ServiceClient<Channel> {
        tendermint::service_client::ServiceClient::new(self.channel.clone())
    }

    fn gov(&self) -> gov::query_client::QueryClient<Channel> {
        gov::query_client::QueryClient::new(self.channel.clone())
    }
}

#[async_trait]
impl ChainQuery for GrpcQueryClient {
    async fn validator(&self, operator_addr: &str) -> Result<Option<Validator>, RpcError> {
        let request = staking::QueryValidatorRequest {
            validator_addr: operator_addr.to_string(),
        };
        let Some(resp) = absent_or_err(self.staking().validator(request).await)? else {
            return Ok(None);
        };
        resp.validator.map(validator_from_proto).transpose()
    }

    async fn bonded_validators(&self) -> Result<Vec<Validator>, RpcError> {
        let mut client = self.staking();
        let mut validators = Vec::new();
        let mut key = Vec::new();

        loop {
            let request = staking::QueryValidatorsRequest {
                status: staking::BondStatus::Bonded.as_str_name().to_string(),
                pagination: Some(page_by_key(key)),
            };
            let resp = client
                .validators(request)
                .await
                .map_err(status_error)?
                .into_inner();

            for val in resp.validators {
                validators.push(validator_from_proto(val)?);
            }
            match next_key(resp.pagination) {
                Some(next) => key = next,
                None => break,
            }
        }

        Ok(validators)
    }

    async fn withdraw_address(&self, delegator_addr: &str) -> Result<Option<String>, RpcError> {
        let request = distribution::QueryDelegatorWithdrawAddressRequest {
            delegator_address: delegator_addr.to_string(),
        };
        let resp = absent_or_err(self.distribution().delegator_withdraw_address(request).await)?;
        Ok(resp
            .map(|r| r.withdraw_address)
            .filter(|addr| !addr.is_empty()))
    }

    async fn block(&self, height: i64) -> Result<Option<Block>, RpcError> {
        let request = tendermint::GetBlockByHeightRequest { height };
        let Some(resp) = absent_or_err(self.tendermint().get_block_by_height(request).await)? else {
            return Ok(None);
        };
        let Some(block) = resp.block else {
            return Ok(None);
        };

        let header = block.header.unwrap_or_default();
        let signatures: Vec<CommitSig> = block
            .last_commit
            .map(|c| c.signatures)
            .unwrap_or_default()
            .iter()
            .map(|s| commit_sig(s.block_id_flag, &s.validator_address))
            .collect();

        Ok(Some(wire_block(
            header.height,
            header.time.map(|t| (t.seconds, t.nanos)),
            &header.proposer_address,
            signatures,
        )))
    }

    async fn latest_block(&self) -> Result<Block, RpcError> {
        let resp = self
            .tendermint()
            .get_latest_block(tendermint::GetLatestBlockRequest {})
            .await
            .map_err(status_error)?
            .into_inner();
        let block = resp
            .block
            .ok_or_else(|| RpcError::Unavailable("latest block".into()))?;

        let header = block.header.unwrap_or_default();
        let signatures: Vec<CommitSig> = block
            .last_commit
            .map(|c| c.signatures)
            .unwrap_or_default()
            .iter()
            .map(|s| commit_sig(s.block_id_flag, &s.validator_address))
            .collect();

        Ok(wire_block(
            header.height,
            header.time.map(|t| (t.seconds, t.nanos)),
            &header.proposer_address,
            signatures,
        ))
    }

    async fn validator_set(&self, height: i64) -> Result<Option<Vec<SetValidator>>, RpcError> {
        let mut client = self.tendermint();
        let mut validators: Vec<SetValidator> = Vec::new();

        // The node pages this query by offset only
        loop {
            let request = tendermint::GetValidatorSetByHeightRequest {
                height,
                pagination: Some(query::PageRequest {
                    offset: validators.len() as u64,
                    limit: PAGE_LIMIT,
                    ..Default::default()
                }),
            };
            let Some(resp) = absent_or_err(client.get_validator_set_by_height(request).await)? else {
                return Ok(None);
            };

            let fetched = resp.validators.len();
            for val in resp.validators {
                validators.push(set_validator_from_proto(val)?);
            }

            let done = match resp.pagination.map(|p| p.total).filter(|&t| t > 0) {
                Some(total) => validators.len() as u64 >= total,
                None => (fetched as u64) < PAGE_LIMIT,
            };
            if done || fetched == 0 {
                break;
            }
        }

        Ok(Some(validators))
    }

    async fn voting_proposals(&self) -> Result<Vec<GovProposal>, RpcError> {
        let mut client = self.gov();
        let mut proposals = Vec::new();
        let mut key = Vec::new();

        loop {
            let request = gov::QueryProposalsRequest {
                proposal_status: gov::ProposalStatus::VotingPeriod as i32,
                pagination: Some(page_by_key(key)),
                ..Default::default()
            };
            let resp = client
                .proposals(request)
                .await
                .map_err(status_error)?
                .into_inner();

            for proposal in resp.proposals {
                proposals.push(proposal_from_proto(proposal)?);
            }
            match next_key(resp.pagination) {
                Some(next) => key = next,
                None => break,
            }
        }

        Ok(proposals)
    }

    async fn vote(&self, proposal_id: i64, voter: &str) -> Result<Option<Vote>, RpcError> {
        let request = gov::QueryVoteRequest {
            proposal_id: u64::try_from(proposal_id)
                .map_err(|_| RpcError::Decode(format!("negative proposal id {}", proposal_id)))?,
            voter: voter.to_string(),
        };
        let resp = absent_or_err(self.gov().vote(request).await)?;

        Ok(resp.and_then(|r| r.vote).map(|v| Vote {
            proposal_id: v.proposal_id.to_string(),
            option: v
                .options
                .first()
                .and_then(|o| gov::VoteOption::try_from(o.option).ok())
                .map(|o| o.as_str_name().to_string())
                .unwrap_or_default(),
            voter: v.voter,
        }))
    }
}

/// `NotFound` and `InvalidArgument` mean the object does not exist
fn absent_or_err<T>(result: Result<tonic::Response<T>, Status>) -> Result<Option<T>, RpcError> {
    match result {
        Ok(resp) => Ok(Some(resp.into_inner())),
        Err(status) if matches!(status.code(), Code::NotFound | Code::InvalidArgument) => Ok(None),
        Err(status) => Err(status_error(status)),
    }
}

fn status_error(status: Status) -> RpcError {
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded => {
            RpcError::Transport(status.message().to_string())
        }
        code => RpcError::Status {
            status: code as u16,
            message: status.message().to_string(),
        },
    }
}

fn page_by_key(key: Vec<u8>) -> query::PageRequest {
    query::PageRequest {
        key,
        limit: PAGE_LIMIT,
        ..Default::default()
    }
}

fn next_key(page: Option<query::PageResponse>) -> Option<Vec<u8>> {
    page.map(|p| p.next_key).filter(|k| !k.is_empty())
}

/// Insert the decimal point into an integer-encoded SDK decimal
fn legacy_dec(raw: &str) -> String {
    if raw.is_empty() || raw.contains('.') {
        return raw.to_string();
    }
    let digits = format!("{:0>width$}", raw, width = LEGACY_DEC_PRECISION + 1);
    let (int, frac) = digits.split_at(digits.len() - LEGACY_DEC_PRECISION);
    format!("{}.{}", int, frac)
}

fn rfc3339(seconds: i64, nanos: i32) -> String {
    DateTime::from_timestamp(seconds, nanos.max(0) as u32)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn pubkey_from_any(any: &prost_types::Any) -> Result<PubKey, RpcError> {
    let key = ed25519::PubKey::decode(any.value.as_slice())
        .map_err(|e| RpcError::Decode(format!("{}: {}", any.type_url, e)))?;
    Ok(PubKey {
        type_url: any.type_url.clone(),
        key: STANDARD.encode(key.key),
    })
}

fn commit_sig(block_id_flag: i32, validator_address: &[u8]) -> CommitSig {
    CommitSig {
        block_id_flag: serde_json::Value::from(block_id_flag),
        validator_address: (!validator_address.is_empty()).then(|| STANDARD.encode(validator_address)),
    }
}

fn wire_block(
    height: i64,
    time: Option<(i64, i32)>,
    proposer_address: &[u8],
    signatures: Vec<CommitSig>,
) -> Block {
    Block {
        header: Header {
            height: height.to_string(),
            time: time.map(|(s, n)| rfc3339(s, n)).unwrap_or_default(),
            proposer_address: STANDARD.encode(proposer_address),
        },
        last_commit: Some(Commit {
            height: (height - 1).to_string(),
            signatures,
        }),
    }
}

fn validator_from_proto(val: staking::Validator) -> Result<Validator, RpcError> {
    let consensus_pubkey = val.consensus_pubkey.as_ref().map(pubkey_from_any).transpose()?;
    let description = val.description.unwrap_or_default();
    let rates = val
        .commission
        .and_then(|c| c.commission_rates)
        .unwrap_or_default();

    Ok(Validator {
        operator_address: val.operator_address,
        consensus_pubkey,
        jailed: val.jailed,
        status: staking::BondStatus::try_from(val.status)
            .map(|s| s.as_str_name().to_string())
            .unwrap_or_default(),
        tokens: val.tokens,
        description: Description {
            moniker: description.moniker,
            identity: description.identity,
            website: description.website,
            security_contact: description.security_contact,
            details: description.details,
        },
        commission: Commission {
            commission_rates: CommissionRates {
                rate: legacy_dec(&rates.rate),
                max_rate: legacy_dec(&rates.max_rate),
                max_change_rate: legacy_dec(&rates.max_change_rate),
            },
        },
        min_self_delegation: val.min_self_delegation,
    })
}

fn set_validator_from_proto(val: tendermint::Validator) -> Result<SetValidator, RpcError> {
    Ok(SetValidator {
        pub_key: val.pub_key.as_ref().map(pubkey_from_any).transpose()?,
        address: val.address,
        voting_power: val.voting_power.to_string(),
    })
}

fn proposal_from_proto(proposal: gov::Proposal) -> Result<GovProposal, RpcError> {
    // Legacy content types all start with title and description
    let content = proposal
        .content
        .map(|any| {
            gov::TextProposal::decode(any.value.as_slice())
                .map(|text| ProposalContent {
                    title: text.title,
                    description: text.description,
                })
                .map_err(|e| RpcError::Decode(format!("{}: {}", any.type_url, e)))
        })
        .transpose()?;
    let timestamp = |ts: Option<prost_types::Timestamp>| {
        ts.map(|t| rfc3339(t.seconds, t.nanos)).unwrap_or_default()
    };

    Ok(GovProposal {
        proposal_id: proposal.proposal_id.to_string(),
        content,
        status: gov::ProposalStatus::try_from(proposal.status)
            .map(|s| s.as_str_name().to_string())
            .unwrap_or_default(),
        voting_start_time: timestamp(proposal.voting_start_time),
        voting_end_time: timestamp(proposal.voting_end_time),
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::consensus_hex;
    use super::*;
    use crate::types;

    fn ed25519_any(seed: u8) -> prost_types::Any {
        prost_types::Any {
            type_url: "/cosmos.crypto.ed25519.PubKey".into(),
            value: ed25519::PubKey { key: vec![seed; 32] }.encode_to_vec(),
        }
    }

    #[test]
    fn test_legacy_dec() {
        assert_eq!(legacy_dec("50000000000000000"), "0.050000000000000000");
        assert_eq!(legacy_dec("1000000000000000000"), "1.000000000000000000");
        assert_eq!(legacy_dec("0.25"), "0.25");
        assert_eq!(legacy_dec(""), "");
    }

    #[test]
    fn test_validator_from_proto() {
        let val = validator_from_proto(staking::Validator {
            operator_address: "cosmosvaloper1x".into(),
            consensus_pubkey: Some(ed25519_any(4)),
            status: staking::BondStatus::Bonded as i32,
            tokens: "42".into(),
            description: Some(staking::Description {
                moniker: "X".into(),
                ..Default::default()
            }),
            commission: Some(staking::Commission {
                commission_rates: Some(staking::CommissionRates {
                    rate: "50000000000000000".into(),
                    max_rate: "200000000000000000".into(),
                    max_change_rate: "10000000000000000".into(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(val.status_code(), types::BOND_STATUS_BONDED);
        assert_eq!(val.token_amount().unwrap(), 42);
        assert_eq!(val.consensus_hex().unwrap(), consensus_hex(4));
        assert_eq!(val.description.moniker, "X");
        assert_eq!(val.commission().unwrap(), (0.05, 0.2, 0.01));
    }

    #[test]
    fn test_set_validator_from_proto() {
        let val = set_validator_from_proto(tendermint::Validator {
            address: "cosmosvalcons1x".into(),
            pub_key: Some(ed25519_any(9)),
            voting_power: 10,
            proposer_priority: 0,
        })
        .unwrap();

        assert_eq!(val.consensus_hex().unwrap(), consensus_hex(9));
        assert_eq!(val.voting_power, "10");
    }

    #[test]
    fn test_proposal_from_proto() {
        let proposal = proposal_from_proto(gov::Proposal {
            proposal_id: 9,
            content: Some(prost_types::Any {
                type_url: "/cosmos.gov.v1beta1.TextProposal".into(),
                value: gov::TextProposal {
                    title: "Raise gas limit".into(),
                    description: String::new(),
                }
                .encode_to_vec(),
            }),
            status: gov::ProposalStatus::VotingPeriod as i32,
            voting_start_time: Some(prost_types::Timestamp {
                seconds: 1_670_803_200,
                nanos: 0,
            }),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(proposal.id().unwrap(), 9);
        assert_eq!(proposal.description(), "Raise gas limit");
        assert_eq!(proposal.status, PROPOSAL_STATUS_VOTING_PERIOD);
        assert_eq!(proposal.voting_start_time, "2022-12-12T00:00:00Z");
        assert_eq!(proposal.voting_end_time, "");
    }

    #[test]
    fn test_commit_sig_flags() {
        let signed = commit_sig(2, &[0x60, 0x87]);
        assert!(signed.is_commit());
        assert_eq!(signed.address_hex().unwrap().as_deref(), Some("6087"));

        let absent = commit_sig(1, &[]);
        assert!(!absent.is_commit());
        assert_eq!(absent.address_hex().unwrap(), None);

        let block = wire_block(12, Some((0, 0)), &[0x60], vec![signed]);
        assert_eq!(block.height().unwrap(), 12);
        assert_eq!(block.proposer_hex().unwrap(), "60");
        assert_eq!(block.last_commit_signatures().len(), 1);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(absent_or_err::<()>(Err(Status::not_found("no validator"))), Ok(None)));
        assert!(matches!(absent_or_err::<()>(Err(Status::invalid_argument("no vote"))), Ok(None)));
        assert!(matches!(
            absent_or_err::<()>(Err(Status::unavailable("connection refused"))),
            Err(RpcError::Transport(_))
        ));
        assert_eq!(
            absent_or_err::<()>(Err(Status::internal("store unavailable"))).unwrap_err(),
            RpcError::Status {
                status: 13,
                message: "store unavailable".into()
            }
        );
        assert!(matches!(
            absent_or_err(Ok(tonic::Response::new(7))),
            Ok(Some(7))
        ));
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            GrpcQueryClient::new("ftp://node:9090"),
            Err(RpcError::Connection(_))
        ));
        assert!(matches!(
            GrpcQueryClient::new("10.0.0.1:9090"),
            Err(RpcError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_query() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = GrpcQueryClient::with_timeout(&format!("http://{}", addr), Duration::from_secs(2))
            .unwrap();
        assert!(client.latest_block().await.is_err());
    }
}
