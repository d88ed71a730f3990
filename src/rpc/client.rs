use super::wire::*;
use super::{ChainQuery, RpcError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const VALIDATORS_PAGE: usize = 200;
const VALIDATOR_SET_PAGE: usize = 100;
const PROPOSALS_PAGE: usize = 100;

/// Client for a node's gRPC-gateway REST endpoints
#[derive(Debug, Clone)]
pub struct RestQueryClient {
    http_client: reqwest::Client,
    base_url: String,
}

/// Error body returned by the gateway
#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
}

impl RestQueryClient {
    pub fn new(endpoint: &str) -> Result<Self, RpcError> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, RpcError> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| RpcError::Connection(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RpcError::Connection(format!(
                "unsupported scheme in '{}'",
                endpoint
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// GET a gateway path; 400/404 mean the object does not exist
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, RpcError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GatewayError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(RpcError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| RpcError::Decode(format!("{}: {}", path, e)))
    }

    /// GET a path that must exist
    async fn get_required<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RpcError> {
        self.get(path, query).await?.ok_or_else(|| RpcError::Status {
            status: StatusCode::NOT_FOUND.as_u16(),
            message: format!("{} not found", path),
        })
    }
}

#[async_trait]
impl ChainQuery for RestQueryClient {
    async fn validator(&self, operator_addr: &str) -> Result<Option<Validator>, RpcError> {
        let path = format!("/cosmos/staking/v1beta1/validators/{}", operator_addr);
        let resp: Option<ValidatorResponse> = self.get(&path, &[]).await?;
        Ok(resp.map(|r| r.validator))
    }

    async fn bonded_validators(&self) -> Result<Vec<Validator>, RpcError> {
        let mut validators = Vec::new();
        let mut key: Option<String> = None;

        loop {
            let mut query = vec![
                ("status", BOND_STATUS_BONDED.to_string()),
                ("pagination.limit", VALIDATORS_PAGE.to_string()),
            ];
            if let Some(k) = key.take() {
                query.push(("pagination.key", k));
            }

            let page: ValidatorsResponse = self
                .get_required("/cosmos/staking/v1beta1/validators", &query)
                .await?;
            validators.extend(page.validators);

            match page.pagination.as_ref().and_then(PageResponse::next) {
                Some(next) => key = Some(next.to_string()),
                None => break,
            }
        }

        Ok(validators)
    }

    async fn withdraw_address(&self, delegator_addr: &str) -> Result<Option<String>, RpcError> {
        let path = format!(
            "/cosmos/distribution/v1beta1/delegators/{}/withdraw_address",
            delegator_addr
        );
        let resp: Option<WithdrawAddressResponse> = self.get(&path, &[]).await?;
        Ok(resp
            .map(|r| r.withdraw_address)
            .filter(|addr| !addr.is_empty()))
    }

    async fn block(&self, height: i64) -> Result<Option<Block>, RpcError> {
        let path = format!("/cosmos/base/tendermint/v1beta1/blocks/{}", height);
        let resp: Option<BlockResponse> = self.get(&path, &[]).await?;
        Ok(resp.map(|r| r.block))
    }

    async fn latest_block(&self) -> Result<Block, RpcError> {
        let resp: BlockResponse = self
            .get_required("/cosmos/base/tendermint/v1beta1/blocks/latest", &[])
            .await?;
        Ok(resp.block)
    }

    async fn validator_set(&self, height: i64) -> Result<Option<Vec<SetValidator>>, RpcError> {
        let path = format!("/cosmos/base/tendermint/v1beta1/validatorsets/{}", height);
        let mut validators: Vec<SetValidator> = Vec::new();

        loop {
            let query = [
                ("pagination.offset", validators.len().to_string()),
                ("pagination.limit", VALIDATOR_SET_PAGE.to_string()),
            ];
            let Some(page) = self.get::<ValidatorSetResponse>(&path, &query).await? else {
                return Ok(None);
            };

            let fetched = page.validators.len();
            validators.extend(page.validators);

            let total = page
                .pagination
                .as_ref()
                .and_then(|p| p.total.as_deref())
                .and_then(|t| t.parse::<usize>().ok());
            let done = match total {
                Some(total) => validators.len() >= total,
                None => fetched < VALIDATOR_SET_PAGE,
            };
            if done || fetched == 0 {
                break;
            }
        }

        Ok(Some(validators))
    }

    async fn voting_proposals(&self) -> Result<Vec<GovProposal>, RpcError> {
        let mut proposals = Vec::new();
        let mut key: Option<String> = None;

        loop {
            let mut query = vec![
                ("proposal_status", PROPOSAL_STATUS_VOTING_PERIOD.to_string()),
                ("pagination.limit", PROPOSALS_PAGE.to_string()),
            ];
            if let Some(k) = key.take() {
                query.push(("pagination.key", k));
            }

            let page: ProposalsResponse = self
                .get_required("/cosmos/gov/v1beta1/proposals", &query)
                .await?;
            proposals.extend(page.proposals);

            match page.pagination.as_ref().and_then(PageResponse::next) {
                Some(next) => key = Some(next.to_string()),
                None => break,
            }
        }

        Ok(proposals)
    }

    async fn vote(&self, proposal_id: i64, voter: &str) -> Result<Option<Vote>, RpcError> {
        let path = format!("/cosmos/gov/v1beta1/proposals/{}/votes/{}", proposal_id, voter);
        let resp: Option<VoteResponse> = self.get(&path, &[]).await?;
        Ok(resp.map(|r| r.vote))
    }
}
