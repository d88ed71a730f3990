//! Typed exceptions built from filtered problem records
//!
//! Each `parse_*` constructor copies what it needs out of the caller's records
//! and returns `None` for empty input. A populated exception renders as its
//! name followed by one line per record, in input order.

use crate::types::{Proposal, ValIsActive, ValIsJail, ValRanking, ValSignMissed};

/// Uniform contract over the exception kinds
pub trait Event {
    fn name(&self) -> &'static str;

    /// Rendered alert text; empty when there are no records
    fn message(&self) -> String;

    fn is_empty(&self) -> bool;
}

/// Validator named in an exception
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorRecord {
    pub chain_name: String,
    pub block_height: i64,
    pub moniker: String,
}

/// Proposal named in a [`ProposalException`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalRecord {
    pub chain_name: String,
    pub proposal_id: i64,
    pub voting_start_time: String,
    pub voting_end_time: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValJailedException {
    validators: Vec<ValidatorRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValisActiveException {
    validators: Vec<ValidatorRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValisRankingException {
    validators: Vec<ValidatorRecord>,
}

/// Missed-signature exception; carries the threshold it was raised against
#[derive(Debug, Clone, PartialEq)]
pub struct SyncException {
    validators: Vec<ValidatorRecord>,
    proportion: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProposalException {
    proposals: Vec<ProposalRecord>,
}

fn render<T>(name: &str, records: &[T], line: impl Fn(&T) -> String) -> String {
    if records.is_empty() {
        return String::new();
    }
    let mut msg = name.to_string();
    for record in records {
        msg.push_str(&line(record));
    }
    msg
}

impl Event for ValJailedException {
    fn name(&self) -> &'static str {
        "Validator Jailed Exception\n"
    }

    fn message(&self) -> String {
        render(self.name(), &self.validators, |v| {
            format!("The {}' {} validator has been jailed\n", v.chain_name, v.moniker)
        })
    }

    fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Event for ValisActiveException {
    fn name(&self) -> &'static str {
        "Validator InActive Exception\n"
    }

    fn message(&self) -> String {
        render(self.name(), &self.validators, |v| {
            format!("The {}' {} validator is Inactive\n", v.chain_name, v.moniker)
        })
    }

    fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Event for SyncException {
    fn name(&self) -> &'static str {
        "Sync Exception \n"
    }

    fn message(&self) -> String {
        render(self.name(), &self.validators, |v| {
            format!(
                "The {}' {} validator has not signed for 5 consecutive blocks or the last 100 blocks without signature rate reaches {:.6} at block height of {}. \n",
                v.chain_name, v.moniker, self.proportion, v.block_height
            )
        })
    }

    fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Event for ValisRankingException {
    fn name(&self) -> &'static str {
        "Validator Ranking Exception\n"
    }

    fn message(&self) -> String {
        render(self.name(), &self.validators, |v| {
            format!(
                "The {}' {} validator ranking has exceeded the ranking threshold, please add a delegate in time\n",
                v.chain_name, v.moniker
            )
        })
    }

    fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Event for ProposalException {
    fn name(&self) -> &'static str {
        "proposal Exception \n"
    }

    fn message(&self) -> String {
        render(self.name(), &self.proposals, |p| {
            format!(
                "The {} has a new proposal\nThe proposal id is: {} \nThe voting start time is: {} \nThe acceptance time is: {} \nThe proposal content is: {} \n\n\n",
                p.chain_name, p.proposal_id, p.voting_start_time, p.voting_end_time, p.description
            )
        })
    }

    fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

/// Any exception kind
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    Jailed(ValJailedException),
    Inactive(ValisActiveException),
    Sync(SyncException),
    Ranking(ValisRankingException),
    Proposal(ProposalException),
}

impl Exception {
    fn as_event(&self) -> &dyn Event {
        match self {
            Exception::Jailed(e) => e,
            Exception::Inactive(e) => e,
            Exception::Sync(e) => e,
            Exception::Ranking(e) => e,
            Exception::Proposal(e) => e,
        }
    }
}

impl Event for Exception {
    fn name(&self) -> &'static str {
        self.as_event().name()
    }

    fn message(&self) -> String {
        self.as_event().message()
    }

    fn is_empty(&self) -> bool {
        self.as_event().is_empty()
    }
}

impl From<ValJailedException> for Exception {
    fn from(e: ValJailedException) -> Self {
        Exception::Jailed(e)
    }
}

impl From<ValisActiveException> for Exception {
    fn from(e: ValisActiveException) -> Self {
        Exception::Inactive(e)
    }
}

impl From<SyncException> for Exception {
    fn from(e: SyncException) -> Self {
        Exception::Sync(e)
    }
}

impl From<ValisRankingException> for Exception {
    fn from(e: ValisRankingException) -> Self {
        Exception::Ranking(e)
    }
}

impl From<ProposalException> for Exception {
    fn from(e: ProposalException) -> Self {
        Exception::Proposal(e)
    }
}

pub fn parse_val_jailed_exception(jailed: &[ValIsJail]) -> Option<ValJailedException> {
    if jailed.is_empty() {
        tracing::info!("No jailed validators to report");
        return None;
    }
    Some(ValJailedException {
        validators: jailed
            .iter()
            .map(|v| ValidatorRecord {
                chain_name: v.chain_name.clone(),
                block_height: v.block_height,
                moniker: v.moniker.clone(),
            })
            .collect(),
    })
}

pub fn parse_valis_active_exception(inactive: &[ValIsActive]) -> Option<ValisActiveException> {
    if inactive.is_empty() {
        tracing::info!("No inactive validators to report");
        return None;
    }
    Some(ValisActiveException {
        validators: inactive
            .iter()
            .map(|v| ValidatorRecord {
                chain_name: v.chain_name.clone(),
                block_height: v.block_height,
                moniker: v.moniker.clone(),
            })
            .collect(),
    })
}

/// `proportion` is the configured missed-signature rate the records breached
pub fn parse_sync_exception(missed: &[ValSignMissed], proportion: f64) -> Option<SyncException> {
    if missed.is_empty() {
        tracing::info!("No missed signatures to report");
        return None;
    }
    Some(SyncException {
        validators: missed
            .iter()
            .map(|m| ValidatorRecord {
                chain_name: m.chain_name.clone(),
                block_height: m.block_height,
                moniker: m.moniker.clone(),
            })
            .collect(),
        proportion,
    })
}

pub fn parse_valis_ranking_exception(rankings: &[ValRanking]) -> Option<ValisRankingException> {
    if rankings.is_empty() {
        tracing::info!("No ranking breaches to report");
        return None;
    }
    Some(ValisRankingException {
        validators: rankings
            .iter()
            .map(|r| ValidatorRecord {
                chain_name: r.chain_name.clone(),
                block_height: r.block_height,
                moniker: r.moniker.clone(),
            })
            .collect(),
    })
}

pub fn parse_proposal_exception(proposals: &[Proposal]) -> Option<ProposalException> {
    if proposals.is_empty() {
        tracing::info!("No new proposals to report");
        return None;
    }
    Some(ProposalException {
        proposals: proposals
            .iter()
            .map(|p| ProposalRecord {
                chain_name: p.chain_name.clone(),
                proposal_id: p.proposal_id,
                voting_start_time: p.voting_start_time.clone(),
                voting_end_time: p.voting_end_time.clone(),
                description: p.description.clone(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jailed(chain: &str, moniker: &str) -> ValIsJail {
        ValIsJail {
            chain_name: chain.into(),
            moniker: moniker.into(),
            operator_addr: "cosmosvaloper1x".into(),
            block_height: 0,
        }
    }

    #[test]
    fn test_empty_input_yields_none() {
        assert!(parse_val_jailed_exception(&[]).is_none());
        assert!(parse_valis_active_exception(&[]).is_none());
        assert!(parse_sync_exception(&[], 0.5).is_none());
        assert!(parse_valis_ranking_exception(&[]).is_none());
        assert!(parse_proposal_exception(&[]).is_none());
    }

    #[test]
    fn test_jailed_message() {
        let e = parse_val_jailed_exception(&[jailed("cosmos", "X")]).unwrap();
        assert!(!e.is_empty());
        assert_eq!(
            e.message(),
            "Validator Jailed Exception\nThe cosmos' X validator has been jailed\n"
        );
    }

    #[test]
    fn test_records_keep_input_order() {
        let e = parse_val_jailed_exception(&[jailed("cosmos", "B"), jailed("evmos", "A")]).unwrap();
        assert_eq!(
            e.message(),
            "Validator Jailed Exception\n\
             The cosmos' B validator has been jailed\n\
             The evmos' A validator has been jailed\n"
        );
    }

    #[test]
    fn test_inactive_message() {
        let e = parse_valis_active_exception(&[ValIsActive {
            chain_name: "evmos".into(),
            moniker: "Y".into(),
            operator_addr: "evmosvaloper1y".into(),
            block_height: 9,
        }])
        .unwrap();
        assert_eq!(
            e.message(),
            "Validator InActive Exception\nThe evmos' Y validator is Inactive\n"
        );
    }

    #[test]
    fn test_sync_message() {
        let e = parse_sync_exception(
            &[ValSignMissed {
                chain_name: "osmosis".into(),
                moniker: "Z".into(),
                operator_addr: "osmovaloper1z".into(),
                block_height: 12345,
            }],
            0.5,
        )
        .unwrap();
        assert_eq!(
            e.message(),
            "Sync Exception \nThe osmosis' Z validator has not signed for 5 consecutive blocks or the last 100 blocks without signature rate reaches 0.500000 at block height of 12345. \n"
        );
    }

    #[test]
    fn test_ranking_message() {
        let e = parse_valis_ranking_exception(&[ValRanking {
            chain_name: "cosmos".into(),
            moniker: "R".into(),
            operator_addr: "cosmosvaloper1r".into(),
            block_height: 3,
            ranking: 180,
        }])
        .unwrap();
        assert_eq!(
            e.message(),
            "Validator Ranking Exception\nThe cosmos' R validator ranking has exceeded the ranking threshold, please add a delegate in time\n"
        );
    }

    #[test]
    fn test_proposal_message() {
        let e = parse_proposal_exception(&[Proposal {
            chain_name: "cosmos".into(),
            proposal_id: 7,
            voting_start_time: "2022-12-12T00:00:00Z".into(),
            voting_end_time: "2022-12-24T00:00:00Z".into(),
            description: "upgrade".into(),
            moniker: "X".into(),
            operator_addr: "cosmosvaloper1x".into(),
            status: 0,
        }])
        .unwrap();
        assert_eq!(
            e.message(),
            "proposal Exception \nThe cosmos has a new proposal\nThe proposal id is: 7 \nThe voting start time is: 2022-12-12T00:00:00Z \nThe acceptance time is: 2022-12-24T00:00:00Z \nThe proposal content is: upgrade \n\n\n"
        );
    }

    #[test]
    fn test_exception_dispatch() {
        let e: Exception = parse_val_jailed_exception(&[jailed("cosmos", "X")])
            .unwrap()
            .into();
        assert_eq!(e.name(), "Validator Jailed Exception\n");
        assert!(e.message().ends_with("jailed\n"));
        assert!(!e.is_empty());
    }
}
