use super::{ChainCli, RpcError};
use crate::types::{MonitorObj, ProposalAssignment, ValSign, ValSignMissed};
use std::collections::HashMap;

/// Proposer, signed and missed records for one height
pub type Performance = (Vec<ProposalAssignment>, Vec<ValSign>, Vec<ValSignMissed>);

/// Bucket used by the signing tables
const CHILD_TABLES: i64 = 10;

impl ChainCli {
    /// Split monitors by what they did at `height`. The commit for `height`
    /// travels in block `height + 1`; monitors missing from it are outside the
    /// active set and appear in no list.
    pub async fn get_val_performance(
        &self,
        height: i64,
        monitors: &[MonitorObj],
    ) -> Result<Performance, RpcError> {
        let Some(block) = self.query.block(height).await? else {
            tracing::debug!(chain = %self.chain_name, height, "Block not available");
            return Ok(Performance::default());
        };
        let Some(next) = self.query.block(height + 1).await? else {
            tracing::debug!(chain = %self.chain_name, height = height + 1, "Commit block not available");
            return Ok(Performance::default());
        };

        let proposer = block.proposer_hex()?;
        let signatures = next.last_commit_signatures();

        // Absent votes carry no address; the commit follows validator-set order
        let needs_set = signatures
            .iter()
            .any(|s| s.validator_address.as_deref().map_or(true, str::is_empty));
        let set = if needs_set {
            self.query
                .validator_set(height)
                .await?
                .ok_or_else(|| RpcError::Unavailable(format!("validator set at height {}", height)))?
        } else {
            Vec::new()
        };

        let mut signers = HashMap::with_capacity(signatures.len());
        for (idx, sig) in signatures.iter().enumerate() {
            let addr = match sig.address_hex()? {
                Some(addr) => addr,
                None => match set.get(idx) {
                    Some(val) => val.consensus_hex()?,
                    None => continue,
                },
            };
            signers.insert(addr, sig.is_commit());
        }

        Ok(partition(&self.chain_name, height, &proposer, &signers, monitors))
    }
}

/// `signers` maps lowercase hex consensus addresses to whether the vote was a
/// commit.
fn partition(
    chain_name: &str,
    height: i64,
    proposer: &str,
    signers: &HashMap<String, bool>,
    monitors: &[MonitorObj],
) -> Performance {
    let mut out = Performance::default();

    for monitor in monitors {
        let addr = monitor.operator_addr_hex.to_ascii_lowercase();
        match signers.get(&addr) {
            None => continue,
            Some(false) => out.2.push(ValSignMissed {
                chain_name: chain_name.to_string(),
                moniker: monitor.moniker.clone(),
                operator_addr: monitor.operator_addr.clone(),
                block_height: height,
            }),
            Some(true) if addr.eq_ignore_ascii_case(proposer) => out.0.push(ProposalAssignment {
                moniker: monitor.moniker.clone(),
                operator_addr: monitor.operator_addr.clone(),
                block_height: height,
                child_table: height % CHILD_TABLES,
            }),
            Some(true) => out.1.push(ValSign {
                moniker: monitor.moniker.clone(),
                operator_addr: monitor.operator_addr.clone(),
                block_height: height,
                status: 1,
                double_sign: false,
                child_table: height % CHILD_TABLES,
            }),
        }
    }

    out
}
