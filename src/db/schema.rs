//! Table layouts for the monitor store and conversions from domain records

use crate::data::{ColumnDef, DataType, Row, TableSchema, Value};
use crate::types::{Proposal, ProposalAssignment, ValInfo, ValSign, ValSignMissed};

pub const VALIDATOR_INFO: &str = "validator_info";
pub const VAL_SIGN: &str = "val_sign";
pub const VAL_SIGN_MISSED: &str = "val_sign_missed";
pub const PROPOSAL_ASSIGNMENT: &str = "proposal_assignment";
pub const PROPOSAL: &str = "proposal";
pub const MISSED_SIGN_NUM: &str = "missed_sign_num";
pub const SIGN_NUM: &str = "sign_num";
pub const PROPOSALS_NUM: &str = "proposals_num";
pub const UPTIME: &str = "uptime";
pub const SYNC_HEIGHT: &str = "sync_height";

/// Tables whose rows carry a block height, scanned for the resume point
pub const HEIGHT_TABLES: [&str; 4] = [VAL_SIGN, VAL_SIGN_MISSED, PROPOSAL_ASSIGNMENT, SYNC_HEIGHT];

fn string(name: &str) -> ColumnDef {
    ColumnDef::new(name, DataType::String)
}

fn int(name: &str) -> ColumnDef {
    ColumnDef::new(name, DataType::Int64)
}

fn float(name: &str) -> ColumnDef {
    ColumnDef::new(name, DataType::Float64)
}

fn boolean(name: &str) -> ColumnDef {
    ColumnDef::new(name, DataType::Bool)
}

/// Every table the persistence layer writes to
pub fn all_schemas() -> Vec<TableSchema> {
    let mut schemas = vec![
        TableSchema::new(VALIDATOR_INFO)
            .with_column(string("chain_name"))
            .with_column(string("operator_addr"))
            .with_column(string("moniker"))
            .with_column(string("operator_addr_hex"))
            .with_column(string("self_stake_addr"))
            .with_column(string("reward_addr"))
            .with_column(boolean("jailed"))
            .with_column(int("status"))
            .with_column(string("voting_power"))
            .with_column(string("identity"))
            .with_column(string("website"))
            .with_column(string("details"))
            .with_column(string("security_contact"))
            .with_column(float("commission_rates"))
            .with_column(float("max_rate"))
            .with_column(float("max_change_rate"))
            .with_column(string("min_self_delegation"))
            .with_column(int("updated_at"))
            .with_primary_key(&["chain_name", "operator_addr"]),
        TableSchema::new(VAL_SIGN)
            .with_column(string("chain_name"))
            .with_column(string("operator_addr"))
            .with_column(int("block_height"))
            .with_column(string("moniker"))
            .with_column(int("status"))
            .with_column(boolean("double_sign"))
            .with_column(int("child_table"))
            .with_primary_key(&["chain_name", "operator_addr", "block_height"]),
        TableSchema::new(VAL_SIGN_MISSED)
            .with_column(string("chain_name"))
            .with_column(string("operator_addr"))
            .with_column(int("block_height"))
            .with_column(string("moniker"))
            .with_primary_key(&["chain_name", "operator_addr", "block_height"]),
        TableSchema::new(PROPOSAL_ASSIGNMENT)
            .with_column(string("chain_name"))
            .with_column(string("operator_addr"))
            .with_column(int("block_height"))
            .with_column(string("moniker"))
            .with_column(int("child_table"))
            .with_primary_key(&["chain_name", "operator_addr", "block_height"]),
        TableSchema::new(PROPOSAL)
            .with_column(string("chain_name"))
            .with_column(int("proposal_id"))
            .with_column(string("operator_addr"))
            .with_column(string("voting_start_time"))
            .with_column(string("voting_end_time"))
            .with_column(string("description"))
            .with_column(string("moniker"))
            .with_column(int("status"))
            .with_primary_key(&["chain_name", "proposal_id", "operator_addr"]),
        TableSchema::new(SYNC_HEIGHT)
            .with_column(string("chain_name"))
            .with_column(int("block_height"))
            .with_column(int("updated_at"))
            .with_primary_key(&["chain_name"]),
    ];

    for (table, value_column) in [
        (MISSED_SIGN_NUM, int(MISSED_SIGN_NUM)),
        (SIGN_NUM, int(SIGN_NUM)),
        (PROPOSALS_NUM, int(PROPOSALS_NUM)),
        (UPTIME, float(UPTIME).nullable()),
    ] {
        schemas.push(stats_schema(table, value_column));
    }

    schemas
}

/// Aggregate tables share one layout: key, computed range, one value column
/// named after the table.
fn stats_schema(table: &str, value_column: ColumnDef) -> TableSchema {
    TableSchema::new(table)
        .with_column(string("chain_name"))
        .with_column(string("operator_addr"))
        .with_column(int("from_height"))
        .with_column(int("to_height"))
        .with_column(value_column)
        .with_column(int("updated_at"))
        .with_primary_key(&["chain_name", "operator_addr"])
}

pub(crate) fn row<const N: usize>(cells: [(&str, Value); N]) -> Row {
    cells
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

pub(crate) fn now_ms() -> Value {
    Value::Int64(chrono::Utc::now().timestamp_millis())
}

pub(crate) fn val_info_row(chain: &str, val: &ValInfo) -> Row {
    row([
        ("chain_name", chain.into()),
        ("operator_addr", val.operator_addr.clone().into()),
        ("moniker", val.moniker.clone().into()),
        ("operator_addr_hex", val.operator_addr_hex.clone().into()),
        ("self_stake_addr", val.self_stake_addr.clone().into()),
        ("reward_addr", val.reward_addr.clone().into()),
        ("jailed", val.jailed.into()),
        ("status", val.status.into()),
        ("voting_power", val.voting_power.clone().into()),
        ("identity", val.identity.clone().into()),
        ("website", val.website.clone().into()),
        ("details", val.details.clone().into()),
        ("security_contact", val.security_contact.clone().into()),
        ("commission_rates", val.commission_rates.into()),
        ("max_rate", val.max_rate.into()),
        ("max_change_rate", val.max_change_rate.into()),
        ("min_self_delegation", val.min_self_delegation.clone().into()),
        ("updated_at", now_ms()),
    ])
}

pub(crate) fn val_sign_row(chain: &str, sign: &ValSign) -> Row {
    row([
        ("chain_name", chain.into()),
        ("operator_addr", sign.operator_addr.clone().into()),
        ("block_height", sign.block_height.into()),
        ("moniker", sign.moniker.clone().into()),
        ("status", sign.status.into()),
        ("double_sign", sign.double_sign.into()),
        ("child_table", sign.child_table.into()),
    ])
}

pub(crate) fn val_sign_missed_row(chain: &str, missed: &ValSignMissed) -> Row {
    row([
        ("chain_name", chain.into()),
        ("operator_addr", missed.operator_addr.clone().into()),
        ("block_height", missed.block_height.into()),
        ("moniker", missed.moniker.clone().into()),
    ])
}

pub(crate) fn proposal_assignment_row(chain: &str, assignment: &ProposalAssignment) -> Row {
    row([
        ("chain_name", chain.into()),
        ("operator_addr", assignment.operator_addr.clone().into()),
        ("block_height", assignment.block_height.into()),
        ("moniker", assignment.moniker.clone().into()),
        ("child_table", assignment.child_table.into()),
    ])
}

pub(crate) fn proposal_row(chain: &str, proposal: &Proposal) -> Row {
    row([
        ("chain_name", chain.into()),
        ("proposal_id", proposal.proposal_id.into()),
        ("operator_addr", proposal.operator_addr.clone().into()),
        ("voting_start_time", proposal.voting_start_time.clone().into()),
        ("voting_end_time", proposal.voting_end_time.clone().into()),
        ("description", proposal.description.clone().into()),
        ("moniker", proposal.moniker.clone().into()),
        ("status", proposal.status.into()),
    ])
}
