//! Persistence layer: batched writes of monitor records into the relational
//! store, per-range statistics and the resume point.
//!
//! A [`DbCli`] is bound to one chain; every row it writes carries that chain's
//! name, so several clients can share one [`StorageEngine`].

pub mod schema;
mod stats;

pub use stats::{CountStats, UptimeStats};

use crate::data::{Row, Value, WriteMode};
use crate::query::{run_query, QueryError, QueryResult};
use crate::storage::{StorageEngine, StorageError};
use crate::types::{Proposal, ProposalAssignment, ValInfo, ValSign, ValSignMissed};
use schema::*;
use std::sync::Arc;

/// Per-chain handle onto the monitor store
#[derive(Clone)]
pub struct DbCli {
    chain_name: String,
    engine: Arc<StorageEngine>,
}

impl DbCli {
    /// Bind to a chain, creating any missing tables
    pub fn new(chain_name: impl Into<String>, engine: Arc<StorageEngine>) -> Result<Self, DbError> {
        for schema in all_schemas() {
            let table = schema.name.clone();
            engine
                .ensure_table(schema)
                .map_err(|source| DbError::Storage {
                    context: format!("create table {}", table),
                    source,
                })?;
        }

        Ok(Self {
            chain_name: chain_name.into(),
            engine,
        })
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Upsert the latest snapshot of each validator
    pub fn batch_save_val_info(&self, vals: &[ValInfo]) -> Result<usize, DbError> {
        let rows = vals.iter().map(|v| val_info_row(&self.chain_name, v)).collect();
        self.upsert("batch save validator info", VALIDATOR_INFO, rows)
    }

    /// Append signed-block records; one duplicate (validator, height) rejects the batch
    pub fn batch_save_val_sign(&self, signs: &[ValSign]) -> Result<usize, DbError> {
        let rows = signs.iter().map(|s| val_sign_row(&self.chain_name, s)).collect();
        self.insert("batch save validator sign", VAL_SIGN, rows)
    }

    /// Append missed-block records
    pub fn batch_save_val_sign_missed(&self, missed: &[ValSignMissed]) -> Result<usize, DbError> {
        let rows = missed
            .iter()
            .map(|m| val_sign_missed_row(&self.chain_name, m))
            .collect();
        self.insert("batch save validator sign missed", VAL_SIGN_MISSED, rows)
    }

    /// Append block-proposer records
    pub fn batch_save_proposal_assignments(
        &self,
        assignments: &[ProposalAssignment],
    ) -> Result<usize, DbError> {
        let rows = assignments
            .iter()
            .map(|a| proposal_assignment_row(&self.chain_name, a))
            .collect();
        self.insert("batch save proposal assignments", PROPOSAL_ASSIGNMENT, rows)
    }

    /// Upsert proposals keyed by (chain, proposal id, monitor)
    pub fn batch_save_proposals(&self, proposals: &[Proposal]) -> Result<usize, DbError> {
        let rows = proposals
            .iter()
            .map(|p| proposal_row(&self.chain_name, p))
            .collect();
        self.upsert("batch save proposals", PROPOSAL, rows)
    }

    /// Store one synced range as a unit: proposer, signed and missed records
    /// together with the checkpoint at `height`. A failure leaves every table
    /// untouched, so the range is fetched again from the old resume point.
    pub fn save_block_records(
        &self,
        assignments: &[ProposalAssignment],
        signs: &[ValSign],
        missed: &[ValSignMissed],
        height: i64,
    ) -> Result<usize, DbError> {
        let chain = self.chain_name.as_str();
        let checkpoint = row([
            ("chain_name", chain.into()),
            ("block_height", height.into()),
            ("updated_at", now_ms()),
        ]);

        let batches = vec![
            (
                PROPOSAL_ASSIGNMENT,
                assignments.iter().map(|a| proposal_assignment_row(chain, a)).collect(),
                WriteMode::Insert,
            ),
            (
                VAL_SIGN,
                signs.iter().map(|s| val_sign_row(chain, s)).collect(),
                WriteMode::Insert,
            ),
            (
                VAL_SIGN_MISSED,
                missed.iter().map(|m| val_sign_missed_row(chain, m)).collect(),
                WriteMode::Insert,
            ),
            (SYNC_HEIGHT, vec![checkpoint], WriteMode::Upsert),
        ];

        let written = self
            .engine
            .write_batches(batches)
            .map_err(|source| self.storage_error("save block records", source))?;
        tracing::debug!(chain = %self.chain_name, height, rows = written, "Block records stored");
        Ok(written)
    }

    /// Highest block height persisted for `chain_name`, or 0 when nothing is stored
    pub fn get_block_height_from_db(&self, chain_name: &str) -> Result<i64, DbError> {
        let chain = Value::from(chain_name).to_sql_literal();
        let mut height = 0;

        for table in HEIGHT_TABLES {
            let sql = format!(
                "SELECT MAX(block_height) AS height FROM {} WHERE chain_name = {}",
                table, chain
            );
            let result = self.query("get block height", &sql)?;
            if let Some(h) = result.value(0, "height").and_then(Value::as_i64) {
                height = height.max(h);
            }
        }

        tracing::debug!(chain = chain_name, height, "Resume height loaded");
        Ok(height)
    }

    /// Heights in `[from, to]` at which the validator missed, ascending
    pub fn get_missed_heights(
        &self,
        operator_addr: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<i64>, DbError> {
        let sql = format!(
            "SELECT block_height FROM {} WHERE chain_name = {} AND operator_addr = {} \
             AND block_height BETWEEN {} AND {} ORDER BY block_height",
            VAL_SIGN_MISSED,
            self.chain_literal(),
            Value::from(operator_addr).to_sql_literal(),
            from,
            to
        );
        let result = self.query("get missed heights", &sql)?;

        Ok(result.rows.iter().filter_map(|r| r[0].as_i64()).collect())
    }

    /// Whether a proposal row exists for this monitor
    pub fn proposal_exists(&self, proposal_id: i64, operator_addr: &str) -> bool {
        self.engine
            .get_table(PROPOSAL)
            .and_then(|t| {
                t.get(&[
                    Value::from(self.chain_name.as_str()),
                    Value::Int64(proposal_id),
                    Value::from(operator_addr),
                ])
            })
            .is_some()
    }

    fn chain_literal(&self) -> String {
        Value::from(self.chain_name.as_str()).to_sql_literal()
    }

    fn insert(&self, context: &str, table: &str, rows: Vec<Row>) -> Result<usize, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = self
            .engine
            .insert_batch(table, rows)
            .map_err(|source| self.storage_error(context, source))?;
        tracing::debug!(chain = %self.chain_name, table, rows = written, "Rows inserted");
        Ok(written)
    }

    fn upsert(&self, context: &str, table: &str, rows: Vec<Row>) -> Result<usize, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = self
            .engine
            .upsert_batch(table, rows)
            .map_err(|source| self.storage_error(context, source))?;
        tracing::debug!(chain = %self.chain_name, table, rows = written, "Rows upserted");
        Ok(written)
    }

    fn query(&self, context: &str, sql: &str) -> Result<QueryResult, DbError> {
        run_query(&self.engine, sql).map_err(|source| DbError::Query {
            context: format!("{} for {}", context, self.chain_name),
            source,
        })
    }

    fn storage_error(&self, context: &str, source: StorageError) -> DbError {
        DbError::Storage {
            context: format!("{} for {}", context, self.chain_name),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("{context}: {source}")]
    Query {
        context: String,
        #[source]
        source: QueryError,
    },
}
