//! Valmon: Cosmos validator monitor
//!
//! Polls validator state, block signatures and governance proposals from
//! Cosmos-SDK nodes, stores them in an in-memory relational store with
//! snapshot persistence, and raises alerts when monitored validators are
//! jailed, drop out of the active set, fall in the ranking, stop signing or
//! have a new proposal to vote on.
//!
//! # Pipeline
//!
//! - **rpc**: gRPC (or REST gateway) client producing monitor records
//! - **db**: batched writes, per-range statistics and the resume point
//! - **alerts**: typed exceptions, rendered text and delivery
//! - **monitor**: the poll cycle and its interval driver
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use valmon::db::DbCli;
//! use valmon::monitor::ChainMonitor;
//! use valmon::rpc::ChainCli;
//! use valmon::storage::StorageEngine;
//! use valmon::types::MonitorObj;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(StorageEngine::new());
//! let cli = ChainCli::connect("cosmos", "http://127.0.0.1:9090")?;
//! let db = DbCli::new("cosmos", engine)?;
//! let watch = vec![MonitorObj::new("my-validator", "cosmosvaloper1...")];
//!
//! let mut monitor = ChainMonitor::new(cli, db, watch);
//! let report = monitor.run_cycle().await?;
//! println!("processed {:?}", report.processed);
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod config;
pub mod data;
pub mod db;
pub mod monitor;
pub mod query;
pub mod rpc;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use data::{DataType, Table, Value};
pub use query::{run_query, QueryError, QueryResult};
pub use storage::{StorageEngine, StorageError};
