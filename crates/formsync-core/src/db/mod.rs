//! Database layer for formsync

mod batch;
mod connection;
mod logs;
mod migrations;
mod repository;

pub use batch::{run_batch, BatchFailure, BatchReport, Mutation};
pub use connection::{Database, SharedDatabase};
pub use logs::SyncLogRepository;
pub use repository::{LibSqlRecordRepository, RecordRepository, UpsertOutcome};
