//! formsync-core - Offline-first synchronization engine
//!
//! This crate backs every entity type of a forms-driven field app with a local
//! record store, a remote REST client, and the flows that keep the two in
//! step: the local write path, merge-on-search, and the reconciliation pass.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use db::{Database, SharedDatabase};
pub use error::{Error, Result};
pub use models::{Entity, EntitySchema, LocalId, Record, ServerId, SyncStatus};
pub use remote::{HttpRemoteClient, RemoteClient, RemoteError};
pub use state::SyncState;
pub use sync::{RecordPage, ReconcileReport, RemoteRefresh, SyncEngine};
