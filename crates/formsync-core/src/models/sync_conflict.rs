//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Unsynced local edit that an inbound merge overwrote (server wins)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Entity type name
    pub entity: String,
    /// Local record that was overwritten
    pub local_id: i64,
    /// Remote identity of the incoming version
    pub server_id: String,
    /// Status the local row had before the overwrite
    pub discarded_status: String,
    /// Local payload that was replaced (JSON)
    pub discarded_fields: String,
    /// Incoming payload that replaced it (JSON)
    pub incoming_fields: String,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
