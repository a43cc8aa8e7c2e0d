//! Sync rejection model

use serde::{Deserialize, Serialize};

/// A push the remote refused; the record stays queued until the user fixes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRejection {
    pub id: i64,
    pub entity: String,
    pub local_id: i64,
    /// HTTP status returned by the remote
    pub status: u16,
    pub message: String,
    /// Unix ms
    pub rejected_at: i64,
}
