//! Record model: identities, sync status, and the synchronized unit itself

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device-local primary key, assigned on first local insert and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(i64);

impl LocalId {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity assigned by the remote system of record
///
/// Remote APIs hand these out as integers or strings; both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ServerId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ServerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => Ok(Self::from(value)),
            Raw::Text(value) if value.trim().is_empty() => {
                Err(serde::de::Error::custom("server id must not be empty"))
            }
            Raw::Text(value) => Ok(Self(value.trim().to_string())),
        }
    }
}

/// Reconciliation status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created locally, never pushed
    Pending,
    /// Modified locally after (or before completing) its first sync
    UpdatePending,
    /// Local state matches what the remote accepted
    Synced,
}

impl SyncStatus {
    /// Stored text form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UpdatePending => "update_pending",
            Self::Synced => "synced",
        }
    }

    /// Status after a local edit. A never-pushed record stays `Pending`.
    #[must_use]
    pub const fn escalate(self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::UpdatePending | Self::Synced => Self::UpdatePending,
        }
    }

    /// Whether the record still has to be pushed
    #[must_use]
    pub const fn is_unreconciled(self) -> bool {
        !matches!(self, Self::Synced)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "update_pending" => Ok(Self::UpdatePending),
            "synced" => Ok(Self::Synced),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// The unit of synchronization for entity type `T`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<T> {
    pub local_id: LocalId,
    pub server_id: Option<ServerId>,
    pub sync_status: SyncStatus,
    /// Idempotency key sent with the remote create; `None` for merged rows
    pub client_ref: Option<String>,
    pub fields: T,
    /// Last local mutation (Unix ms)
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_never_downgrades_pending() {
        assert_eq!(SyncStatus::Pending.escalate(), SyncStatus::Pending);
        assert_eq!(SyncStatus::Synced.escalate(), SyncStatus::UpdatePending);
        assert_eq!(
            SyncStatus::UpdatePending.escalate(),
            SyncStatus::UpdatePending
        );
    }

    #[test]
    fn status_text_form_parses_back() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::UpdatePending,
            SyncStatus::Synced,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::UpdatePending).unwrap(),
            "\"update_pending\""
        );
    }

    #[test]
    fn server_id_accepts_numbers_and_strings() {
        let numeric: ServerId = serde_json::from_str("42").unwrap();
        let text: ServerId = serde_json::from_str("\" ab-7 \"").unwrap();
        assert_eq!(numeric.as_str(), "42");
        assert_eq!(text.as_str(), "ab-7");
        assert!(serde_json::from_str::<ServerId>("\"  \"").is_err());
        assert!(serde_json::from_str::<ServerId>("null").is_err());
    }
}
