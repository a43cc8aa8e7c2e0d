//! Coarse sync state reported to screens.

/// Outcome of the most recent reconciliation, as a screen would display it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Remote unreachable; local edits are queued.
    Offline,
    Syncing,
    /// Nothing left in the outbound queue.
    Synced,
    /// At least one record was rejected and needs user correction.
    Error,
}
