//! Sync engine: local write path, merge-on-search and reconciliation.
//!
//! One `SyncEngine` serves one entity type. All store access goes through the
//! shared database lock, which is released before any remote call.

mod merge;
mod reconcile;
mod write;


pub use merge::{RecordPage, RemoteRefresh};
pub use reconcile::ReconcileReport;

use std::marker::PhantomData;

use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::db::{LibSqlRecordRepository, RecordRepository, SharedDatabase, SyncLogRepository};
use crate::error::Result;
use crate::models::{Entity, SyncConflict, SyncRejection};
use crate::remote::RemoteClient;
use crate::state::SyncState;

/// Offline-first synchronization for entity type `T` against remote `R`
pub struct SyncEngine<T, R> {
    db: SharedDatabase,
    remote: R,
    config: SyncConfig,
    /// Held for the duration of a reconciliation pass
    reconcile_lock: Mutex<()>,
    last_state: Mutex<Option<SyncState>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, R: RemoteClient<T>> SyncEngine<T, R> {
    /// Create an engine, making sure the entity's table exists.
    pub async fn new(db: SharedDatabase, remote: R, config: SyncConfig) -> Result<Self> {
        db.lock().await.ensure_entity_table(&T::SCHEMA).await?;
        tracing::debug!(entity = T::SCHEMA.name, "Sync engine ready");

        Ok(Self {
            db,
            remote,
            config,
            reconcile_lock: Mutex::new(()),
            last_state: Mutex::new(None),
            _entity: PhantomData,
        })
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Coarse state for display.
    ///
    /// `Syncing` while a pass is running; otherwise the outcome of the last
    /// pass. Before any pass, `Synced` if nothing is queued and `Offline` if
    /// local edits are waiting.
    pub async fn sync_state(&self) -> Result<SyncState> {
        if self.reconcile_lock.try_lock().is_err() {
            return Ok(SyncState::Syncing);
        }
        if let Some(state) = *self.last_state.lock().await {
            return Ok(state);
        }

        let db = self.db.lock().await;
        let queued = LibSqlRecordRepository::<T>::new(db.connection())
            .pending()
            .await?;
        Ok(if queued.is_empty() {
            SyncState::Synced
        } else {
            SyncState::Offline
        })
    }

    /// Inbound merges that replaced unsynced edits of this entity type
    pub async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        SyncLogRepository::new(db.connection())
            .list_conflicts(Some(T::SCHEMA.name), limit)
            .await
    }

    /// Records whose last push was refused and that still need correcting
    pub async fn rejections(&self) -> Result<Vec<SyncRejection>> {
        let db = self.db.lock().await;
        SyncLogRepository::new(db.connection())
            .list_rejections(T::SCHEMA.name)
            .await
    }
}
