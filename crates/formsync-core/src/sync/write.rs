//! Local write path. Never touches the network.

use crate::db::{LibSqlRecordRepository, RecordRepository};
use crate::error::Result;
use crate::models::{Entity, LocalId, Record, SyncStatus};
use crate::remote::RemoteClient;

use super::SyncEngine;

impl<T: Entity, R: RemoteClient<T>> SyncEngine<T, R> {
    /// Store a new record as `pending`.
    pub async fn create(&self, fields: T) -> Result<Record<T>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::<T>::new(db.connection());
        let local_id = repo.insert(&fields, SyncStatus::Pending).await?;
        tracing::info!(entity = T::SCHEMA.name, %local_id, "Created record locally");
        repo.get_by_local_id(local_id).await
    }

    /// Replace a record's fields and queue it for the next push.
    ///
    /// A synced record becomes `update_pending`; a record that was never
    /// pushed stays `pending` so it is still created remotely.
    pub async fn update(&self, local_id: LocalId, fields: T) -> Result<Record<T>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::<T>::new(db.connection());
        let status = repo.get_by_local_id(local_id).await?.sync_status.escalate();
        let record = repo.update(local_id, &fields, status).await?;
        tracing::info!(entity = T::SCHEMA.name, %local_id, %status, "Updated record locally");
        Ok(record)
    }

    pub async fn get(&self, local_id: LocalId) -> Result<Record<T>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::<T>::new(db.connection())
            .get_by_local_id(local_id)
            .await
    }
}
