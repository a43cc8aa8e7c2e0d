//! Reconciliation pass: push queued local records to the remote.

use crate::db::{LibSqlRecordRepository, RecordRepository, SyncLogRepository};
use crate::error::Result;
use crate::models::{Entity, LocalId, Record, ServerId, SyncRejection, SyncStatus};
use crate::remote::{RemoteClient, RemoteError};
use crate::state::SyncState;

use super::SyncEngine;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pushed and now synced
    pub synced: Vec<LocalId>,
    /// Pushed, but edited again while the push was in flight; still queued
    pub requeued: Vec<LocalId>,
    /// Remote unreachable; left untouched for the next pass
    pub deferred: Vec<LocalId>,
    /// Refused by the remote; need user correction
    pub rejected: Vec<SyncRejection>,
}

impl ReconcileReport {
    pub fn attempted(&self) -> usize {
        self.synced.len() + self.requeued.len() + self.deferred.len() + self.rejected.len()
    }

    pub fn state(&self) -> SyncState {
        if !self.rejected.is_empty() {
            SyncState::Error
        } else if !self.deferred.is_empty() {
            SyncState::Offline
        } else {
            SyncState::Synced
        }
    }
}

impl<T: Entity, R: RemoteClient<T>> SyncEngine<T, R> {
    /// Push every `pending` and `update_pending` record.
    ///
    /// Each record is pushed on its own. Transient failures leave the record
    /// queued; rejections keep its status and are logged for the caller.
    /// Only local storage failures abort the pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _pass = self.reconcile_lock.lock().await;

        let queued = {
            let db = self.db.lock().await;
            LibSqlRecordRepository::<T>::new(db.connection())
                .pending()
                .await?
        };

        let mut report = ReconcileReport::default();
        for record in queued {
            let local_id = record.local_id;
            match self.remote.push(&record).await {
                Ok(remote) => {
                    let server_id = record.server_id.clone().unwrap_or(remote.server_id);
                    match self.complete_push(&record, &server_id).await? {
                        SyncStatus::Synced => report.synced.push(local_id),
                        _ => report.requeued.push(local_id),
                    }
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(
                        entity = T::SCHEMA.name,
                        %local_id,
                        %error,
                        "Push deferred; remote unavailable"
                    );
                    report.deferred.push(local_id);
                }
                Err(error) => {
                    let rejection = self.log_rejection(local_id, &error).await?;
                    report.rejected.push(rejection);
                }
            }
        }

        let state = report.state();
        *self.last_state.lock().await = Some(state);
        tracing::info!(
            entity = T::SCHEMA.name,
            synced = report.synced.len(),
            requeued = report.requeued.len(),
            deferred = report.deferred.len(),
            rejected = report.rejected.len(),
            ?state,
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    async fn complete_push(
        &self,
        record: &Record<T>,
        server_id: &ServerId,
    ) -> Result<SyncStatus> {
        let db = self.db.lock().await;
        let status = LibSqlRecordRepository::<T>::new(db.connection())
            .mark_synced(record, server_id)
            .await?;
        SyncLogRepository::new(db.connection())
            .clear_rejections(T::SCHEMA.name, record.local_id)
            .await?;
        tracing::debug!(
            entity = T::SCHEMA.name,
            local_id = %record.local_id,
            %server_id,
            %status,
            "Push accepted"
        );
        Ok(status)
    }

    async fn log_rejection(&self, local_id: LocalId, error: &RemoteError) -> Result<SyncRejection> {
        let message = match error {
            RemoteError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        };
        tracing::warn!(
            entity = T::SCHEMA.name,
            %local_id,
            status = error.status(),
            %message,
            "Push rejected by remote"
        );

        let db = self.db.lock().await;
        SyncLogRepository::new(db.connection())
            .record_rejection(T::SCHEMA.name, local_id, error.status(), &message)
            .await
    }
}
