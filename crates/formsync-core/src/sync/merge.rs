//! Merge-on-search: refresh the local cache from the remote, then read locally.

use crate::db::{run_batch, BatchReport, LibSqlRecordRepository, Mutation, RecordRepository};
use crate::error::{Error, Result};
use crate::models::{Entity, Record, ServerId};
use crate::remote::RemoteClient;

use super::{ReconcileReport, SyncEngine};

/// What the remote phase of `load_page` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRefresh {
    /// Not the first page; the remote was not contacted
    Skipped,
    /// Search results were upserted into the local store
    Merged(BatchReport),
    /// The remote search failed; the page shows local data only
    Unavailable(String),
    /// No search term on the first page; queued edits were pushed
    Reconciled(ReconcileReport),
}

/// One page of records, always read from the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage<T> {
    pub records: Vec<Record<T>>,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
    pub remote: RemoteRefresh,
}

impl<T: Entity, R: RemoteClient<T>> SyncEngine<T, R> {
    /// Load a page for display; `page_size` defaults to the configured one.
    ///
    /// On page 1 a search term triggers a remote search whose results are
    /// merged into the store, and no search term triggers a reconciliation
    /// pass. Remote failures are logged and never fail the call. The records
    /// themselves always come from the local store.
    pub async fn load_page(
        &self,
        page: usize,
        page_size: Option<usize>,
        search: Option<&str>,
    ) -> Result<RecordPage<T>> {
        let page_size = page_size.unwrap_or(self.config.page_size);
        if page == 0 {
            return Err(Error::InvalidInput("page numbers start at 1".into()));
        }
        if page_size == 0 {
            return Err(Error::InvalidInput(
                "page size must be greater than zero".into(),
            ));
        }

        let page_size = self.config.clamp_page_size(page_size);
        let offset = (page - 1)
            .checked_mul(page_size)
            .ok_or_else(|| Error::InvalidInput(format!("page {page} is out of range")))?;
        let term = search.map(str::trim).filter(|term| !term.is_empty());

        let remote = match (page, term) {
            (1, Some(term)) => self.merge_search(term).await?,
            (1, None) => RemoteRefresh::Reconciled(self.reconcile().await?),
            _ => RemoteRefresh::Skipped,
        };

        // One row past the page tells whether another page exists
        let mut records = {
            let db = self.db.lock().await;
            LibSqlRecordRepository::<T>::new(db.connection())
                .page(offset, page_size.saturating_add(1), term)
                .await?
        };
        let has_more = records.len() > page_size;
        records.truncate(page_size);

        Ok(RecordPage {
            records,
            page,
            page_size,
            has_more,
            remote,
        })
    }

    /// Fetch one record from the remote and merge it into the store.
    pub async fn refresh_record(&self, server_id: &ServerId) -> Result<Record<T>> {
        let remote = self.remote.fetch_by_id(server_id).await?;

        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::<T>::new(db.connection());
        let outcome = repo
            .upsert_by_server_id(&remote.server_id, &remote.fields)
            .await?;
        tracing::debug!(entity = T::SCHEMA.name, %server_id, ?outcome, "Refreshed record");
        repo.get_by_local_id(outcome.local_id()).await
    }

    async fn merge_search(&self, term: &str) -> Result<RemoteRefresh> {
        let results = match self.remote.search(term).await {
            Ok(results) => results,
            Err(error) => {
                tracing::warn!(
                    entity = T::SCHEMA.name,
                    %error,
                    "Remote search failed; showing local records only"
                );
                return Ok(RemoteRefresh::Unavailable(error.to_string()));
            }
        };

        let mutations = results
            .into_iter()
            .map(|remote| Mutation::Upsert {
                server_id: remote.server_id,
                fields: remote.fields,
            })
            .collect();

        let db = self.db.lock().await;
        let report = run_batch(&LibSqlRecordRepository::<T>::new(db.connection()), mutations).await?;
        tracing::debug!(
            entity = T::SCHEMA.name,
            applied = report.applied,
            overwritten = report.overwritten,
            failed = report.failures.len(),
            "Merged remote search results"
        );
        Ok(RemoteRefresh::Merged(report))
    }
}
