//! Batch execution of local-store mutations

use crate::error::Result;
use crate::models::{Entity, LocalId, ServerId, SyncStatus};

use super::repository::{LibSqlRecordRepository, RecordRepository, UpsertOutcome};

/// One local-store mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<T> {
    /// Merge a remote record (idempotent)
    Upsert { server_id: ServerId, fields: T },
    /// Replace an existing row (idempotent)
    Update {
        local_id: LocalId,
        fields: T,
        status: SyncStatus,
    },
    /// Insert a new row (not idempotent: replaying creates a duplicate)
    Insert { fields: T, status: SyncStatus },
}

impl<T> Mutation<T> {
    /// Whether applying this mutation twice equals applying it once
    pub const fn is_idempotent(&self) -> bool {
        !matches!(self, Self::Insert { .. })
    }
}

/// A mutation that failed inside a best-effort batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Position of the mutation in the submitted batch
    pub index: usize,
    pub message: String,
}

/// Summary of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    /// Upserts that replaced an unsynced local edit
    pub overwritten: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Apply `mutations` in order.
///
/// When every mutation is idempotent each one runs on its own: a failure is
/// logged and recorded in the report, and later mutations still run. A batch
/// containing any non-idempotent mutation runs in one transaction instead and
/// is rolled back entirely on the first failure, which is returned.
pub async fn run_batch<T: Entity>(
    repo: &LibSqlRecordRepository<'_, T>,
    mutations: Vec<Mutation<T>>,
) -> Result<BatchReport> {
    if mutations.iter().all(Mutation::is_idempotent) {
        Ok(run_best_effort(repo, mutations).await)
    } else {
        run_atomic(repo, mutations).await
    }
}

async fn run_best_effort<T: Entity>(
    repo: &LibSqlRecordRepository<'_, T>,
    mutations: Vec<Mutation<T>>,
) -> BatchReport {
    let mut report = BatchReport::default();

    for (index, mutation) in mutations.into_iter().enumerate() {
        match apply(repo, mutation).await {
            Ok(overwrote) => {
                report.applied += 1;
                report.overwritten += usize::from(overwrote);
            }
            Err(error) => {
                tracing::warn!(
                    entity = T::SCHEMA.name,
                    index,
                    %error,
                    "Batch mutation failed; continuing with the rest"
                );
                report.failures.push(BatchFailure {
                    index,
                    message: error.to_string(),
                });
            }
        }
    }

    report
}

async fn run_atomic<T: Entity>(
    repo: &LibSqlRecordRepository<'_, T>,
    mutations: Vec<Mutation<T>>,
) -> Result<BatchReport> {
    let conn = repo.connection();
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let mut report = BatchReport::default();
    for (index, mutation) in mutations.into_iter().enumerate() {
        match apply(repo, mutation).await {
            Ok(overwrote) => {
                report.applied += 1;
                report.overwritten += usize::from(overwrote);
            }
            Err(error) => {
                conn.execute("ROLLBACK", ()).await.ok();
                tracing::warn!(
                    entity = T::SCHEMA.name,
                    index,
                    %error,
                    "Batch mutation failed; rolled back the whole batch"
                );
                return Err(error);
            }
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(report)
}

/// Apply one mutation; returns whether an unsynced edit was overwritten
async fn apply<T: Entity>(
    repo: &LibSqlRecordRepository<'_, T>,
    mutation: Mutation<T>,
) -> Result<bool> {
    match mutation {
        Mutation::Upsert { server_id, fields } => {
            let outcome = repo.upsert_by_server_id(&server_id, &fields).await?;
            Ok(matches!(outcome, UpsertOutcome::Overwrote(_)))
        }
        Mutation::Update {
            local_id,
            fields,
            status,
        } => {
            repo.update(local_id, &fields, status).await?;
            Ok(false)
        }
        Mutation::Insert { fields, status } => {
            repo.insert(&fields, status).await?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Survey;
    use crate::Error;

    async fn setup() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        db.ensure_entity_table(&Survey::SCHEMA).await.unwrap();
        db
    }

    fn survey(area: &str) -> Survey {
        Survey {
            area: area.to_string(),
            ..Survey::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn best_effort_batch_continues_after_failure() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::<Survey>::new(db.connection());

        let report = run_batch(
            &repo,
            vec![
                Mutation::Upsert {
                    server_id: ServerId::from(1),
                    fields: survey("a"),
                },
                Mutation::Update {
                    local_id: LocalId::new(404),
                    fields: survey("missing"),
                    status: SyncStatus::UpdatePending,
                },
                Mutation::Upsert {
                    server_id: ServerId::from(2),
                    fields: survey("b"),
                },
            ],
        )
        .await
        .unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert!(!report.is_complete());
        assert_eq!(repo.count(None).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_with_insert_is_atomic() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::<Survey>::new(db.connection());

        let err = run_batch(
            &repo,
            vec![
                Mutation::Insert {
                    fields: survey("draft"),
                    status: SyncStatus::Pending,
                },
                Mutation::Update {
                    local_id: LocalId::new(404),
                    fields: survey("missing"),
                    status: SyncStatus::UpdatePending,
                },
            ],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(repo.count(None).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn atomic_batch_commits_on_success() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::<Survey>::new(db.connection());

        let report = run_batch(
            &repo,
            vec![
                Mutation::Insert {
                    fields: survey("one"),
                    status: SyncStatus::Pending,
                },
                Mutation::Insert {
                    fields: survey("two"),
                    status: SyncStatus::Pending,
                },
            ],
        )
        .await
        .unwrap();

        assert_eq!(report.applied, 2);
        assert!(report.is_complete());
        assert_eq!(repo.pending().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn report_counts_overwritten_edits() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::<Survey>::new(db.connection());
        let local_id = repo
            .upsert_by_server_id(&ServerId::from(9), &survey("v1"))
            .await
            .unwrap()
            .local_id();
        repo.update(local_id, &survey("local"), SyncStatus::UpdatePending)
            .await
            .unwrap();

        let report = run_batch(
            &repo,
            vec![Mutation::Upsert {
                server_id: ServerId::from(9),
                fields: survey("v2"),
            }],
        )
        .await
        .unwrap();
        assert_eq!(report.overwritten, 1);
    }

    #[test]
    fn only_inserts_are_non_idempotent() {
        let insert = Mutation::Insert {
            fields: survey("x"),
            status: SyncStatus::Pending,
        };
        let upsert = Mutation::Upsert {
            server_id: ServerId::from(1),
            fields: survey("x"),
        };
        assert!(!insert.is_idempotent());
        assert!(upsert.is_idempotent());
    }
}
