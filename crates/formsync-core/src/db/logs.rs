//! Conflict and rejection logs shared by all entity types

use libsql::{params, params_from_iter, Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{LocalId, ServerId, SyncConflict, SyncRejection, SyncStatus};
use crate::util::now_millis;

use super::repository::sql_integer;

/// Strategy for inbound merges that replace unsynced edits
pub const SERVER_WINS: &str = "server_wins";
/// Strategy for duplicate rows of one server id folded after a push
pub const FOLDED_DUPLICATE: &str = "folded_duplicate";

/// Repository over `sync_conflicts` and `sync_rejections`
pub struct SyncLogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SyncLogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Log a local edit that was discarded in favour of another version
    #[allow(clippy::too_many_arguments)]
    pub async fn record_conflict(
        &self,
        entity: &str,
        local_id: LocalId,
        server_id: &ServerId,
        discarded_status: SyncStatus,
        discarded_fields: &str,
        incoming_fields: &str,
        strategy: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    entity, local_id, server_id, discarded_status,
                    discarded_fields, incoming_fields, resolved_at, strategy
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entity,
                    local_id.get(),
                    server_id.as_str(),
                    discarded_status.as_str(),
                    discarded_fields,
                    incoming_fields,
                    now_millis(),
                    strategy
                ],
            )
            .await?;
        Ok(())
    }

    /// Most recent conflicts first, optionally for one entity type
    pub async fn list_conflicts(
        &self,
        entity: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity, local_id, server_id, discarded_status,
                        discarded_fields, incoming_fields, resolved_at, strategy
                 FROM sync_conflicts
                 WHERE ?1 IS NULL OR entity = ?1
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?2",
                params_from_iter([
                    entity.map_or(Value::Null, |entity| Value::Text(entity.to_string())),
                    Value::Integer(sql_integer("limit", limit)?),
                ]),
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    /// Log a push the remote refused
    pub async fn record_rejection(
        &self,
        entity: &str,
        local_id: LocalId,
        status: u16,
        message: &str,
    ) -> Result<SyncRejection> {
        let rejected_at = now_millis();
        self.conn
            .execute(
                "INSERT INTO sync_rejections (entity, local_id, status, message, rejected_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![entity, local_id.get(), i64::from(status), message, rejected_at],
            )
            .await?;

        Ok(SyncRejection {
            id: self.conn.last_insert_rowid(),
            entity: entity.to_string(),
            local_id: local_id.get(),
            status,
            message: message.to_string(),
            rejected_at,
        })
    }

    /// Latest rejection per record for one entity type, newest first
    pub async fn list_rejections(&self, entity: &str) -> Result<Vec<SyncRejection>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity, local_id, status, message, rejected_at
                 FROM sync_rejections r
                 WHERE entity = ?1
                   AND id = (
                       SELECT MAX(id) FROM sync_rejections
                       WHERE entity = r.entity AND local_id = r.local_id
                   )
                 ORDER BY rejected_at DESC, id DESC",
                params![entity],
            )
            .await?;

        let mut rejections = Vec::new();
        while let Some(row) = rows.next().await? {
            let status: i64 = row.get(3)?;
            rejections.push(SyncRejection {
                id: row.get(0)?,
                entity: row.get(1)?,
                local_id: row.get(2)?,
                status: u16::try_from(status)
                    .map_err(|error| Error::Database(error.to_string()))?,
                message: row.get(4)?,
                rejected_at: row.get(5)?,
            });
        }
        Ok(rejections)
    }

    /// Forget rejections for a record once a push succeeded
    pub async fn clear_rejections(&self, entity: &str, local_id: LocalId) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM sync_rejections WHERE entity = ? AND local_id = ?",
                params![entity, local_id.get()],
            )
            .await?;
        Ok(removed)
    }

    fn parse_conflict(row: &Row) -> Result<SyncConflict> {
        Ok(SyncConflict {
            id: row.get(0)?,
            entity: row.get(1)?,
            local_id: row.get(2)?,
            server_id: row.get(3)?,
            discarded_status: row.get(4)?,
            discarded_fields: row.get(5)?,
            incoming_fields: row.get(6)?,
            resolved_at: row.get(7)?,
            strategy: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn conflicts_filter_by_entity() {
        let db = Database::open_in_memory().await.unwrap();
        let logs = SyncLogRepository::new(db.connection());

        logs.record_conflict(
            "survey",
            LocalId::new(1),
            &ServerId::from(10),
            SyncStatus::UpdatePending,
            "{}",
            "{}",
            SERVER_WINS,
        )
        .await
        .unwrap();
        logs.record_conflict(
            "checklist",
            LocalId::new(2),
            &ServerId::from(11),
            SyncStatus::Pending,
            "{}",
            "{}",
            SERVER_WINS,
        )
        .await
        .unwrap();

        assert_eq!(logs.list_conflicts(None, 10).await.unwrap().len(), 2);
        let surveys = logs.list_conflicts(Some("survey"), 10).await.unwrap();
        assert_eq!(surveys.len(), 1);
        assert_eq!(surveys[0].server_id, "10");
        assert_eq!(surveys[0].strategy, "server_wins");
        assert_eq!(logs.list_conflicts(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejections_keep_latest_per_record_until_cleared() {
        let db = Database::open_in_memory().await.unwrap();
        let logs = SyncLogRepository::new(db.connection());
        let local_id = LocalId::new(3);

        logs.record_rejection("survey", local_id, 400, "area required")
            .await
            .unwrap();
        logs.record_rejection("survey", local_id, 422, "date invalid")
            .await
            .unwrap();

        let rejections = logs.list_rejections("survey").await.unwrap();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].status, 422);
        assert_eq!(rejections[0].message, "date invalid");

        assert_eq!(logs.clear_rejections("survey", local_id).await.unwrap(), 2);
        assert!(logs.list_rejections("survey").await.unwrap().is_empty());
    }
}
