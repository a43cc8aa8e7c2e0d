//! Generic record repository: one table per entity type

use std::marker::PhantomData;

use libsql::{params, params_from_iter, Connection, Row, Value};
use serde_json::Map;
use uuid::Uuid;

use crate::db::logs::{SyncLogRepository, FOLDED_DUPLICATE, SERVER_WINS};
use crate::error::{Error, Result};
use crate::models::{Entity, LocalId, Record, ServerId, SyncStatus};
use crate::util::{escape_like, now_millis};

const COLUMNS: &str = "local_id, server_id, sync_status, client_ref, fields, updated_at";

/// What `upsert_by_server_id` did to the local table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row had this server id; a new synced row was created
    Inserted(LocalId),
    /// An existing row was replaced
    Updated(LocalId),
    /// The row was already synced with identical fields; nothing written
    Unchanged(LocalId),
    /// An unsynced local edit was replaced; the loser is in the conflict log
    Overwrote(LocalId),
}

impl UpsertOutcome {
    pub const fn local_id(self) -> LocalId {
        match self {
            Self::Inserted(id) | Self::Updated(id) | Self::Unchanged(id) | Self::Overwrote(id) => {
                id
            }
        }
    }
}

/// Trait for local record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository<T: Entity> {
    /// Insert a new row and return its freshly assigned local id
    async fn insert(&self, fields: &T, status: SyncStatus) -> Result<LocalId>;

    /// Replace fields and status of an existing row
    async fn update(&self, local_id: LocalId, fields: &T, status: SyncStatus)
        -> Result<Record<T>>;

    /// Replace (or create) the row carrying `server_id`, forcing it to synced
    async fn upsert_by_server_id(&self, server_id: &ServerId, fields: &T) -> Result<UpsertOutcome>;

    /// Newest-first page, optionally filtered on the schema's searchable fields
    async fn page(&self, offset: usize, limit: usize, filter: Option<&str>)
        -> Result<Vec<Record<T>>>;

    /// Count rows matching the same filter `page` uses
    async fn count(&self, filter: Option<&str>) -> Result<usize>;

    /// Get a row by local id
    async fn get_by_local_id(&self, local_id: LocalId) -> Result<Record<T>>;

    /// Get the row keyed by a server id, if any
    async fn get_by_server_id(&self, server_id: &ServerId) -> Result<Option<Record<T>>>;

    /// All rows still waiting to be pushed, oldest first
    async fn pending(&self) -> Result<Vec<Record<T>>>;

    /// Record a successful push of `pushed` under `server_id`.
    ///
    /// The row becomes synced unless it was edited after the pushed snapshot,
    /// in which case it stays queued as `update_pending`. Any other row that
    /// already holds `server_id` (a merge that ran while the push was in
    /// flight) is folded into this one. Returns the resulting status.
    async fn mark_synced(&self, pushed: &Record<T>, server_id: &ServerId) -> Result<SyncStatus>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a, T> {
    conn: &'a Connection,
    _entity: PhantomData<T>,
}

impl<'a, T: Entity> LibSqlRecordRepository<'a, T> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            _entity: PhantomData,
        }
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &'a Connection {
        self.conn
    }

    fn table() -> &'static str {
        T::SCHEMA.table
    }

    fn encode_fields(fields: &T) -> Result<String> {
        Ok(serde_json::to_string(&fields.encode()?)?)
    }

    fn decode_fields(raw: &str) -> Result<T> {
        let map: Map<String, serde_json::Value> = serde_json::from_str(raw)?;
        T::decode(map)
    }

    /// Parse a record from a database row selected with `COLUMNS`
    fn parse_record(row: &Row) -> Result<Record<T>> {
        let sync_status = row
            .get::<String>(2)?
            .parse::<SyncStatus>()
            .map_err(Error::Database)?;
        let fields_json: String = row.get(4)?;

        Ok(Record {
            local_id: LocalId::new(row.get(0)?),
            server_id: optional_text(row, 1)?.map(ServerId::new),
            sync_status,
            client_ref: optional_text(row, 3)?,
            fields: Self::decode_fields(&fields_json)?,
            updated_at: row.get(5)?,
        })
    }

    async fn collect(&self, sql: &str, values: Vec<Value>) -> Result<Vec<Record<T>>> {
        let mut rows = self.conn.query(sql, params_from_iter(values)).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    /// Build the `WHERE` clause and its bound values for a text filter
    fn filter_clause(filter: Option<&str>) -> (String, Vec<Value>) {
        let Some(term) = filter.map(str::trim).filter(|term| !term.is_empty()) else {
            return (String::new(), Vec::new());
        };
        let pattern = format!("%{}%", escape_like(term));

        let searchable = T::SCHEMA.searchable_fields;
        if searchable.is_empty() {
            return (
                " WHERE fields LIKE ? ESCAPE '\\'".to_string(),
                vec![Value::Text(pattern)],
            );
        }

        let conditions = searchable
            .iter()
            .map(|field| format!("json_extract(fields, '$.{field}') LIKE ? ESCAPE '\\'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let values = searchable
            .iter()
            .map(|_| Value::Text(pattern.clone()))
            .collect();
        (format!(" WHERE ({conditions})"), values)
    }

    fn order_clause() -> String {
        T::SCHEMA.date_field.map_or_else(
            || " ORDER BY local_id DESC".to_string(),
            |field| format!(" ORDER BY json_extract(fields, '$.{field}') DESC, local_id DESC"),
        )
    }

    async fn insert_synced(&self, server_id: &ServerId, fields_json: String) -> Result<LocalId> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (server_id, sync_status, client_ref, fields, updated_at)
                     VALUES (?, 'synced', NULL, ?, ?)",
                    Self::table()
                ),
                params![server_id.as_str(), fields_json, now_millis()],
            )
            .await?;
        Ok(LocalId::new(self.conn.last_insert_rowid()))
    }
}

impl<T: Entity> RecordRepository<T> for LibSqlRecordRepository<'_, T> {
    async fn insert(&self, fields: &T, status: SyncStatus) -> Result<LocalId> {
        if status == SyncStatus::Synced {
            return Err(Error::InvalidInput(
                "a new local record cannot be synced before it has a server id".into(),
            ));
        }

        let client_ref = Uuid::now_v7().to_string();
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (server_id, sync_status, client_ref, fields, updated_at)
                     VALUES (NULL, ?, ?, ?, ?)",
                    Self::table()
                ),
                params![
                    status.as_str(),
                    client_ref,
                    Self::encode_fields(fields)?,
                    now_millis()
                ],
            )
            .await?;

        let local_id = LocalId::new(self.conn.last_insert_rowid());
        tracing::debug!(entity = T::SCHEMA.name, %local_id, %status, "Inserted local record");
        Ok(local_id)
    }

    async fn update(
        &self,
        local_id: LocalId,
        fields: &T,
        status: SyncStatus,
    ) -> Result<Record<T>> {
        let existing = self.get_by_local_id(local_id).await?;
        if status == SyncStatus::Synced && existing.server_id.is_none() {
            return Err(Error::InvalidInput(format!(
                "{} {local_id} has no server id and cannot be marked synced",
                T::SCHEMA.name
            )));
        }

        // updated_at strictly increases so push snapshots always detect edits
        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE {} SET fields = ?, sync_status = ?, updated_at = MAX(?, updated_at + 1)
                     WHERE local_id = ?",
                    Self::table()
                ),
                params![
                    Self::encode_fields(fields)?,
                    status.as_str(),
                    now_millis(),
                    local_id.get()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{} {local_id}", T::SCHEMA.name)));
        }

        self.get_by_local_id(local_id).await
    }

    async fn upsert_by_server_id(&self, server_id: &ServerId, fields: &T) -> Result<UpsertOutcome> {
        let incoming = fields.encode()?;
        let incoming_json = serde_json::to_string(&incoming)?;

        let Some(existing) = self.get_by_server_id(server_id).await? else {
            let local_id = self.insert_synced(server_id, incoming_json).await?;
            return Ok(UpsertOutcome::Inserted(local_id));
        };

        let current = existing.fields.encode()?;
        let unchanged = current == incoming;
        if unchanged && existing.sync_status == SyncStatus::Synced {
            return Ok(UpsertOutcome::Unchanged(existing.local_id));
        }

        let overwrote = !unchanged && existing.sync_status.is_unreconciled();
        if overwrote {
            SyncLogRepository::new(self.conn)
                .record_conflict(
                    T::SCHEMA.name,
                    existing.local_id,
                    server_id,
                    existing.sync_status,
                    &serde_json::to_string(&current)?,
                    &incoming_json,
                    SERVER_WINS,
                )
                .await?;
            tracing::warn!(
                entity = T::SCHEMA.name,
                local_id = %existing.local_id,
                %server_id,
                discarded_status = %existing.sync_status,
                "Remote version replaced an unsynced local edit"
            );
        }

        self.conn
            .execute(
                &format!(
                    "UPDATE {} SET fields = ?, sync_status = 'synced', updated_at = MAX(?, updated_at + 1)
                     WHERE local_id = ?",
                    Self::table()
                ),
                params![incoming_json, now_millis(), existing.local_id.get()],
            )
            .await?;

        if overwrote {
            Ok(UpsertOutcome::Overwrote(existing.local_id))
        } else {
            Ok(UpsertOutcome::Updated(existing.local_id))
        }
    }

    async fn page(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Record<T>>> {
        let (where_clause, mut values) = Self::filter_clause(filter);
        let sql = format!(
            "SELECT {COLUMNS} FROM {}{where_clause}{} LIMIT ? OFFSET ?",
            Self::table(),
            Self::order_clause()
        );
        values.push(Value::Integer(sql_integer("limit", limit)?));
        values.push(Value::Integer(sql_integer("offset", offset)?));
        self.collect(&sql, values).await
    }

    async fn count(&self, filter: Option<&str>) -> Result<usize> {
        let (where_clause, values) = Self::filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM {}{where_clause}", Self::table());
        let mut rows = self.conn.query(&sql, params_from_iter(values)).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|error| Error::Database(error.to_string()))
    }

    async fn get_by_local_id(&self, local_id: LocalId) -> Result<Record<T>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE local_id = ?",
            Self::table()
        );
        self.collect(&sql, vec![Value::Integer(local_id.get())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("{} {local_id}", T::SCHEMA.name)))
    }

    async fn get_by_server_id(&self, server_id: &ServerId) -> Result<Option<Record<T>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE server_id = ? ORDER BY local_id ASC LIMIT 1",
            Self::table()
        );
        Ok(self
            .collect(&sql, vec![Value::Text(server_id.as_str().to_string())])
            .await?
            .into_iter()
            .next())
    }

    async fn pending(&self) -> Result<Vec<Record<T>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE sync_status IN ('pending', 'update_pending')
             ORDER BY local_id ASC",
            Self::table()
        );
        self.collect(&sql, Vec::new()).await
    }

    async fn mark_synced(&self, pushed: &Record<T>, server_id: &ServerId) -> Result<SyncStatus> {
        let current = self.get_by_local_id(pushed.local_id).await?;

        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let status = match self.settle_push(&current, pushed, server_id).await {
            Ok(status) => status,
            Err(error) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        };
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        if status != SyncStatus::Synced {
            tracing::debug!(
                entity = T::SCHEMA.name,
                local_id = %pushed.local_id,
                "Record was edited during push; keeping it queued"
            );
        }
        Ok(status)
    }
}

impl<T: Entity> LibSqlRecordRepository<'_, T> {
    /// Body of `mark_synced`; runs inside its transaction
    async fn settle_push(
        &self,
        current: &Record<T>,
        pushed: &Record<T>,
        server_id: &ServerId,
    ) -> Result<SyncStatus> {
        // A merge may already have replaced the row with the remote version
        let status = if current.sync_status == SyncStatus::Synced
            || current.fields.encode()? == pushed.fields.encode()?
        {
            SyncStatus::Synced
        } else {
            SyncStatus::UpdatePending
        };
        let mut fields = current.fields.clone();

        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE server_id = ? AND local_id <> ? ORDER BY local_id ASC",
            Self::table()
        );
        let duplicates = self
            .collect(
                &sql,
                vec![
                    Value::Text(server_id.as_str().to_string()),
                    Value::Integer(current.local_id.get()),
                ],
            )
            .await?;

        let logs = SyncLogRepository::new(self.conn);
        for duplicate in duplicates {
            if duplicate.sync_status.is_unreconciled() {
                logs.record_conflict(
                    T::SCHEMA.name,
                    duplicate.local_id,
                    server_id,
                    duplicate.sync_status,
                    &Self::encode_fields(&duplicate.fields)?,
                    &Self::encode_fields(&current.fields)?,
                    FOLDED_DUPLICATE,
                )
                .await?;
                tracing::warn!(
                    entity = T::SCHEMA.name,
                    local_id = %duplicate.local_id,
                    %server_id,
                    "Dropped an edit made on a duplicate of a just-pushed record"
                );
            } else if status == SyncStatus::Synced {
                // Remote copy merged mid-push; server wins as for any merge
                fields = duplicate.fields;
            }

            self.conn
                .execute(
                    &format!("DELETE FROM {} WHERE local_id = ?", Self::table()),
                    params![duplicate.local_id.get()],
                )
                .await?;
            logs.clear_rejections(T::SCHEMA.name, duplicate.local_id)
                .await?;
            tracing::debug!(
                entity = T::SCHEMA.name,
                kept = %current.local_id,
                folded = %duplicate.local_id,
                %server_id,
                "Folded duplicate row into pushed record"
            );
        }

        let fields_json = Self::encode_fields(&fields)?;
        self.conn
            .execute(
                &format!(
                    "UPDATE {} SET server_id = ?, sync_status = ?, fields = ?,
                        updated_at = CASE WHEN fields = ? THEN updated_at ELSE MAX(?, updated_at + 1) END
                     WHERE local_id = ?",
                    Self::table()
                ),
                params![
                    server_id.as_str(),
                    status.as_str(),
                    fields_json.clone(),
                    fields_json,
                    now_millis(),
                    current.local_id.get()
                ],
            )
            .await?;
        Ok(status)
    }
}

/// Convert a row count to SQLite's signed integer, refusing values it cannot hold
pub(crate) fn sql_integer(name: &str, value: usize) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::InvalidInput(format!("{name} {value} is out of range")))
}

fn optional_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        Value::Integer(value) => Ok(Some(value.to_string())),
        other => Err(Error::Database(format!(
            "unexpected value in column {idx}: {other:?}"
        ))),
    }
}
