//! Database connection management

use crate::error::Result;
use crate::models::EntitySchema;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::migrations;

/// Database handle shared by every engine; the mutex is the single-writer lock.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Database wrapper for libSQL connections
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        tracing::debug!(path = %path_str, "Opened local record database");
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Wrap this database for sharing between engines.
    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases; ignore failures there
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Create the record table for an entity type if it doesn't exist yet
    pub async fn ensure_entity_table(&self, schema: &EntitySchema) -> Result<()> {
        migrations::ensure_entity_table(&self.conn, schema).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{LibSqlRecordRepository, RecordRepository};
    use crate::models::{Entity, Survey, SyncStatus};
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        let mut rows = db.connection().query("SELECT 1", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i32>(0).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_survive_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("records.db");

        let local_id = {
            let db = Database::open(&db_path).await.unwrap();
            db.ensure_entity_table(&Survey::SCHEMA).await.unwrap();
            let repo = LibSqlRecordRepository::<Survey>::new(db.connection());
            let survey = Survey {
                area: "Dock 4".into(),
                ..Survey::default()
            };
            repo.insert(&survey, SyncStatus::Pending).await.unwrap()
        };

        let db = Database::open(&db_path).await.unwrap();
        db.ensure_entity_table(&Survey::SCHEMA).await.unwrap();
        let repo = LibSqlRecordRepository::<Survey>::new(db.connection());
        let record = repo.get_by_local_id(local_id).await.unwrap();
        assert_eq!(record.fields.area, "Dock 4");
        assert_eq!(record.sync_status, SyncStatus::Pending);
    }
}
