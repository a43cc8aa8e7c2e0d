//! Schema migrations for the shared log tables and per-entity record tables

use crate::error::Result;
use crate::models::EntitySchema;
use libsql::Connection;

/// Shared-table migrations, applied in order; each entry is one schema version
const MIGRATIONS: &[(i32, &str, &[&str])] = &[
    (
        1,
        "merge conflict log",
        &[
            "CREATE TABLE IF NOT EXISTS sync_conflicts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                local_id INTEGER NOT NULL,
                server_id TEXT NOT NULL,
                discarded_status TEXT NOT NULL,
                discarded_fields TEXT NOT NULL,
                incoming_fields TEXT NOT NULL,
                resolved_at INTEGER NOT NULL,
                strategy TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts(entity, local_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_recent ON sync_conflicts(resolved_at DESC)",
        ],
    ),
    (
        2,
        "push rejection log",
        &[
            "CREATE TABLE IF NOT EXISTS sync_rejections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                local_id INTEGER NOT NULL,
                status INTEGER NOT NULL,
                message TEXT NOT NULL,
                rejected_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_rejections_entity ON sync_rejections(entity, local_id)",
        ],
    ),
];

/// Apply every migration newer than the recorded schema version
pub async fn run(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        (),
    )
    .await?;
    let applied = schema_version(conn).await?;

    for &(version, label, statements) in MIGRATIONS.iter().filter(|(v, ..)| *v > applied) {
        let stamp = format!("INSERT INTO schema_version (version) VALUES ({version})");
        let mut batch = statements.to_vec();
        batch.push(stamp.as_str());
        run_in_transaction(conn, &batch).await?;
        tracing::info!(version, label, "Applied schema migration");
    }

    Ok(())
}

/// Highest applied migration, or 0 on a fresh database
async fn schema_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

/// Execute statements atomically; the first failure rolls everything back
async fn run_in_transaction(conn: &Connection, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN", ()).await?;

    for statement in statements {
        if let Err(error) = conn.execute(statement, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
    }

    if let Err(error) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }
    Ok(())
}

/// Create the record table and its indexes for one entity type
pub async fn ensure_entity_table(conn: &Connection, schema: &EntitySchema) -> Result<()> {
    schema.validate()?;
    let table = schema.table;

    let create_table = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            local_id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id TEXT,
            sync_status TEXT NOT NULL CHECK (sync_status IN ('pending', 'update_pending', 'synced')),
            client_ref TEXT,
            fields TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (sync_status <> 'synced' OR server_id IS NOT NULL)
        )"
    );
    let server_index =
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_server_id ON {table}(server_id)");
    let status_index =
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_sync_status ON {table}(sync_status)");

    run_in_transaction(
        conn,
        &[
            create_table.as_str(),
            server_index.as_str(),
            status_index.as_str(),
        ],
    )
    .await?;
    tracing::debug!(entity = schema.name, table, "Ensured entity table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, Survey};
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?
                )",
                libsql::params![name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    fn latest() -> i32 {
        MIGRATIONS.last().map_or(0, |(version, ..)| *version)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_database_reaches_latest_version() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        assert_eq!(schema_version(&conn).await.unwrap(), latest());
        assert!(table_exists(&conn, "sync_conflicts").await);
        assert!(table_exists(&conn, "sync_rejections").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rerunning_migrations_is_a_no_op() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM schema_version", ())
            .await
            .unwrap();
        let stamps: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(stamps, i64::from(latest()));
    }

    #[test]
    fn migration_versions_are_sequential() {
        for (index, (version, ..)) in MIGRATIONS.iter().enumerate() {
            assert_eq!(usize::try_from(*version).unwrap(), index + 1);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entity_table_is_created_once() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        ensure_entity_table(&conn, &Survey::SCHEMA).await.unwrap();
        ensure_entity_table(&conn, &Survey::SCHEMA).await.unwrap();
        assert!(table_exists(&conn, "surveys").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn synced_row_requires_server_id() {
        let conn = setup().await;
        ensure_entity_table(&conn, &Survey::SCHEMA).await.unwrap();

        let result = conn
            .execute(
                "INSERT INTO surveys (server_id, sync_status, fields, updated_at)
                 VALUES (NULL, 'synced', '{}', 0)",
                (),
            )
            .await;
        assert!(result.is_err());
    }
}
