//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                inbound_prefix TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_prefix ON accounts(inbound_prefix);

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                title TEXT NOT NULL,
                company TEXT,
                location TEXT,
                status TEXT NOT NULL DEFAULT 'applied',
                source TEXT NOT NULL DEFAULT 'manual',
                source_id TEXT,
                source_url TEXT,
                applied_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_account ON jobs(account_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_account_company ON jobs(account_id, company);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

            CREATE TABLE IF NOT EXISTS processed_emails (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                email_id TEXT NOT NULL,
                email_hash TEXT,
                from_addr TEXT,
                subject TEXT,
                event_type TEXT,
                needs_review INTEGER NOT NULL DEFAULT 0,
                review_reason TEXT,
                snippet TEXT,
                cached_classification TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (account_id, email_id)
            );
            CREATE INDEX IF NOT EXISTS idx_processed_emails_hash
                ON processed_emails(account_id, email_hash);
            CREATE INDEX IF NOT EXISTS idx_processed_emails_created
                ON processed_emails(created_at);

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                message TEXT NOT NULL,
                link TEXT,
                kind TEXT NOT NULL DEFAULT 'system',
                read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_account
                ON notifications(account_id, created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "job_source_dedupe",
        sql: r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_source_dedupe
                ON jobs(account_id, source, source_id)
                WHERE source_id IS NOT NULL;
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "accounts",
            "jobs",
            "processed_emails",
            "notifications",
            "_migrations",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn ledger_unique_constraint_enforced() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO processed_emails (id, account_id, email_id, created_at, updated_at)
             VALUES ('p1', 'a1', 'evt_1', '2026-01-01', '2026-01-01')",
            (),
        )
        .await
        .unwrap();

        let dup = conn
            .execute(
                "INSERT INTO processed_emails (id, account_id, email_id, created_at, updated_at)
                 VALUES ('p2', 'a1', 'evt_1', '2026-01-01', '2026-01-01')",
                (),
            )
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn job_source_dedupe_allows_null_source_id() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        // Two manual jobs without source_id are fine
        for id in ["j1", "j2"] {
            conn.execute(
                "INSERT INTO jobs (id, account_id, title, applied_at, created_at, updated_at)
                 VALUES (?1, 'a1', 'Engineer', '2026-01-01', '2026-01-01', '2026-01-01')",
                libsql::params![id],
            )
            .await
            .unwrap();
        }

        // Same (account, source, source_id) twice is not
        conn.execute(
            "INSERT INTO jobs (id, account_id, title, source, source_id, applied_at, created_at, updated_at)
             VALUES ('j3', 'a1', 'Engineer', 'email', 'evt_1', '2026-01-01', '2026-01-01', '2026-01-01')",
            (),
        )
        .await
        .unwrap();
        let dup = conn
            .execute(
                "INSERT INTO jobs (id, account_id, title, source, source_id, applied_at, created_at, updated_at)
                 VALUES ('j4', 'a1', 'Engineer', 'email', 'evt_1', '2026-01-01', '2026-01-01', '2026-01-01')",
                (),
            )
            .await;
        assert!(dup.is_err());
    }
}
