//! Schema migrations for the durable key/value table.
//!
//! Applied versions are recorded in `_migrations`; each pending migration
//! runs in its own transaction together with its version row.

use tokio_rusqlite::{Connection, params};

use crate::Error;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_kv_store.sql"))];

/// Highest schema version this build knows about.
pub const LATEST: i64 = MIGRATIONS[MIGRATIONS.len() - 1].0;

/// Bring the schema up to [`LATEST`].
///
/// # Errors
///
/// Fails with [`Error::MigrationFailed`] if the database already carries a
/// newer schema than this build, or with [`Error::Database`] if a statement
/// fails. A failed migration leaves no partial version row behind.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )?;

        let current: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;
        if current > LATEST {
            return Err(Error::MigrationFailed(format!(
                "store schema v{current} is newer than supported v{LATEST}"
            )));
        }

        for &(version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::debug!(version, "applied store migration");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
