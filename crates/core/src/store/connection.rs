//! Opening the SQLite-backed durable store.

use std::path::Path;

use tokio_rusqlite::Connection;

use super::migrations;
use crate::Error;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA busy_timeout=5000;";

/// [`PersistentStore`](super::PersistentStore) over a single `kv_store`
/// table. Statements run on tokio-rusqlite's background thread.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    /// Open or create the database at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::AdapterFailed(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| conn.execute_batch(PRAGMAS))
            .await
            .map_err(Error::Database)?;
        migrations::run(&conn).await?;
        Ok(Self { conn })
    }
}
