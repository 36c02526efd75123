//! `PersistentStore` implementation over the `kv_store` table.

use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::SqliteStore;
use super::{PersistentStore, StoreCapabilities, StoreResult};
use crate::Error;

const UPSERT: &str = "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET
         value = excluded.value,
         updated_at = excluded.updated_at";

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let result = conn.query_row("SELECT value FROM kv_store WHERE key = ?1", params![key], |row| {
                    row.get(0)
                });

                match result {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(UPSERT, params![key, value, now])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::all()
    }

    async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<(String, Option<String>)>> {
        let keys = keys.to_vec();
        self.conn
            .call(move |conn| -> Result<Vec<(String, Option<String>)>, Error> {
                let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?1")?;
                let mut out = Vec::with_capacity(keys.len());
                for key in keys {
                    let value = match stmt.query_row(params![key], |row| row.get::<_, String>(0)) {
                        Ok(value) => Some(value),
                        Err(rusqlite::Error::QueryReturnedNoRows) => None,
                        Err(e) => return Err(e.into()),
                    };
                    out.push((key, value));
                }
                Ok(out)
            })
            .await
            .map_err(Error::from)
    }

    /// Writes the whole batch in one transaction, in order.
    async fn multi_set(&self, pairs: &[(String, String)]) -> StoreResult<()> {
        let pairs = pairs.to_vec();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(UPSERT)?;
                    for (key, value) in &pairs {
                        stmt.execute(params![key, value, now])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn multi_remove(&self, keys: &[String]) -> StoreResult<()> {
        let keys = keys.to_vec();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare("DELETE FROM kv_store WHERE key = ?1")?;
                    for key in &keys {
                        stmt.execute(params![key])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
                let keys = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }
}
