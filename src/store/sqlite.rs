use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, RunnelError};
use crate::store::{Batch, BatchOp, KeyRange, KvStore};

/// `KvStore` backed by a single SQLite table with BLOB keys.
///
/// SQLite compares BLOBs with memcmp, which gives the byte order the key
/// schema is built for.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.lock()?;

        migrations
            .to_latest(&mut conn)
            .map_err(|_| RunnelError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            RunnelError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;

        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    fn write(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut put = tx.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
            let mut del = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;

            for op in batch.ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        put.execute(params![key, value])?;
                    }
                    BatchOp::Del { key } => {
                        del.execute(params![key])?;
                    }
                }
            }
        }
        tx.commit()?;

        Ok(())
    }

    fn scan(&self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let conn = self.lock()?;

        let sql = if range.reverse {
            "SELECT key, value FROM kv WHERE key >= ?1 AND key <= ?2 ORDER BY key DESC LIMIT ?3"
        } else {
            "SELECT key, value FROM kv WHERE key >= ?1 AND key <= ?2 ORDER BY key ASC LIMIT ?3"
        };
        // a negative LIMIT means no limit to SQLite
        let limit = range.limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![range.gte, range.lte, limit], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}
