//! SQLite-backed key-value storage.
//!
//! The session record is stored as one row per field in the `kv` table, so
//! the on-disk layout stays a flat key/value map regardless of how the
//! in-memory type evolves.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, Transaction, TransactionBehavior};

use super::data_dir;
use crate::error::{CoreError, DatabaseError};

/// How long a writer waits for another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database holding the `kv` table.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `~/.config/pomowake/pomowake.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unavailable or the database
    /// cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("pomowake.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Every key/value pair currently stored.
    pub fn kv_all(&self) -> Result<HashMap<String, String>, DatabaseError> {
        read_all(&self.conn)
    }

    /// Write several pairs in one transaction: either all land or none do.
    pub fn kv_set_many(&mut self, entries: &[(&str, String)]) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        write_many(&tx, entries)?;
        tx.commit()?;
        Ok(())
    }

    /// Begin a read-modify-write.
    ///
    /// The transaction takes SQLite's write lock up front (`BEGIN IMMEDIATE`),
    /// so a second process running the same sequence waits until this one
    /// commits or rolls back. Dropping the guard without
    /// [`KvWrite::commit`] rolls back.
    pub fn begin_write(&mut self) -> Result<KvWrite<'_>, DatabaseError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(KvWrite { tx })
    }
}

/// An open write transaction on the `kv` table.
pub struct KvWrite<'conn> {
    tx: Transaction<'conn>,
}

impl KvWrite<'_> {
    pub fn kv_all(&self) -> Result<HashMap<String, String>, DatabaseError> {
        read_all(&self.tx)
    }

    pub fn kv_set_many(&self, entries: &[(&str, String)]) -> Result<(), DatabaseError> {
        write_many(&self.tx, entries)
    }

    pub fn commit(self) -> Result<(), DatabaseError> {
        self.tx.commit()?;
        Ok(())
    }
}

fn read_all(conn: &Connection) -> Result<HashMap<String, String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT key, value FROM kv")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut entries = HashMap::new();
    for row in rows {
        let (key, value) = row?;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn write_many(conn: &Connection, entries: &[(&str, String)]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
    for (key, value) in entries {
        stmt.execute(params![key, value])?;
    }
    Ok(())
}
