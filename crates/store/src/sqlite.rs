//! SQLite backend.
//!
//! Items live in a single table, one row per key, with the item rendered as
//! JSON next to its version. Every write runs in a `BEGIN IMMEDIATE`
//! transaction, which takes the database write lock before reading, so
//! read-modify-write sequences from concurrent processes sharing the file
//! are serialized.
//!
//! SQLite calls block, including while waiting out `busy_timeout`, so each
//! one runs on tokio's blocking pool.

use crate::backend::{apply_increment, apply_remove, new_item};
use crate::{
    AttributeValue, Backend, CollectionInfo, Error, FieldPath, Item, ItemCheck, KEY_ATTRIBUTE,
    PutOutcome, Result, VersionedItem,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Default time to wait for another process holding the write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct StoredRow {
    item: String,
    version: i64,
}

/// SQLite-backed item store.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteBackend {
    /// Open or create a database file. The table itself is created by
    /// [`Backend::ensure_collection`].
    pub fn open(path: impl AsRef<Path>, table: &str, busy_timeout: Duration) -> Result<Self> {
        validate_table_name(table)?;
        let conn = Connection::open(path.as_ref()).map_err(|e| classify(e, table))?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| classify(e, table))?;
        debug!(path = %path.as_ref().display(), table, "opened sqlite backend");
        Ok(Self::with_connection(conn, table))
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory(table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn, table))
    }

    fn with_connection(conn: Connection, table: &str) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| Error::Unavailable("sqlite connection lock poisoned".into()))?;
            f(&mut *conn, &table)
        })
        .await
        .map_err(|e| Error::Unavailable(format!("sqlite task failed: {e}")))?
    }

    /// Run `f` inside an immediate transaction and commit on success.
    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>, &str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(move |conn, table| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| classify(e, table))?;
            let value = f(&tx, table)?;
            tx.commit().map_err(|e| classify(e, table))?;
            Ok(value)
        })
        .await
    }
}

impl Backend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<VersionedItem>> {
        trace!(key, "get");
        let key = key.to_string();
        self.run_blocking(move |conn, table| load(conn, table, &key))
            .await
    }

    async fn increment_field_checked(
        &self,
        key: &str,
        path: &FieldPath,
        delta: i64,
        check: ItemCheck,
    ) -> Result<i64> {
        trace!(key, %path, delta, "increment");
        let key = key.to_string();
        let path = path.clone();
        self.write(move |tx, table| {
            let mut stored = load(tx, table, &key)?.unwrap_or_else(|| VersionedItem {
                item: new_item(&key),
                version: 0,
            });
            check(&stored.item)?;
            let value = apply_increment(&mut stored.item, &path, delta)?;
            store(tx, table, &key, &stored.item, stored.version + 1)?;
            Ok(value)
        })
        .await
    }

    async fn conditional_put(
        &self,
        key: &str,
        mut item: Item,
        expected: Option<u64>,
    ) -> Result<PutOutcome> {
        trace!(key, ?expected, "conditional put");
        item.insert(KEY_ATTRIBUTE.to_string(), AttributeValue::string(key));
        let key = key.to_string();
        self.write(move |tx, table| {
            let current = load(tx, table, &key)?.map(|stored| stored.version);
            if current != expected {
                return Ok(PutOutcome::VersionConflict);
            }
            let version = current.unwrap_or(0) + 1;
            store(tx, table, &key, &item, version)?;
            Ok(PutOutcome::Written(version))
        })
        .await
    }

    async fn remove_field(&self, key: &str, path: &FieldPath) -> Result<()> {
        trace!(key, %path, "remove");
        let key = key.to_string();
        let path = path.clone();
        self.write(move |tx, table| {
            if let Some(mut stored) = load(tx, table, &key)? {
                if apply_remove(&mut stored.item, &path) {
                    store(tx, table, &key, &stored.item, stored.version + 1)?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn ensure_collection(&self) -> Result<()> {
        self.run_blocking(|conn, table| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    item TEXT NOT NULL,
                    version INTEGER NOT NULL
                );"
            ))
            .map_err(|e| classify(e, table))
        })
        .await?;
        debug!(table = %self.table, "collection ready");
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        self.run_blocking(|conn, table| {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))
                .map_err(|e| classify(e, table))
        })
        .await?;
        debug!(table = %self.table, "collection dropped");
        Ok(())
    }

    async fn describe_collection(&self) -> Result<CollectionInfo> {
        let count: i64 = self
            .run_blocking(|conn, table| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(|e| classify(e, table))
            })
            .await?;
        Ok(CollectionInfo {
            name: self.table.clone(),
            key_attribute: KEY_ATTRIBUTE,
            item_count: u64::try_from(count).unwrap_or_default(),
        })
    }
}

fn load(conn: &Connection, table: &str, key: &str) -> Result<Option<VersionedItem>> {
    let row = conn
        .query_row(
            &format!("SELECT item, version FROM {table} WHERE id = ?1"),
            [key],
            |row| Ok(serde_rusqlite::from_row::<StoredRow>(row)),
        )
        .optional()
        .map_err(|e| classify(e, table))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let row = row?;
    let version = u64::try_from(row.version)
        .map_err(|_| Error::Unavailable(format!("negative version stored for {key:?}")))?;
    Ok(Some(VersionedItem {
        item: serde_json::from_str(&row.item)?,
        version,
    }))
}

fn store(conn: &Connection, table: &str, key: &str, item: &Item, version: u64) -> Result<()> {
    let version = i64::try_from(version)
        .map_err(|_| Error::Overflow { path: format!("{key:?} version") })?;
    conn.execute(
        &format!(
            "INSERT INTO {table} (id, item, version) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET item = excluded.item, version = excluded.version"
        ),
        params![key, serde_json::to_string(item)?, version],
    )
    .map_err(|e| classify(e, table))?;
    Ok(())
}

fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Map SQLite failures onto the backend error kinds callers act on.
fn classify(err: rusqlite::Error, table: &str) -> Error {
    let (code, missing_table) = match &err {
        rusqlite::Error::SqliteFailure(failure, message) => (
            Some(failure.code),
            message
                .as_deref()
                .is_some_and(|m| m.starts_with("no such table")),
        ),
        _ => (None, false),
    };

    match code {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Error::Timeout,
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::NotADatabase
            | ErrorCode::PermissionDenied,
        ) => Error::Unavailable(err.to_string()),
        _ if missing_table => Error::CollectionMissing(table.to_string()),
        _ => Error::Database(err),
    }
}
