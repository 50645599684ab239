//! Ordered key-value substrate with nested buckets.
//!
//! Every bucket is a row in `buckets` linked to its parent; values live in `entries` keyed by
//! `(bucket, key)`. SQLite compares BLOB keys bytewise, so scanning a bucket yields keys in the
//! same order a B+tree store would. Deleting a bucket cascades through its children and
//! entries.

use std::{
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::error::StoreResult;

pub type BucketId = i64;

/// The implicit bucket holding every top-level collection.
pub const ROOT: BucketId = 0;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS buckets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent INTEGER REFERENCES buckets(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        sequence INTEGER NOT NULL DEFAULT 0,
        UNIQUE (parent, name)
    );

    INSERT OR IGNORE INTO buckets (id, parent, name) VALUES (0, NULL, '');

    CREATE TABLE IF NOT EXISTS entries (
        bucket INTEGER NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
        key BLOB NOT NULL,
        value BLOB NOT NULL,
        PRIMARY KEY (bucket, key)
    ) WITHOUT ROWID;
";

/// Encodes a sequential id into a sortable key.
pub fn id_to_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Decodes an entity key. Ids stay below 2^56, so their leading byte is always zero, which no
/// text (metadata) key has.
pub fn key_to_id(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    if bytes[0] != 0 {
        return None;
    }
    Some(u64::from_be_bytes(bytes))
}

pub struct KvStore {
    conn: Mutex<Connection>,
}

impl KvStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic inside a closure leaves the transaction rolled back, so the connection is
        // still usable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` inside one write transaction. Nothing is committed if `f` fails.
    pub fn update<T>(&self, f: impl FnOnce(&Tx<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.lock();
        let tx = Tx {
            inner: conn.transaction_with_behavior(TransactionBehavior::Immediate)?,
        };
        let result = f(&tx)?;
        tx.inner.commit()?;
        Ok(result)
    }

    /// Runs `f` against the last committed state. Writes made inside are discarded.
    pub fn view<T>(&self, f: impl FnOnce(&Tx<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.lock();
        let tx = Tx {
            inner: conn.transaction()?,
        };
        f(&tx)
    }
}

pub struct Tx<'conn> {
    inner: Transaction<'conn>,
}

impl Tx<'_> {
    pub fn bucket(&self, parent: BucketId, name: &str) -> StoreResult<Option<BucketId>> {
        Ok(self
            .inner
            .prepare_cached("SELECT id FROM buckets WHERE parent = ?1 AND name = ?2")?
            .query_row(params![parent, name], |row| row.get(0))
            .optional()?)
    }

    pub fn create_bucket_if_not_exists(&self, parent: BucketId, name: &str) -> StoreResult<BucketId> {
        if let Some(id) = self.bucket(parent, name)? {
            return Ok(id);
        }
        self.inner.execute(
            "INSERT INTO buckets (parent, name) VALUES (?1, ?2)",
            params![parent, name],
        )?;
        Ok(self.inner.last_insert_rowid())
    }

    /// Removes a bucket with everything nested in it. Returns false if it didn't exist.
    pub fn delete_bucket(&self, parent: BucketId, name: &str) -> StoreResult<bool> {
        let deleted = self.inner.execute(
            "DELETE FROM buckets WHERE parent = ?1 AND name = ?2",
            params![parent, name],
        )?;
        Ok(deleted > 0)
    }

    pub fn parent_of(&self, bucket: BucketId) -> StoreResult<Option<BucketId>> {
        Ok(self
            .inner
            .prepare_cached("SELECT parent FROM buckets WHERE id = ?1")?
            .query_row(params![bucket], |row| row.get::<_, Option<BucketId>>(0))
            .optional()?
            .flatten())
    }

    /// Child buckets ordered by name.
    pub fn children(&self, parent: BucketId) -> StoreResult<Vec<(String, BucketId)>> {
        let mut statement = self
            .inner
            .prepare_cached("SELECT name, id FROM buckets WHERE parent = ?1 ORDER BY name")?;
        let rows = statement.query_map(params![parent], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Increments and returns the bucket sequence. The first call returns 1.
    pub fn next_sequence(&self, bucket: BucketId) -> StoreResult<u64> {
        let sequence: i64 = self.inner.query_row(
            "UPDATE buckets SET sequence = sequence + 1 WHERE id = ?1 RETURNING sequence",
            params![bucket],
            |row| row.get(0),
        )?;
        Ok(sequence as u64)
    }

    pub fn get(&self, bucket: BucketId, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .inner
            .prepare_cached("SELECT value FROM entries WHERE bucket = ?1 AND key = ?2")?
            .query_row(params![bucket, key], |row| row.get(0))
            .optional()?)
    }

    pub fn put(&self, bucket: BucketId, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner
            .prepare_cached(
                "INSERT INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![bucket, key, value])?;
        Ok(())
    }

    pub fn delete(&self, bucket: BucketId, key: &[u8]) -> StoreResult<bool> {
        let deleted = self
            .inner
            .prepare_cached("DELETE FROM entries WHERE bucket = ?1 AND key = ?2")?
            .execute(params![bucket, key])?;
        Ok(deleted > 0)
    }

    /// All entries of a bucket in key order.
    pub fn entries(&self, bucket: BucketId) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut statement = self
            .inner
            .prepare_cached("SELECT key, value FROM entries WHERE bucket = ?1 ORDER BY key")?;
        let rows = statement.query_map(params![bucket], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
