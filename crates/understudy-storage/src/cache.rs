//! The cache capability set and its two implementations.
//!
//! [`SqliteCache`] persists to one bucket of a [`crate::Database`];
//! [`MemoryCache`] keeps everything in process. Both serialize conflicting
//! writes internally, so callers share them freely across threads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StorageError};
use crate::pool::SharedConnection;
use crate::repository::BucketRepo;

/// Ordered key/value byte store.
///
/// Every operation is one atomic unit: a `set` is either fully committed or
/// not visible at all.
pub trait Cache: Send + Sync {
    /// Insert or overwrite a value.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Exact-match lookup; [`StorageError::NotFound`] when absent.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// All values, ordered by key.
    fn get_all_values(&self) -> Result<Vec<Vec<u8>>>;

    /// All entries.
    fn get_all_entries(&self) -> Result<BTreeMap<Vec<u8>, Vec<u8>>>;

    /// Number of stored keys.
    fn records_count(&self) -> Result<usize>;

    /// Remove a key; removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Remove every entry.
    fn delete_data(&self) -> Result<()>;

    /// All keys.
    fn get_all_keys(&self) -> Result<BTreeSet<Vec<u8>>>;
}

/// Cache stored in one bucket of a SQLite database.
#[derive(Clone)]
pub struct SqliteCache {
    conn: SharedConnection,
    bucket: String,
    table: String,
}

impl std::fmt::Debug for SqliteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCache")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl SqliteCache {
    pub(crate) fn new(conn: SharedConnection, bucket: &str) -> Result<Self> {
        Ok(Self {
            conn,
            bucket: bucket.to_string(),
            table: BucketRepo::table_name(bucket)?,
        })
    }

    /// Bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl Cache for SqliteCache {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        BucketRepo::set(&conn, &self.table, key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let conn = self.conn.lock();
        BucketRepo::get(&conn, &self.table, key)?.ok_or_else(|| StorageError::not_found(key))
    }

    fn get_all_values(&self) -> Result<Vec<Vec<u8>>> {
        let conn = self.conn.lock();
        BucketRepo::values(&conn, &self.table)
    }

    fn get_all_entries(&self) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let conn = self.conn.lock();
        Ok(BucketRepo::entries(&conn, &self.table)?.into_iter().collect())
    }

    fn records_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        BucketRepo::count(&conn, &self.table)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        BucketRepo::delete(&conn, &self.table, key)?;
        Ok(())
    }

    fn delete_data(&self) -> Result<()> {
        let conn = self.conn.lock();
        let removed = BucketRepo::clear(&conn, &self.table)?;
        tracing::debug!("Cleared {} entries from bucket {}", removed, self.bucket);
        Ok(())
    }

    fn get_all_keys(&self) -> Result<BTreeSet<Vec<u8>>> {
        let conn = self.conn.lock();
        Ok(BucketRepo::keys(&conn, &self.table)?.into_iter().collect())
    }
}

/// In-process cache; nothing is written to disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    fn get_all_values(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    fn get_all_entries(&self) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        Ok(self.entries.read().clone())
    }

    fn records_count(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn delete_data(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn get_all_keys(&self) -> Result<BTreeSet<Vec<u8>>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
