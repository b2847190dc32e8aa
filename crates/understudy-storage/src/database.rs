//! High-level database interface.

use std::path::PathBuf;

use tracing::info;

use crate::cache::SqliteCache;
use crate::error::Result;
use crate::pool::SharedConnection;
use crate::repository::BucketRepo;

/// Single-file database holding any number of named buckets.
#[derive(Clone)]
pub struct Database {
    conn: SharedConnection,
}

impl Database {
    /// Open (or create) a database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening database at: {:?}", path);
        let conn = SharedConnection::open(&path)?;

        Ok(Self { conn })
    }

    /// Create an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = SharedConnection::in_memory()?;
        Ok(Self { conn })
    }

    /// Open a bucket, creating it if needed.
    pub fn bucket(&self, name: &str) -> Result<SqliteCache> {
        {
            let conn = self.conn.lock();
            BucketRepo::ensure(&conn, name)?;
        }
        SqliteCache::new(self.conn.clone(), name)
    }

    /// Names of all buckets created in this database.
    pub fn buckets(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        BucketRepo::list(&conn)
    }
}
