//! Understudy Storage - persistent key/value cache.
//!
//! A single SQLite file holds any number of named buckets. Each bucket is
//! exposed through the [`Cache`] trait, which the proxy uses for recorded
//! request/response pairs and for free-form metadata. [`MemoryCache`]
//! implements the same trait without touching disk.
//!
//! # Example
//!
//! ```no_run
//! use understudy_storage::{Cache, Database};
//!
//! let db = Database::with_path("requests.db").unwrap();
//! let requests = db.bucket("requests").unwrap();
//!
//! requests.set(b"key", b"value").unwrap();
//! assert_eq!(requests.get(b"key").unwrap(), b"value");
//! assert_eq!(requests.records_count().unwrap(), 1);
//! ```

mod cache;
mod database;
pub mod error;
mod pool;
pub mod repository;
mod schema;

pub use cache::{Cache, MemoryCache, SqliteCache};
pub use database::Database;
pub use error::{Result, StorageError};

/// Bucket holding recorded request/response pairs.
pub const REQUESTS_BUCKET: &str = "requests";

/// Bucket holding metadata entries.
pub const METADATA_BUCKET: &str = "metadata";
