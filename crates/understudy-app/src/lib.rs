//! Understudy - record, replay and rewrite HTTP(S) traffic.
//!
//! This crate holds the process wiring behind the `understudy` binary:
//!
//! - Command line and environment configuration ([`cli`])
//! - Cache backend selection ([`open_caches`])

pub mod cli;

use std::sync::Arc;

use understudy_storage::{Cache, Database, MemoryCache, METADATA_BUCKET, REQUESTS_BUCKET};

pub use cli::{Args, Backend, ConfigError};

/// Request and metadata caches for the chosen backend.
pub struct Caches {
    pub requests: Arc<dyn Cache>,
    pub metadata: Arc<dyn Cache>,
}

/// Opens the request and metadata caches.
pub fn open_caches(args: &Args) -> understudy_storage::Result<Caches> {
    match args.db {
        Backend::Memory => {
            tracing::info!("Using in-memory cache");
            Ok(Caches {
                requests: Arc::new(MemoryCache::new()),
                metadata: Arc::new(MemoryCache::new()),
            })
        }
        Backend::Sqlite => {
            let db = Database::with_path(&args.db_path)?;
            tracing::info!("Database opened at {:?}", args.db_path);
            Ok(Caches {
                requests: Arc::new(db.bucket(REQUESTS_BUCKET)?),
                metadata: Arc::new(db.bucket(METADATA_BUCKET)?),
            })
        }
    }
}
