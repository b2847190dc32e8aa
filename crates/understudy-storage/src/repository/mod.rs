//! Repository implementations for database operations.

mod bucket;

pub use bucket::BucketRepo;
