//! Bucket repository.
//!
//! A bucket is a key/value table named `bucket_<name>`. Keys and values are
//! opaque blobs; enumeration is ordered by key.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StorageError};

/// Repository for bucket operations.
pub struct BucketRepo;

impl BucketRepo {
    /// Table name for a bucket, validating the bucket name.
    pub fn table_name(bucket: &str) -> Result<String> {
        let valid = !bucket.is_empty()
            && bucket
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StorageError::InvalidBucket(bucket.to_string()));
        }
        Ok(format!("bucket_{}", bucket))
    }

    /// Create the bucket table if it does not exist and register it.
    pub fn ensure(conn: &Connection, bucket: &str) -> Result<()> {
        let table = Self::table_name(bucket)?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    key BLOB PRIMARY KEY,
                    value BLOB NOT NULL
                )",
                table
            ),
            [],
        )?;
        conn.execute(
            "INSERT INTO buckets (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            [bucket],
        )?;
        Ok(())
    }

    /// List registered buckets.
    pub fn list(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT name FROM buckets ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Insert or replace a value.
    pub fn set(conn: &Connection, table: &str, key: &[u8], value: &[u8]) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                table
            ),
            params![key, value],
        )?;
        Ok(())
    }

    /// Get a value by exact key.
    pub fn get(conn: &Connection, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", table),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Get all key/value rows ordered by key.
    pub fn entries(conn: &Connection, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut stmt = conn.prepare(&format!("SELECT key, value FROM {} ORDER BY key", table))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Get all values ordered by key.
    pub fn values(conn: &Connection, table: &str) -> Result<Vec<Vec<u8>>> {
        let mut stmt = conn.prepare(&format!("SELECT value FROM {} ORDER BY key", table))?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Get all keys ordered by key.
    pub fn keys(conn: &Connection, table: &str) -> Result<Vec<Vec<u8>>> {
        let mut stmt = conn.prepare(&format!("SELECT key FROM {} ORDER BY key", table))?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count rows.
    pub fn count(conn: &Connection, table: &str) -> Result<usize> {
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    /// Delete a key. Returns whether a row was removed.
    pub fn delete(conn: &Connection, table: &str, key: &[u8]) -> Result<bool> {
        let deleted = conn.execute(&format!("DELETE FROM {} WHERE key = ?1", table), [key])?;
        Ok(deleted > 0)
    }

    /// Delete every row. Returns the number of rows removed.
    pub fn clear(conn: &Connection, table: &str) -> Result<usize> {
        let deleted = conn.execute(&format!("DELETE FROM {}", table), [])?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;

    fn setup_db() -> (Connection, String) {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        BucketRepo::ensure(&conn, "requests").unwrap();
        (conn, BucketRepo::table_name("requests").unwrap())
    }

    #[test]
    fn test_table_name_validation() {
        assert_eq!(BucketRepo::table_name("requests").unwrap(), "bucket_requests");
        assert!(BucketRepo::table_name("").is_err());
        assert!(BucketRepo::table_name("a; DROP TABLE x").is_err());
        assert!(BucketRepo::table_name("with-dash").is_err());
    }

    #[test]
    fn test_ensure_registers_bucket_once() {
        let (conn, _) = setup_db();
        BucketRepo::ensure(&conn, "requests").unwrap();
        BucketRepo::ensure(&conn, "metadata").unwrap();
        assert_eq!(BucketRepo::list(&conn).unwrap(), vec!["metadata", "requests"]);
    }

    #[test]
    fn test_set_and_get() {
        let (conn, table) = setup_db();
        BucketRepo::set(&conn, &table, b"k", b"v").unwrap();
        assert_eq!(BucketRepo::get(&conn, &table, b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(BucketRepo::get(&conn, &table, b"missing").unwrap(), None);
    }

    #[test]
    fn test_update_existing() {
        let (conn, table) = setup_db();
        BucketRepo::set(&conn, &table, b"k", b"v1").unwrap();
        BucketRepo::set(&conn, &table, b"k", b"v2").unwrap();
        assert_eq!(BucketRepo::get(&conn, &table, b"k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(BucketRepo::count(&conn, &table).unwrap(), 1);
    }

    #[test]
    fn test_enumeration_is_ordered_by_key() {
        let (conn, table) = setup_db();
        BucketRepo::set(&conn, &table, b"b", b"2").unwrap();
        BucketRepo::set(&conn, &table, b"a", b"1").unwrap();
        BucketRepo::set(&conn, &table, b"c", b"3").unwrap();

        assert_eq!(
            BucketRepo::keys(&conn, &table).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(
            BucketRepo::values(&conn, &table).unwrap(),
            vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
        );
        assert_eq!(BucketRepo::entries(&conn, &table).unwrap()[0], (b"a".to_vec(), b"1".to_vec()));
    }

    #[test]
    fn test_delete_and_clear() {
        let (conn, table) = setup_db();
        BucketRepo::set(&conn, &table, b"a", b"1").unwrap();
        BucketRepo::set(&conn, &table, b"b", b"2").unwrap();

        assert!(BucketRepo::delete(&conn, &table, b"a").unwrap());
        assert!(!BucketRepo::delete(&conn, &table, b"a").unwrap());
        assert_eq!(BucketRepo::clear(&conn, &table).unwrap(), 1);
        assert_eq!(BucketRepo::count(&conn, &table).unwrap(), 0);
    }
}
