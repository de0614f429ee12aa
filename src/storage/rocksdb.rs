//! Shared RocksDB storage utilities.
//!
//! This module provides generic utilities for RocksDB-based storage. It
//! contains no channel-specific logic, just RocksDB helpers.
//!
//! ## Key Features
//!
//! - Configurable RocksDB setup with sensible defaults
//! - Typed get with bincode deserialization
//! - Atomic multi-column-family write batches
//! - Full column family iteration

use crate::error::{ChansyncError, Result};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteBatch,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

// =============================================================================
// RocksDB Configuration
// =============================================================================

/// Configuration for RocksDB storage.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Maximum number of open files.
    pub max_open_files: i32,
    /// Number of log files to keep.
    pub keep_log_file_num: usize,
    /// Maximum WAL size in bytes.
    pub max_wal_size: u64,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Maximum number of write buffers.
    pub max_write_buffer_number: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            max_open_files: 128,
            keep_log_file_num: 2,
            max_wal_size: 32 * 1024 * 1024,      // 32MB
            write_buffer_size: 16 * 1024 * 1024, // 16MB
            max_write_buffer_number: 2,
        }
    }
}

impl RocksDbConfig {
    /// Builds RocksDB Options from this configuration.
    pub fn build_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_keep_log_file_num(self.keep_log_file_num);
        opts.set_max_total_wal_size(self.max_wal_size);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }
}

/// Creates a composite key from two byte slices.
///
/// Format: `{part1}:{part2}` (using colon separator)
pub fn composite_key(part1: &[u8], part2: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(part1.len() + 1 + part2.len());
    key.extend_from_slice(part1);
    key.push(b':');
    key.extend_from_slice(part2);
    key
}

/// One write inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Store raw bytes under a key.
    Put {
        cf: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete { cf: &'static str, key: Vec<u8> },
}

impl BatchOp {
    /// Creates a put of a bincode-serialized value.
    pub fn put<T: Serialize>(cf: &'static str, key: Vec<u8>, value: &T) -> Result<Self> {
        let value = bincode::serialize(value)
            .map_err(|e| ChansyncError::serialization(format!("Failed to serialize: {}", e)))?;
        Ok(Self::Put { cf, key, value })
    }
}

// =============================================================================
// Database Handle Wrapper
// =============================================================================

/// A wrapper around RocksDB that provides common operations.
pub struct RocksDbHandle {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksDbHandle {
    /// Opens a RocksDB database with the given column families.
    pub fn open(
        db_path: impl AsRef<Path>,
        config: &RocksDbConfig,
        column_families: &[&str],
    ) -> Result<Self> {
        let opts = config.build_options();
        let cf_opts = Options::default();

        let cf_descriptors: Vec<_> = column_families
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(*cf, cf_opts.clone()))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            db_path.as_ref(),
            cf_descriptors,
        )
        .map_err(|e| ChansyncError::storage(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Gets a column family handle.
    pub fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ChansyncError::storage(format!("Column family '{}' not found", name)))
    }

    /// Loads and deserializes a value from the given key.
    pub fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;

        match self.db.get_cf(&cf, key) {
            Ok(Some(bytes)) => {
                trace!(
                    cf = cf_name,
                    key_len = key.len(),
                    value_bytes = bytes.len(),
                    "db_get: found record"
                );
                let value: T = bincode::deserialize(&bytes).map_err(|e| {
                    ChansyncError::serialization(format!("Failed to deserialize: {}", e))
                })?;
                Ok(Some(value))
            }
            Ok(None) => {
                trace!(cf = cf_name, key_len = key.len(), "db_get: key not found");
                Ok(None)
            }
            Err(e) => Err(ChansyncError::storage(format!("Failed to read: {}", e))),
        }
    }

    /// Applies all operations atomically: either every write lands or none does.
    pub fn write_batch(&self, ops: &[BatchOp]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    let handle = self.cf(cf)?;
                    batch.put_cf(&handle, key, value);
                }
                BatchOp::Delete { cf, key } => {
                    let handle = self.cf(cf)?;
                    batch.delete_cf(&handle, key);
                }
            }
        }

        trace!(ops = ops.len(), "db_write_batch: committing");

        self.db
            .write(batch)
            .map_err(|e| ChansyncError::storage(format!("Failed to write batch: {}", e)))
    }

    /// Iterates over all entries in a column family.
    ///
    /// The callback receives (key, value) pairs and should return true to continue
    /// or false to stop iteration.
    pub fn iterate_all<F>(&self, cf_name: &str, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let cf = self.cf(cf_name)?;
        let iter = self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start);

        let mut count: usize = 0;
        for item in iter {
            match item {
                Ok((key, value)) => {
                    count += 1;
                    if !callback(&key, &value) {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Iterator error: {}", e);
                }
            }
        }

        debug!(
            cf = cf_name,
            records_iterated = count,
            "db_iterate_all: completed full iteration"
        );

        Ok(())
    }
}

impl std::fmt::Debug for RocksDbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbHandle")
            .field("db", &"RocksDB")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: u64,
    }

    fn create_test_db() -> (RocksDbHandle, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test_db");
        let config = RocksDbConfig::default();
        let db =
            RocksDbHandle::open(&db_path, &config, &["data", "meta"]).expect("Failed to open db");
        (db, temp_dir)
    }

    #[test]
    fn test_composite_key() {
        let key = composite_key(b"part1", b"part2");
        assert_eq!(key, b"part1:part2");
    }

    #[test]
    fn test_batch_put_and_get() {
        let (db, _temp) = create_test_db();

        let data = TestData {
            name: "Test".to_string(),
            value: 12345,
        };

        let ops = vec![
            BatchOp::put("data", b"key1".to_vec(), &data).unwrap(),
            BatchOp::put("meta", b"count".to_vec(), &1u64).unwrap(),
        ];
        db.write_batch(&ops).unwrap();

        let loaded: TestData = db.get("data", b"key1").unwrap().unwrap();
        assert_eq!(loaded, data);
        let count: u64 = db.get("meta", b"count").unwrap().unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_batch_with_unknown_cf_writes_nothing() {
        let (db, _temp) = create_test_db();

        let ops = vec![
            BatchOp::put("data", b"key1".to_vec(), &7u64).unwrap(),
            BatchOp::put("missing_cf", b"key2".to_vec(), &8u64).unwrap(),
        ];
        assert!(db.write_batch(&ops).is_err());

        let loaded: Option<u64> = db.get("data", b"key1").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_delete_in_batch() {
        let (db, _temp) = create_test_db();

        db.write_batch(&[BatchOp::put("meta", b"key".to_vec(), &1u8).unwrap()])
            .unwrap();
        db.write_batch(&[BatchOp::Delete {
            cf: "meta",
            key: b"key".to_vec(),
        }])
        .unwrap();

        let loaded: Option<u8> = db.get("meta", b"key").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_iterate_all() {
        let (db, _temp) = create_test_db();

        let ops: Vec<BatchOp> = (0u8..3)
            .map(|i| BatchOp::put("data", vec![i], &u64::from(i)).unwrap())
            .collect();
        db.write_batch(&ops).unwrap();

        let mut found = Vec::new();
        db.iterate_all("data", |key, _| {
            found.push(key.to_vec());
            true
        })
        .unwrap();

        assert_eq!(found, vec![vec![0u8], vec![1u8], vec![2u8]]);
    }

    #[test]
    fn test_get_missing_key() {
        let (db, _temp) = create_test_db();
        let result: Option<TestData> = db.get("data", b"nonexistent").unwrap();
        assert!(result.is_none());
    }
}
