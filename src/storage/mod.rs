//! Storage utilities and abstractions.
//!
//! ## Modules
//!
//! - `rocksdb`: Generic RocksDB utilities (configuration, handle, atomic batches)

pub mod rocksdb;

pub use rocksdb::{composite_key, BatchOp, RocksDbConfig, RocksDbHandle};
