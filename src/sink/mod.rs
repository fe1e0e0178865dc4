//! Table sink.
//!
//! Encodes relations as Hive-partitioned Parquet and uploads them below the
//! output root, one directory per table.

pub mod parquet;
pub mod partition;
pub mod table;

pub use table::{TableWriteStats, TableWriter};

use bytes::Bytes;

/// A completed Parquet file, ready for upload.
#[derive(Debug, Clone)]
pub struct FinishedFile {
    /// Path relative to the table root, partition directories included.
    pub filename: String,
    pub size: usize,
    pub record_count: usize,
    pub bytes: Bytes,
}
