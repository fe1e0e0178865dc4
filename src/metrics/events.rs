//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a run. Events
//! implement the `InternalEvent` trait, which records the corresponding
//! Prometheus metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Records decoded from one source dataset.
pub struct RecordsRead {
    pub source: &'static str,
    pub count: u64,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(source = self.source, count = self.count, "Records read");
        counter!("starflake_records_read_total", "source" => self.source).increment(self.count);
    }
}

/// Raw (possibly compressed) bytes fetched from the source.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("starflake_bytes_read_total").increment(self.bytes);
    }
}

/// A source file was fully decoded.
pub struct FileRead {
    pub source: &'static str,
}

impl InternalEvent for FileRead {
    fn emit(self) {
        trace!(source = self.source, "File read");
        counter!("starflake_files_read_total", "source" => self.source).increment(1);
    }
}

/// Time spent decompressing one file.
pub struct FileDecompressionCompleted {
    pub duration: Duration,
}

impl InternalEvent for FileDecompressionCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "File decompression completed");
        histogram!("starflake_file_decompression_duration_seconds")
            .record(self.duration.as_secs_f64());
    }
}

/// Rows persisted for an output table.
pub struct TableRowsWritten {
    pub table: &'static str,
    pub rows: u64,
}

impl InternalEvent for TableRowsWritten {
    fn emit(self) {
        trace!(table = self.table, rows = self.rows, "Table rows written");
        counter!("starflake_rows_written_total", "table" => self.table).increment(self.rows);
    }
}

/// A Parquet part file was uploaded.
pub struct ParquetFileWritten {
    pub table: &'static str,
    pub bytes: u64,
}

impl InternalEvent for ParquetFileWritten {
    fn emit(self) {
        trace!(table = self.table, bytes = self.bytes, "Parquet file written");
        counter!("starflake_parquet_files_written_total", "table" => self.table).increment(1);
        counter!("starflake_bytes_written_total", "table" => self.table).increment(self.bytes);
    }
}

/// Time spent closing a Parquet file.
pub struct ParquetWriteCompleted {
    pub duration: Duration,
}

impl InternalEvent for ParquetWriteCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Parquet write completed");
        histogram!("starflake_parquet_write_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// A pipeline stage finished.
pub struct StageCompleted {
    pub stage: &'static str,
    pub duration: Duration,
}

impl InternalEvent for StageCompleted {
    fn emit(self) {
        trace!(
            stage = self.stage,
            duration_ms = self.duration.as_millis(),
            "Stage completed"
        );
        histogram!("starflake_stage_duration_seconds", "stage" => self.stage)
            .record(self.duration.as_secs_f64());
    }
}

/// Storage operation kind.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
    Delete,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
            StorageOperation::Delete => "delete",
        }
    }
}

/// Outcome of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// A storage request was issued.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "starflake_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Latency of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "starflake_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
