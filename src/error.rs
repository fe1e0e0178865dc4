//! Error types for starflake using snafu.
//!
//! Each concern (storage, configuration, source reading, query execution,
//! Parquet encoding, table writing, metrics) has its own error enum with
//! context selectors. They are aggregated into [`PipelineError`], which is
//! what the entry point reports.

use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// Object path is not a valid store location.
    #[snafu(display("Invalid object path: {path}"))]
    InvalidPath {
        source: object_store::path::Error,
        path: String,
    },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Input root is empty.
    #[snafu(display("Input path cannot be empty"))]
    EmptyInputPath,

    /// Output root is empty.
    #[snafu(display("Output path cannot be empty"))]
    EmptyOutputPath,

    /// Batch size must be positive.
    #[snafu(display("Input batch size must be greater than zero"))]
    InvalidBatchSize,

    /// Join tolerance must be a finite, non-negative number.
    #[snafu(display("Duration tolerance must be finite and non-negative, got {value}"))]
    InvalidTolerance { value: f64 },

    /// Unrecognised time zone specification.
    #[snafu(display(
        "Invalid time zone '{value}': expected 'local', 'utc' or an offset like '+05:30'"
    ))]
    InvalidTimeZone { value: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Reader Errors ============

/// Errors that can occur while locating and decoding source records.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// Listing the source prefix failed.
    #[snafu(display("Failed to list source files under '{prefix}'"))]
    ListSource {
        source: StorageError,
        prefix: String,
    },

    /// The source prefix holds no matching files.
    #[snafu(display("No source files found under '{prefix}'"))]
    NoInputFiles { prefix: String },

    /// Fetching a source file failed.
    #[snafu(display("Failed to read source file {path}"))]
    ReadSource { source: StorageError, path: String },

    /// Gzip decompression failed.
    #[snafu(display("Gzip decompression failed for {path}"))]
    GzipDecompression {
        source: std::io::Error,
        path: String,
    },

    /// Zstd decompression failed.
    #[snafu(display("Zstd decompression failed for {path}"))]
    ZstdDecompression {
        source: std::io::Error,
        path: String,
    },

    /// Failed to build JSON decoder.
    #[snafu(display("Failed to build JSON decoder: {message}"))]
    DecoderBuild { message: String },

    /// Failed to decode JSON.
    #[snafu(display("Failed to decode JSON for {path}: {message}"))]
    JsonDecode { path: String, message: String },

    /// Failed to flush decoded rows into a batch.
    #[snafu(display("Failed to flush batch for {path}: {message}"))]
    BatchFlush { path: String, message: String },

    /// Trailing bytes could not be parsed as JSON.
    #[snafu(display("Unparseable trailing content in {path} ({bytes} bytes)"))]
    TrailingContent { path: String, bytes: usize },

    /// The blocking decode task panicked or was cancelled.
    #[snafu(display("Decode task failed for {path}"))]
    DecodeTask {
        source: tokio::task::JoinError,
        path: String,
    },

    /// Failed to attach the ingestion ordinal column.
    #[snafu(display("Failed to tag records from {path}"))]
    Ordinal { source: ArrowError, path: String },
}

// ============ Transform Errors ============

/// Errors raised while deriving tables through the query engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// A query or registration failed.
    #[snafu(display("Query failed while building '{stage}'"))]
    Query {
        source: DataFusionError,
        stage: String,
    },

    /// An Arrow kernel failed.
    #[snafu(display("Arrow compute failed while building '{stage}'"))]
    ArrowCompute { source: ArrowError, stage: String },

    /// A required column is missing or has an unexpected type.
    #[snafu(display("Column '{column}' is missing or mistyped in '{stage}'"))]
    ColumnType { column: String, stage: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to bind the metrics endpoint.
    #[snafu(display("Failed to bind metrics endpoint to {addr}"))]
    Bind {
        source: std::io::Error,
        addr: std::net::SocketAddr,
    },

    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Parquet Errors ============

/// Errors that can occur during Parquet file writing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ParquetError {
    /// Parquet write error.
    #[snafu(display("Parquet write error"))]
    Write {
        source: datafusion::parquet::errors::ParquetError,
    },

    /// Failed to create Parquet writer.
    #[snafu(display("Failed to create Parquet writer"))]
    WriterCreate {
        source: datafusion::parquet::errors::ParquetError,
    },

    /// Writer is not available (internal state error).
    #[snafu(display("Parquet writer is not available"))]
    WriterUnavailable,

    /// Buffer lock error (mutex poisoned).
    #[snafu(display("Buffer lock failed: mutex poisoned"))]
    BufferLock,

    /// Buffer has outstanding references and cannot be consumed.
    #[snafu(display("Buffer has outstanding references"))]
    BufferInUse,
}

// ============ Sink Errors ============

/// Errors that can occur while persisting a table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// The table already has output and the save mode forbids replacing it.
    #[snafu(display("Output table '{table}' already exists"))]
    TableExists { table: String },

    /// Checking or clearing existing output failed.
    #[snafu(display("Failed to prepare output location for '{table}'"))]
    PrepareTable { source: StorageError, table: String },

    /// Splitting rows by partition value failed.
    #[snafu(display("Failed to partition rows of '{table}'"))]
    PartitionSplit { source: ArrowError, table: String },

    /// Encoding Parquet failed.
    #[snafu(display("Failed to encode '{table}' as Parquet"))]
    ParquetEncode { source: ParquetError, table: String },

    /// Uploading a finished file failed.
    #[snafu(display("Failed to upload {path}"))]
    Upload { source: StorageError, path: String },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Reader error.
    #[snafu(display("Reader error"))]
    Reader { source: ReaderError },

    /// Transform error.
    #[snafu(display("Transform error"))]
    Transform { source: TransformError },

    /// Sink error.
    #[snafu(display("Sink error"))]
    Sink { source: SinkError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}
