//! Configuration parsing and validation.
//!
//! Handles loading the run configuration from a YAML file (with environment
//! variable interpolation) and derives the storage options handed to the
//! input and output backends.

mod time_zone;
mod vars;

pub use time_zone::TimeZoneConfig;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyInputPathSnafu, EmptyOutputPathSnafu, EnvInterpolationSnafu,
    InvalidBatchSizeSnafu, InvalidToleranceSnafu, ReadFileSnafu, YamlParseSnafu,
};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Main configuration structure for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub input: InputConfig,
    pub output: OutputConfig,
    /// Object store credentials shared by input and output.
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Access key pair for S3-compatible storage.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &"***")
            .finish()
    }
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus endpoint is started (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Where the raw song metadata and activity logs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Root location of both datasets.
    /// Examples: "s3a://bucket/", "/data/raw"
    pub path: String,

    /// Sub-prefix holding song metadata files (default: "song_data").
    #[serde(default = "default_song_prefix")]
    pub song_prefix: String,

    /// Sub-prefix holding activity log files (default: "log_data").
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,

    /// Only files ending with this suffix are read (default: ".json").
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Compression format of input files.
    #[serde(default)]
    pub compression: CompressionFormat,

    /// Batch size for decoding records (default: 8192)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum number of files fetched concurrently (default: 8)
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Storage options (region, endpoint, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_song_prefix() -> String {
    "song_data".to_string()
}

fn default_log_prefix() -> String {
    "log_data".to_string()
}

fn default_extension() -> String {
    ".json".to_string()
}

fn default_batch_size() -> usize {
    8192
}

fn default_max_concurrent_files() -> usize {
    8
}

/// Where and how the star schema tables are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root location; each table becomes a directory below it.
    pub path: String,

    /// Behaviour when a table directory already holds data.
    #[serde(default)]
    pub mode: SaveMode,

    /// Target file size in MB (default: 128)
    #[serde(default = "default_file_size_mb")]
    pub file_size_mb: usize,

    /// Target row group size in bytes (default: 128MB)
    #[serde(default = "default_row_group_size_bytes")]
    pub row_group_size_bytes: usize,

    /// Parquet compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,

    /// Maximum number of files uploaded concurrently (default: 4)
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Storage options (region, endpoint, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_max_concurrent_uploads() -> usize {
    4
}

fn default_file_size_mb() -> usize {
    128
}

fn default_row_group_size_bytes() -> usize {
    128 * MB
}

/// Knobs for the derivations that the source data leaves open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Zone used to turn epoch milliseconds into wall-clock start times.
    #[serde(default)]
    pub time_zone: TimeZoneConfig,

    /// Absolute tolerance for matching log `length` to song `duration`.
    /// Unset means bit-exact equality.
    #[serde(default)]
    pub duration_tolerance: Option<f64>,
}

/// What to do when an output table already exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Fail the run.
    #[default]
    ErrorIfExists,
    /// Delete the existing table contents first.
    Overwrite,
    /// Add new files next to the existing ones.
    Append,
}

/// Compression format for source files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    None,
    Gzip,
    Zstd,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            let result = vars::interpolate(content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.input.path.is_empty(), EmptyInputPathSnafu);
        ensure!(!self.output.path.is_empty(), EmptyOutputPathSnafu);
        ensure!(self.input.batch_size > 0, InvalidBatchSizeSnafu);
        if let Some(value) = self.transform.duration_tolerance {
            ensure!(
                value.is_finite() && value >= 0.0,
                InvalidToleranceSnafu { value }
            );
        }
        Ok(())
    }

    /// Storage options for the input backend, credentials included.
    pub fn input_storage_options(&self) -> HashMap<String, String> {
        self.with_credentials(&self.input.storage_options)
    }

    /// Storage options for the output backend, credentials included.
    pub fn output_storage_options(&self) -> HashMap<String, String> {
        self.with_credentials(&self.output.storage_options)
    }

    fn with_credentials(&self, options: &HashMap<String, String>) -> HashMap<String, String> {
        let mut options = options.clone();
        if let Some(creds) = &self.credentials {
            options
                .entry("aws_access_key_id".to_string())
                .or_insert_with(|| creds.aws_access_key_id.clone());
            options
                .entry("aws_secret_access_key".to_string())
                .or_insert_with(|| creds.aws_secret_access_key.clone());
        }
        options
    }
}
