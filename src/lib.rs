//! starflake: builds a star schema from song metadata and activity logs.
//!
//! Reads newline-delimited JSON song and log records from local or S3
//! storage, derives the `songs`, `artists`, `users`, `time` and `songplays`
//! tables with DataFusion, and writes them as Hive-partitioned Parquet.
//!
//! # Example
//!
//! ```ignore
//! use starflake::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Wrote {} Parquet files", stats.parquet_files_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transform;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use storage::{StorageProvider, StorageProviderRef};
