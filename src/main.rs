//! starflake: loads song metadata and activity logs into a Parquet star schema.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use starflake::config::Config;
use starflake::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use starflake::schema::ALL_TABLES;
use starflake::{metrics, run_pipeline};

/// Song play star schema loader.
#[derive(Parser, Debug)]
#[command(name = "starflake")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration and print the plan without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("starflake starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        let bound = metrics::init(addr).await.context(MetricsSnafu)?;
        debug!("Metrics endpoint listening on http://{}/metrics", bound);
    }

    if args.dry_run {
        print_plan(&config);
        info!("Configuration is valid");
        return Ok(());
    }

    let stats = run_pipeline(config).await?;

    info!("Pipeline completed successfully");
    info!("  Files read: {}", stats.files_read);
    info!("  Song records read: {}", stats.song_records_read);
    info!("  Log records read: {}", stats.log_records_read);
    for (table, table_stats) in &stats.tables {
        info!(
            "  {}: {} rows, {} files",
            table, table_stats.rows, table_stats.files
        );
    }
    info!("  Parquet files written: {}", stats.parquet_files_written);
    info!("  Bytes written: {}", stats.bytes_written);

    Ok(())
}

fn print_plan(config: &Config) {
    info!("Dry run mode - validating configuration");
    info!(
        "Song data: {}/{}",
        config.input.path.trim_end_matches('/'),
        config.input.song_prefix
    );
    info!(
        "Log data: {}/{}",
        config.input.path.trim_end_matches('/'),
        config.input.log_prefix
    );
    info!("Output: {} (mode: {:?})", config.output.path, config.output.mode);
    info!("Time zone: {}", config.transform.time_zone);
    match config.transform.duration_tolerance {
        Some(tolerance) => info!("Duration match tolerance: {}", tolerance),
        None => info!("Duration match: exact"),
    }
    for table in ALL_TABLES {
        if table.is_partitioned() {
            info!(
                "  - {} partitioned by ({})",
                table.name,
                table.partition_columns.join(", ")
            );
        } else {
            info!("  - {}", table.name);
        }
    }
}
