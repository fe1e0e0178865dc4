//! Main processing pipeline.
//!
//! A run has two independent stages, executed in order:
//! - **Song stage**: song metadata -> `songs`, `artists`
//! - **Log stage**: activity logs -> `users`, `time`, and, joined against a
//!   fresh read of the song metadata, `songplays`
//!
//! Each stage owns its own query session. Any failure aborts the run.

use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::emit;
use crate::error::{PipelineError, PipelineStorageSnafu, ReaderSnafu, SinkSnafu, TransformSnafu};
use crate::metrics::events::StageCompleted;
use crate::schema::{ARTISTS, SONGPLAYS, SONGS, TIME, TableSpec, USERS};
use crate::sink::{TableWriteStats, TableWriter};
use crate::source::{SourceDataset, SourceLoader};
use crate::storage::{StorageProvider, StorageProviderRef};
use crate::transform::logs::{LOG_DATA, load_log_records, register_plays, time_table, users_table};
use crate::transform::songplays::songplays_table;
use crate::transform::songs::{SONG_DATA, artists_table, load_song_records, songs_table};
use crate::transform::{Relation, Session};

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub files_read: usize,
    pub song_records_read: usize,
    pub log_records_read: usize,
    pub parquet_files_written: usize,
    pub bytes_written: usize,
    /// Per-table results, in write order.
    pub tables: Vec<(&'static str, TableWriteStats)>,
}

impl PipelineStats {
    /// Rows written to `table`, if it was written.
    pub fn rows_written(&self, table: &str) -> Option<usize> {
        self.tables
            .iter()
            .find(|(name, _)| *name == table)
            .map(|(_, stats)| stats.rows)
    }

    fn record_source(&mut self, name: &str, dataset: &SourceDataset) {
        self.files_read += dataset.files_read;
        if name == SONG_DATA {
            self.song_records_read += dataset.records_read;
        } else {
            self.log_records_read += dataset.records_read;
        }
    }

    fn record_table(&mut self, name: &'static str, stats: TableWriteStats) {
        self.parquet_files_written += stats.files;
        self.bytes_written += stats.bytes;
        self.tables.push((name, stats));
    }
}

/// Main processing pipeline.
pub struct Pipeline {
    config: Config,
    loader: SourceLoader,
    writer: TableWriter,
    stats: PipelineStats,
}

impl Pipeline {
    /// Create a new pipeline from configuration.
    pub async fn new(config: Config) -> Result<Self, PipelineError> {
        let input: StorageProviderRef = Arc::new(
            StorageProvider::for_url_with_options(
                &config.input.path,
                config.input_storage_options(),
            )
            .await
            .context(PipelineStorageSnafu)?,
        );

        let output: StorageProviderRef = Arc::new(
            StorageProvider::for_output_url(
                &config.output.path,
                config.output_storage_options(),
            )
            .await
            .context(PipelineStorageSnafu)?,
        );

        debug!(
            "Input at {}, output at {}",
            input.canonical_url(),
            output.canonical_url()
        );

        let loader = SourceLoader::new(input, &config.input);
        let writer = TableWriter::new(output, &config.output);

        Ok(Self {
            config,
            loader,
            writer,
            stats: PipelineStats::default(),
        })
    }

    /// Run both stages.
    pub async fn run(&mut self) -> Result<PipelineStats, PipelineError> {
        info!("Starting pipeline");

        self.process_song_data().await?;
        self.process_log_data().await?;

        info!("Pipeline completed: {:?}", self.stats);
        Ok(self.stats.clone())
    }

    /// Build and write `songs` and `artists`.
    pub async fn process_song_data(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let session = Session::new();
        self.register_songs(&session).await?;

        let songs = songs_table(&session).await.context(TransformSnafu)?;
        self.write(&SONGS, songs).await?;

        let artists = artists_table(&session).await.context(TransformSnafu)?;
        self.write(&ARTISTS, artists).await?;

        emit!(StageCompleted {
            stage: "song_data",
            duration: start.elapsed(),
        });
        info!("Song stage finished in {:?}", start.elapsed());
        Ok(())
    }

    /// Build and write `users`, `time` and `songplays`.
    pub async fn process_log_data(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let session = Session::new();

        let logs = load_log_records(&self.loader, &self.config.input.log_prefix)
            .await
            .context(ReaderSnafu)?;
        self.stats.record_source(LOG_DATA, &logs);
        register_plays(
            &session,
            Relation::from_source(LOG_DATA, logs),
            &self.config.transform.time_zone,
        )
        .await
        .context(TransformSnafu)?;

        let users = users_table(&session).await.context(TransformSnafu)?;
        self.write(&USERS, users).await?;

        let time = time_table(&session).await.context(TransformSnafu)?;
        self.write(&TIME, time).await?;

        self.register_songs(&session).await?;
        let songplays = songplays_table(&session, self.config.transform.duration_tolerance)
            .await
            .context(TransformSnafu)?;
        self.write(&SONGPLAYS, songplays).await?;

        emit!(StageCompleted {
            stage: "log_data",
            duration: start.elapsed(),
        });
        info!("Log stage finished in {:?}", start.elapsed());
        Ok(())
    }

    async fn register_songs(&mut self, session: &Session) -> Result<(), PipelineError> {
        let songs = load_song_records(&self.loader, &self.config.input.song_prefix)
            .await
            .context(ReaderSnafu)?;
        self.stats.record_source(SONG_DATA, &songs);
        session
            .register(&Relation::from_source(SONG_DATA, songs))
            .context(TransformSnafu)
    }

    async fn write(&mut self, table: &TableSpec, relation: Relation) -> Result<(), PipelineError> {
        let stats = self
            .writer
            .write_table(table, &relation.schema, &relation.batches)
            .await
            .context(SinkSnafu)?;
        self.stats.record_table(table.name, stats);
        Ok(())
    }
}

/// Run the pipeline to completion.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    let mut pipeline = Pipeline::new(config).await?;
    pipeline.run().await
}
