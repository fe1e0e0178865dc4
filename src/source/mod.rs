//! Source datasets.
//!
//! Lists every matching file under a prefix, fetches them with bounded
//! concurrency, decodes them on the blocking pool and tags each record with
//! its ingestion ordinal. Files are consumed in sorted path order, so the
//! resulting dataset is identical between runs over the same input.

pub mod reader;

pub use reader::{NdjsonReader, NdjsonReaderConfig, ReadResult};

use datafusion::arrow::array::{ArrayRef, RecordBatch, UInt64Array};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use futures::stream::{self, StreamExt, TryStreamExt};
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::InputConfig;
use crate::emit;
use crate::error::{
    DecodeTaskSnafu, ListSourceSnafu, NoInputFilesSnafu, OrdinalSnafu, ReadSourceSnafu,
    ReaderError,
};
use crate::metrics::events::{FileRead, RecordsRead};
use crate::schema::ORDINAL_COLUMN;
use crate::storage::{StorageProviderRef, list_files};

/// Every record of one source prefix, in ingestion order.
#[derive(Debug, Clone)]
pub struct SourceDataset {
    /// Record schema followed by the ordinal column.
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub files_read: usize,
    pub records_read: usize,
}

/// Loads source datasets from the input storage.
#[derive(Debug, Clone)]
pub struct SourceLoader {
    storage: StorageProviderRef,
    extension: String,
    max_concurrent_files: usize,
    reader_config: NdjsonReaderConfig,
}

impl SourceLoader {
    pub fn new(storage: StorageProviderRef, config: &InputConfig) -> Self {
        Self {
            storage,
            extension: config.extension.clone(),
            max_concurrent_files: config.max_concurrent_files.max(1),
            reader_config: NdjsonReaderConfig::new(config.batch_size, config.compression),
        }
    }

    /// Read every file under `prefix` with the given record schema.
    ///
    /// `source` labels the dataset in metrics. A prefix with no matching
    /// files is an error, as is a listed file that can no longer be fetched.
    pub async fn load(
        &self,
        prefix: &str,
        schema: SchemaRef,
        source: &'static str,
    ) -> Result<SourceDataset, ReaderError> {
        let files = list_files(&self.storage, prefix, &self.extension)
            .await
            .context(ListSourceSnafu { prefix })?;
        ensure!(!files.is_empty(), NoInputFilesSnafu { prefix });

        info!("Reading {} files under {}", files.len(), prefix);
        self.read_files(files, schema, source).await
    }

    /// Fetch and decode `files` in order, tagging records with their
    /// position across the whole list.
    async fn read_files(
        &self,
        files: Vec<String>,
        schema: SchemaRef,
        source: &'static str,
    ) -> Result<SourceDataset, ReaderError> {
        let reader = Arc::new(NdjsonReader::new(
            Arc::clone(&schema),
            self.reader_config.clone(),
        ));

        let results: Vec<(String, ReadResult)> = stream::iter(files)
            .map(|path| {
                let storage = Arc::clone(&self.storage);
                let reader = Arc::clone(&reader);
                async move {
                    let raw = storage
                        .get(path.as_str())
                        .await
                        .context(ReadSourceSnafu { path: path.as_str() })?;
                    let task_path = path.clone();
                    let result = tokio::task::spawn_blocking(move || reader.read(raw, &task_path))
                        .await
                        .context(DecodeTaskSnafu { path: path.as_str() })??;
                    emit!(FileRead { source });
                    Ok::<_, ReaderError>((path, result))
                }
            })
            .buffered(self.max_concurrent_files)
            .try_collect()
            .await?;

        let tagged_schema = with_ordinal_field(&schema);
        let mut batches = Vec::new();
        let mut files_read = 0;
        let mut next_ordinal = 0u64;

        for (path, result) in results {
            files_read += 1;
            for batch in result.batches {
                let rows = batch.num_rows() as u64;
                let tagged = tag_ordinal(&tagged_schema, batch, next_ordinal)
                    .context(OrdinalSnafu { path: path.as_str() })?;
                next_ordinal += rows;
                batches.push(tagged);
            }
        }

        let records_read = next_ordinal as usize;
        emit!(RecordsRead {
            source,
            count: records_read as u64,
        });
        debug!("Loaded {} records from {} {} files", records_read, files_read, source);

        Ok(SourceDataset {
            schema: tagged_schema,
            batches,
            files_read,
            records_read,
        })
    }
}

fn with_ordinal_field(schema: &SchemaRef) -> SchemaRef {
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(ORDINAL_COLUMN, DataType::UInt64, false));
    Arc::new(Schema::new(fields))
}

fn tag_ordinal(
    schema: &SchemaRef,
    batch: RecordBatch,
    start: u64,
) -> Result<RecordBatch, datafusion::arrow::error::ArrowError> {
    let rows = batch.num_rows() as u64;
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    columns.push(Arc::new(UInt64Array::from_iter_values(start..start + rows)));
    RecordBatch::try_new(Arc::clone(schema), columns)
}
