//! Writes whole tables to the output storage.

use bytes::Bytes;
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::{Schema, SchemaRef};
use futures::stream::{self, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

use super::FinishedFile;
use super::parquet::{ParquetWriter, ParquetWriterConfig};
use super::partition::{PartitionValues, split_by_partition};
use crate::config::{OutputConfig, SaveMode};
use crate::emit;
use crate::error::{
    InvalidPathSnafu, ParquetEncodeSnafu, PartitionSplitSnafu, PrepareTableSnafu, SinkError,
    TableExistsSnafu, UploadSnafu,
};
use crate::metrics::events::{ParquetFileWritten, TableRowsWritten};
use crate::schema::TableSpec;
use crate::storage::StorageProviderRef;

/// Marker written once every part of a table is in place.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Outcome of writing one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableWriteStats {
    pub rows: usize,
    pub files: usize,
    pub bytes: usize,
    pub partitions: usize,
}

/// Persists relations as partitioned Parquet tables.
#[derive(Debug, Clone)]
pub struct TableWriter {
    storage: StorageProviderRef,
    mode: SaveMode,
    parquet_config: ParquetWriterConfig,
    max_concurrent_uploads: usize,
}

impl TableWriter {
    pub fn new(storage: StorageProviderRef, config: &OutputConfig) -> Self {
        let parquet_config = ParquetWriterConfig::default()
            .with_file_size_mb(config.file_size_mb)
            .with_row_group_size_bytes(config.row_group_size_bytes)
            .with_compression(config.compression);
        Self {
            storage,
            mode: config.mode,
            parquet_config,
            max_concurrent_uploads: config.max_concurrent_uploads.max(1),
        }
    }

    /// Write `batches` (all of `schema`) as the table described by `table`.
    ///
    /// Partition columns are moved from the file data into the directory
    /// layout. An empty relation still produces the success marker.
    pub async fn write_table(
        &self,
        table: &TableSpec,
        schema: &SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<TableWriteStats, SinkError> {
        self.prepare(table).await?;

        let partitions = group_by_partition(table, batches)?;
        let partition_count = partitions.len();
        let files = self.encode(table, schema, partitions)?;

        let stats = TableWriteStats {
            rows: files.iter().map(|f| f.record_count).sum(),
            files: files.len(),
            bytes: files.iter().map(|f| f.size).sum(),
            partitions: partition_count,
        };

        stream::iter(files)
            .map(|file| self.upload(table, file))
            .buffer_unordered(self.max_concurrent_uploads)
            .try_collect::<Vec<_>>()
            .await?;

        let marker = format!("{}/{}", table.name, SUCCESS_MARKER);
        self.put(&marker, Bytes::new()).await?;

        emit!(TableRowsWritten {
            table: table.name,
            rows: stats.rows as u64,
        });
        info!(
            "Wrote table {}: {} rows in {} files across {} partitions ({} bytes)",
            table.name, stats.rows, stats.files, stats.partitions, stats.bytes
        );

        Ok(stats)
    }

    async fn prepare(&self, table: &TableSpec) -> Result<(), SinkError> {
        let name = table.name;
        match self.mode {
            SaveMode::ErrorIfExists => {
                let exists = self
                    .storage
                    .has_objects(name)
                    .await
                    .context(PrepareTableSnafu { table: name })?;
                ensure!(!exists, TableExistsSnafu { table: name });
            }
            SaveMode::Overwrite => {
                let removed = self
                    .storage
                    .delete_prefix(name)
                    .await
                    .context(PrepareTableSnafu { table: name })?;
                if removed > 0 {
                    info!("Removed {} existing objects from table {}", removed, name);
                }
            }
            SaveMode::Append => {}
        }
        Ok(())
    }

    fn encode(
        &self,
        table: &TableSpec,
        schema: &SchemaRef,
        partitions: IndexMap<PartitionValues, Vec<RecordBatch>>,
    ) -> Result<Vec<FinishedFile>, SinkError> {
        let data_schema = data_schema(schema, table).context(PartitionSplitSnafu {
            table: table.name,
        })?;
        let mut writer = ParquetWriter::new(data_schema, self.parquet_config.clone())
            .context(ParquetEncodeSnafu { table: table.name })?;

        for (values, batches) in partitions {
            debug!("Encoding {} partition {:?}", table.name, values);
            writer
                .set_partition_context(values)
                .context(ParquetEncodeSnafu { table: table.name })?;
            for batch in &batches {
                writer
                    .write_batch(batch)
                    .context(ParquetEncodeSnafu { table: table.name })?;
            }
        }

        writer
            .close()
            .context(ParquetEncodeSnafu { table: table.name })
    }

    async fn upload(&self, table: &TableSpec, file: FinishedFile) -> Result<(), SinkError> {
        let path = format!("{}/{}", table.name, file.filename);
        self.put(&path, file.bytes).await?;
        emit!(ParquetFileWritten {
            table: table.name,
            bytes: file.size as u64,
        });
        debug!("Uploaded {} ({} records)", path, file.record_count);
        Ok(())
    }

    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), SinkError> {
        let location = Path::parse(path)
            .context(InvalidPathSnafu { path })
            .context(UploadSnafu { path })?;
        self.storage
            .put_payload(&location, PutPayload::from(bytes))
            .await
            .context(UploadSnafu { path })
    }
}

/// Split every batch by the table's partition columns, merging rows of the
/// same partition across batches.
fn group_by_partition(
    table: &TableSpec,
    batches: &[RecordBatch],
) -> Result<IndexMap<PartitionValues, Vec<RecordBatch>>, SinkError> {
    let mut partitions: IndexMap<PartitionValues, Vec<RecordBatch>> = IndexMap::new();
    for batch in batches.iter().filter(|b| b.num_rows() > 0) {
        let parts = split_by_partition(batch, table.partition_columns).context(
            PartitionSplitSnafu {
                table: table.name,
            },
        )?;
        for part in parts {
            partitions.entry(part.values).or_default().push(part.batch);
        }
    }
    Ok(partitions)
}

/// Schema of the file data: the relation schema minus partition columns.
fn data_schema(
    schema: &SchemaRef,
    table: &TableSpec,
) -> Result<SchemaRef, datafusion::arrow::error::ArrowError> {
    for column in table.partition_columns {
        schema.index_of(column)?;
    }
    let fields: Vec<_> = schema
        .fields()
        .iter()
        .filter(|f| !table.partition_columns.contains(&f.name().as_str()))
        .cloned()
        .collect();
    Ok(Arc::new(Schema::new(fields)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParquetCompression;
    use crate::schema::{TIME, USERS};
    use crate::storage::{StorageProvider, list_files};
    use datafusion::arrow::array::{Int32Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field};
    use datafusion::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn output_config(path: &str, mode: SaveMode) -> OutputConfig {
        OutputConfig {
            path: path.to_string(),
            mode,
            file_size_mb: 128,
            row_group_size_bytes: 128 * crate::config::MB,
            compression: ParquetCompression::Snappy,
            max_concurrent_uploads: 2,
            storage_options: HashMap::new(),
        }
    }

    async fn writer(dir: &TempDir, mode: SaveMode) -> (TableWriter, StorageProviderRef) {
        let path = dir.path().to_str().unwrap();
        let storage = Arc::new(
            StorageProvider::for_url_with_options(path, HashMap::new())
                .await
                .unwrap(),
        );
        (
            TableWriter::new(Arc::clone(&storage), &output_config(path, mode)),
            storage,
        )
    }

    fn time_batch() -> (SchemaRef, RecordBatch) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("hour", DataType::Int32, true),
            Field::new("month", DataType::Int32, true),
            Field::new("year", DataType::Int32, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3])),
                Arc::new(Int32Array::from(vec![11, 12, 11])),
                Arc::new(Int32Array::from(vec![2018, 2018, 2018])),
            ],
        )
        .unwrap();
        (schema, batch)
    }

    fn users_batch() -> (SchemaRef, RecordBatch) {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "user_id",
            DataType::Utf8,
            true,
        )]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["42"]))],
        )
        .unwrap();
        (schema, batch)
    }

    #[tokio::test]
    async fn test_partitioned_layout() {
        let dir = TempDir::new().unwrap();
        let (writer, storage) = writer(&dir, SaveMode::ErrorIfExists).await;
        let (schema, batch) = time_batch();

        let stats = writer.write_table(&TIME, &schema, &[batch]).await.unwrap();
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.partitions, 2);
        assert_eq!(stats.files, 2);

        let files = list_files(&storage, "time", "").await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0], "time/_SUCCESS");
        let files = list_files(&storage, "time", ".parquet").await.unwrap();
        assert!(files[0].starts_with("time/year=2018/month=11/part-"));
        assert!(files[1].starts_with("time/year=2018/month=12/part-"));

        let bytes = storage.get(files[0].as_str()).await.unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<_> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches[0].num_columns(), 1);
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn test_error_if_exists() {
        let dir = TempDir::new().unwrap();
        let (writer, _) = writer(&dir, SaveMode::ErrorIfExists).await;
        let (schema, batch) = users_batch();

        writer
            .write_table(&USERS, &schema, std::slice::from_ref(&batch))
            .await
            .unwrap();
        let err = writer
            .write_table(&USERS, &schema, &[batch])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::TableExists { .. }));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_and_append_adds() {
        let dir = TempDir::new().unwrap();
        let (schema, batch) = users_batch();

        let (overwrite, storage) = writer(&dir, SaveMode::Overwrite).await;
        for _ in 0..2 {
            overwrite
                .write_table(&USERS, &schema, std::slice::from_ref(&batch))
                .await
                .unwrap();
        }
        let parts = list_files(&storage, "users", ".parquet").await.unwrap();
        assert_eq!(parts.len(), 1);

        let (append, _) = writer(&dir, SaveMode::Append).await;
        append
            .write_table(&USERS, &schema, std::slice::from_ref(&batch))
            .await
            .unwrap();
        let parts = list_files(&storage, "users", ".parquet").await.unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_relation_writes_marker_only() {
        let dir = TempDir::new().unwrap();
        let (writer, storage) = writer(&dir, SaveMode::ErrorIfExists).await;
        let (schema, _) = time_batch();

        let stats = writer.write_table(&TIME, &schema, &[]).await.unwrap();
        assert_eq!(stats, TableWriteStats::default());
        assert_eq!(
            list_files(&storage, "time", "").await.unwrap(),
            vec!["time/_SUCCESS"]
        );
    }
}
