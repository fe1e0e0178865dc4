//! Parquet file writer.
//!
//! Encodes Arrow RecordBatches into in-memory Parquet files with
//! configurable compression, rolling to a new file when the size limit is
//! reached or the partition changes.

use bytes::{BufMut, Bytes, BytesMut};
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::parquet::arrow::ArrowWriter;
use datafusion::parquet::basic::{Compression, GzipLevel, ZstdLevel};
use datafusion::parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::FinishedFile;
use super::partition::{PartitionValues, partition_path};
use crate::config::{MB, ParquetCompression};
use crate::emit;
use crate::error::{
    BufferInUseSnafu, BufferLockSnafu, ParquetError, WriteSnafu, WriterCreateSnafu,
    WriterUnavailableSnafu,
};
use crate::metrics::events::ParquetWriteCompleted;

/// Upper bound on the up-front buffer allocation per file.
const MAX_INITIAL_BUFFER: usize = 8 * MB;

/// A buffer with interior mutability for the ArrowWriter.
#[derive(Clone)]
struct SharedBuffer {
    buffer: Arc<Mutex<bytes::buf::Writer<BytesMut>>>,
}

impl SharedBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(BytesMut::with_capacity(capacity).writer())),
        }
    }

    fn into_inner(self) -> Result<BytesMut, ParquetError> {
        let mutex = Arc::into_inner(self.buffer).context(BufferInUseSnafu)?;
        let writer = mutex.into_inner().map_err(|_| BufferLockSnafu.build())?;
        Ok(writer.into_inner())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.try_lock().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::WouldBlock, "buffer lock contention")
        })?;
        Write::write(&mut *buffer, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Configuration for the Parquet writer.
#[derive(Debug, Clone)]
pub struct ParquetWriterConfig {
    /// Files are rolled once they reach this size in bytes.
    pub target_file_size: usize,
    /// Row groups are flushed when the in-progress size exceeds this.
    pub row_group_size_bytes: usize,
    pub compression: ParquetCompression,
}

impl Default for ParquetWriterConfig {
    fn default() -> Self {
        Self {
            target_file_size: 128 * MB,
            row_group_size_bytes: 128 * MB,
            compression: ParquetCompression::Snappy,
        }
    }
}

impl ParquetWriterConfig {
    pub fn with_file_size_mb(mut self, size_mb: usize) -> Self {
        self.target_file_size = size_mb * MB;
        self
    }

    pub fn with_compression(mut self, compression: ParquetCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_row_group_size_bytes(mut self, size_bytes: usize) -> Self {
        self.row_group_size_bytes = size_bytes;
        self
    }
}

/// Writes batches of one schema into a sequence of Parquet files.
pub struct ParquetWriter {
    schema: SchemaRef,
    config: ParquetWriterConfig,
    writer: Option<ArrowWriter<SharedBuffer>>,
    buffer: SharedBuffer,
    current_file_name: String,
    records_written: usize,
    finished_files: Vec<FinishedFile>,
    current_partition_values: PartitionValues,
}

impl ParquetWriter {
    pub fn new(schema: SchemaRef, config: ParquetWriterConfig) -> Result<Self, ParquetError> {
        debug!(
            "Creating ParquetWriter: target_file_size={} bytes, row_group_size_bytes={}, compression={:?}",
            config.target_file_size, config.row_group_size_bytes, config.compression
        );
        let buffer = SharedBuffer::new(initial_capacity(&config));
        let writer = Self::create_writer(&schema, &config, buffer.clone())?;
        let partition_values = PartitionValues::new();
        let current_file_name = Self::generate_filename(&partition_values);

        Ok(Self {
            schema,
            config,
            writer: Some(writer),
            buffer,
            current_file_name,
            records_written: 0,
            finished_files: Vec::new(),
            current_partition_values: partition_values,
        })
    }

    fn create_writer(
        schema: &SchemaRef,
        config: &ParquetWriterConfig,
        buffer: SharedBuffer,
    ) -> Result<ArrowWriter<SharedBuffer>, ParquetError> {
        let writer_properties = Self::writer_properties(config);

        ArrowWriter::try_new(buffer, schema.clone(), Some(writer_properties))
            .context(WriterCreateSnafu)
    }

    fn writer_properties(config: &ParquetWriterConfig) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(match config.compression {
                ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
                ParquetCompression::Snappy => Compression::SNAPPY,
                ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
                ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
                ParquetCompression::Lz4 => Compression::LZ4_RAW,
            })
            .build()
    }

    /// File name relative to the table root, e.g.
    /// `year=2018/month=11/part-<uuid>.parquet`.
    fn generate_filename(partition_values: &PartitionValues) -> String {
        let uuid = Uuid::now_v7();
        if partition_values.is_empty() {
            format!("part-{uuid}.parquet")
        } else {
            format!("{}/part-{uuid}.parquet", partition_path(partition_values))
        }
    }

    /// Direct subsequent writes to the given partition.
    ///
    /// When the partition changes the current file is closed, so no file
    /// ever mixes rows from two partitions.
    pub fn set_partition_context(
        &mut self,
        partition_values: PartitionValues,
    ) -> Result<(), ParquetError> {
        if partition_values == self.current_partition_values {
            return Ok(());
        }
        if self.records_written > 0 {
            debug!(
                "Partition changed from {:?} to {:?}, rolling file",
                self.current_partition_values, partition_values
            );
            self.roll_file()?;
        }

        self.current_partition_values = partition_values;
        self.current_file_name = Self::generate_filename(&self.current_partition_values);
        Ok(())
    }

    /// Write a batch to the current file.
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), ParquetError> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let writer = self.writer.as_mut().context(WriterUnavailableSnafu)?;

        writer.write(batch).context(WriteSnafu)?;
        self.records_written += batch.num_rows();

        if writer.in_progress_size() > self.config.row_group_size_bytes {
            writer.flush().context(WriteSnafu)?;
        }

        let current_size = self.current_file_size();
        if current_size >= self.config.target_file_size {
            debug!(
                "Rolling file at {} bytes ({} records)",
                current_size, self.records_written
            );
            self.roll_file()?;
        }

        Ok(())
    }

    fn roll_file(&mut self) -> Result<(), ParquetError> {
        let buffer = std::mem::replace(
            &mut self.buffer,
            SharedBuffer::new(initial_capacity(&self.config)),
        );
        let bytes = self.finish_current(buffer)?;
        self.push_finished(bytes);

        self.writer = Some(Self::create_writer(
            &self.schema,
            &self.config,
            self.buffer.clone(),
        )?);
        self.current_file_name = Self::generate_filename(&self.current_partition_values);
        self.records_written = 0;

        Ok(())
    }

    fn finish_current(&mut self, buffer: SharedBuffer) -> Result<Bytes, ParquetError> {
        let start = Instant::now();
        let writer = self.writer.take().context(WriterUnavailableSnafu)?;
        writer.close().context(WriteSnafu)?;
        let bytes = buffer.into_inner()?.freeze();
        emit!(ParquetWriteCompleted {
            duration: start.elapsed()
        });
        Ok(bytes)
    }

    fn push_finished(&mut self, bytes: Bytes) {
        self.finished_files.push(FinishedFile {
            filename: self.current_file_name.clone(),
            size: bytes.len(),
            record_count: self.records_written,
            bytes,
        });
    }

    /// Close the current file and return every finished file.
    pub fn close(mut self) -> Result<Vec<FinishedFile>, ParquetError> {
        if self.records_written > 0 {
            let buffer = std::mem::replace(&mut self.buffer, SharedBuffer::new(0));
            let bytes = self.finish_current(buffer)?;
            self.push_finished(bytes);
        }
        Ok(self.finished_files)
    }

    /// Size of the current file: encoded row groups plus the row group
    /// still being buffered.
    fn current_file_size(&self) -> usize {
        self.writer
            .as_ref()
            .map(|w| w.bytes_written() + w.in_progress_size())
            .unwrap_or(0)
    }
}

fn initial_capacity(config: &ParquetWriterConfig) -> usize {
    config.target_file_size.min(MAX_INITIAL_BUFFER)
}
