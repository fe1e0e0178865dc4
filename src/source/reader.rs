//! NDJSON record reader.
//!
//! Decodes one source file (optionally gzip or zstd compressed) into Arrow
//! record batches using a declared schema. Song metadata files hold a single
//! JSON object and activity logs hold one object per line; both are valid
//! input for the streaming decoder.

use bytes::Bytes;
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::json::ReaderBuilder;
use snafu::prelude::*;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::CompressionFormat;
use crate::emit;
use crate::error::{
    BatchFlushSnafu, DecoderBuildSnafu, GzipDecompressionSnafu, JsonDecodeSnafu, ReaderError,
    TrailingContentSnafu, ZstdDecompressionSnafu,
};
use crate::metrics::events::{BytesRead, FileDecompressionCompleted};

/// Configuration for the NDJSON reader.
#[derive(Debug, Clone)]
pub struct NdjsonReaderConfig {
    /// Number of records per batch.
    pub batch_size: usize,
    /// Compression format of input files.
    pub compression: CompressionFormat,
}

impl NdjsonReaderConfig {
    pub fn new(batch_size: usize, compression: CompressionFormat) -> Self {
        Self {
            batch_size,
            compression,
        }
    }
}

/// Result of reading and parsing a file.
#[derive(Debug)]
pub struct ReadResult {
    pub batches: Vec<RecordBatch>,
    pub total_records: usize,
}

/// Decodes NDJSON bytes into record batches of a fixed schema.
///
/// Fields absent from the schema are ignored. Numbers arriving where the
/// schema expects a string (a numeric `userId`, say) are kept as their
/// textual form.
#[derive(Debug)]
pub struct NdjsonReader {
    schema: SchemaRef,
    config: NdjsonReaderConfig,
}

impl NdjsonReader {
    pub fn new(schema: SchemaRef, config: NdjsonReaderConfig) -> Self {
        Self { schema, config }
    }

    /// Decompress `raw` and decode every record it holds.
    ///
    /// Content left over after the last complete record must be whitespace;
    /// anything else fails the read.
    pub fn read(&self, raw: Bytes, path: &str) -> Result<ReadResult, ReaderError> {
        emit!(BytesRead {
            bytes: raw.len() as u64,
        });

        let decompress_start = Instant::now();
        let decompressed: Bytes = match self.config.compression {
            CompressionFormat::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
                let mut buf = Vec::new();
                decoder
                    .read_to_end(&mut buf)
                    .context(GzipDecompressionSnafu { path })?;
                buf.into()
            }
            CompressionFormat::Zstd => zstd::decode_all(&raw[..])
                .context(ZstdDecompressionSnafu { path })?
                .into(),
            CompressionFormat::None => raw,
        };
        if self.config.compression != CompressionFormat::None {
            emit!(FileDecompressionCompleted {
                duration: decompress_start.elapsed()
            });
        }

        let mut decoder = ReaderBuilder::new(Arc::clone(&self.schema))
            .with_batch_size(self.config.batch_size)
            .with_strict_mode(false)
            .with_coerce_primitive(true)
            .build_decoder()
            .map_err(|e| {
                DecoderBuildSnafu {
                    message: e.to_string(),
                }
                .build()
            })?;

        // decode() stops once batch_size rows are buffered, so flush after
        // every call to make progress.
        let mut offset = 0;
        let mut batches = Vec::new();
        let mut total_records = 0;

        loop {
            let consumed = decoder.decode(&decompressed[offset..]).map_err(|e| {
                JsonDecodeSnafu {
                    path,
                    message: e.to_string(),
                }
                .build()
            })?;

            if let Some(batch) = decoder.flush().map_err(|e| {
                BatchFlushSnafu {
                    path,
                    message: e.to_string(),
                }
                .build()
            })? {
                total_records += batch.num_rows();
                batches.push(batch);
            }

            if consumed == 0 {
                let remaining = &decompressed[offset..];
                ensure!(
                    remaining.iter().all(|b| b.is_ascii_whitespace()),
                    TrailingContentSnafu {
                        path,
                        bytes: remaining.len(),
                    }
                );
                break;
            }
            offset += consumed;
        }

        debug!(
            "Parsed {} batches ({} records) from {}",
            batches.len(),
            total_records,
            path
        );

        Ok(ReadResult {
            batches,
            total_records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{log_record_schema, song_record_schema};
    use datafusion::arrow::array::{Array, AsArray};
    use datafusion::arrow::datatypes::{Float64Type, Int64Type};
    use std::io::Write;

    fn reader(schema: SchemaRef, compression: CompressionFormat) -> NdjsonReader {
        NdjsonReader::new(schema, NdjsonReaderConfig::new(2, compression))
    }

    const SONG: &str = r#"{"num_songs": 1, "artist_id": "ARJIE2Y1187B994AB7", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Line Renaud", "song_id": "SOUPIRU12A6D4FA1E1", "title": "Der Kleine Dompfaff", "duration": 152.92036, "year": 0}"#;

    #[test]
    fn test_single_object_song_file() {
        let result = reader(song_record_schema(), CompressionFormat::None)
            .read(Bytes::from(SONG), "song_data/A/TRA.json")
            .unwrap();

        assert_eq!(result.total_records, 1);
        let batch = &result.batches[0];
        let song_id = batch.column_by_name("song_id").unwrap().as_string::<i32>();
        assert_eq!(song_id.value(0), "SOUPIRU12A6D4FA1E1");
        let lat = batch
            .column_by_name("artist_latitude")
            .unwrap()
            .as_primitive::<Float64Type>();
        assert!(lat.is_null(0));
        let year = batch
            .column_by_name("year")
            .unwrap()
            .as_primitive::<Int64Type>();
        assert_eq!(year.value(0), 0);
    }

    #[test]
    fn test_log_lines_span_batches() {
        let lines = [
            r#"{"userId":"8","ts":1541121934796,"page":"NextSong","sessionId":139}"#,
            r#"{"userId":"","ts":1541122241796,"page":"Home","sessionId":139}"#,
            r#"{"userId":"26","ts":1541122541796,"page":"NextSong","extra":"ignored"}"#,
        ];
        let data = lines.join("\n") + "\n";

        let result = reader(log_record_schema(), CompressionFormat::None)
            .read(Bytes::from(data), "log_data/events.json")
            .unwrap();

        assert_eq!(result.total_records, 3);
        assert_eq!(result.batches.len(), 2);
        assert_eq!(result.batches[0].num_rows(), 2);
    }

    #[test]
    fn test_numeric_user_id_is_coerced() {
        let data = r#"{"userId":42,"ts":1541121934796}"#;
        let result = reader(log_record_schema(), CompressionFormat::None)
            .read(Bytes::from(data), "log_data/events.json")
            .unwrap();
        let user_id = result.batches[0]
            .column_by_name("userId")
            .unwrap()
            .as_string::<i32>();
        assert_eq!(user_id.value(0), "42");
    }

    #[test]
    fn test_gzip_input() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(SONG.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let result = reader(song_record_schema(), CompressionFormat::Gzip)
            .read(Bytes::from(compressed), "song_data/A/TRA.json.gz")
            .unwrap();
        assert_eq!(result.total_records, 1);
    }

    #[test]
    fn test_zstd_input() {
        let compressed = zstd::encode_all(SONG.as_bytes(), 3).unwrap();
        let result = reader(song_record_schema(), CompressionFormat::Zstd)
            .read(Bytes::from(compressed), "song_data/A/TRA.json.zst")
            .unwrap();
        assert_eq!(result.total_records, 1);
    }

    #[test]
    fn test_malformed_json_fails() {
        let data = "{\"userId\":\"8\",\"ts\":1}\n{\"userId\": oops}\n";
        let err = reader(log_record_schema(), CompressionFormat::None)
            .read(Bytes::from(data), "log_data/bad.json")
            .unwrap_err();
        assert!(matches!(err, ReaderError::JsonDecode { .. }));
    }

    #[test]
    fn test_empty_and_whitespace_files_yield_nothing() {
        let result = reader(log_record_schema(), CompressionFormat::None)
            .read(Bytes::from_static(b"\n  \n"), "log_data/empty.json")
            .unwrap();
        assert_eq!(result.total_records, 0);
        assert!(result.batches.is_empty());
    }
}
