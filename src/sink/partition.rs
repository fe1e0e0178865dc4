//! Hive-style partitioning.
//!
//! Rows are grouped by the values of an ordered list of partition columns.
//! Each group becomes a directory chain `col1=v1/col2=v2/` below the table
//! root, and the partition columns themselves are dropped from the data
//! written into that directory.

use datafusion::arrow::array::{Array, AsArray, RecordBatch, UInt32Array};
use datafusion::arrow::compute::{cast, take_record_batch};
use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::error::ArrowError;
use indexmap::IndexMap;
use std::fmt::Write;

/// Directory name used for null or empty partition values.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Ordered `(column, value)` pairs identifying one partition directory.
pub type PartitionValues = Vec<(String, String)>;

/// Rows of one partition with the partition columns removed.
#[derive(Debug, Clone)]
pub struct PartitionedBatch {
    pub values: PartitionValues,
    pub batch: RecordBatch,
}

/// Split `batch` into one batch per distinct combination of `columns`.
///
/// Groups come out in order of first appearance and rows keep their
/// relative order within a group. Without partition columns the whole
/// batch is returned as a single group.
pub fn split_by_partition(
    batch: &RecordBatch,
    columns: &[&str],
) -> Result<Vec<PartitionedBatch>, ArrowError> {
    if columns.is_empty() {
        return Ok(vec![PartitionedBatch {
            values: Vec::new(),
            batch: batch.clone(),
        }]);
    }

    let schema = batch.schema();
    let mut key_indices = Vec::with_capacity(columns.len());
    let mut key_arrays = Vec::with_capacity(columns.len());
    for column in columns {
        let index = schema.index_of(column)?;
        key_indices.push(index);
        key_arrays.push(cast(batch.column(index), &DataType::Utf8)?);
    }

    let data_indices: Vec<usize> = (0..schema.fields().len())
        .filter(|i| !key_indices.contains(i))
        .collect();
    let data = batch.project(&data_indices)?;

    let mut groups: IndexMap<Vec<Option<String>>, Vec<u32>> = IndexMap::new();
    for row in 0..batch.num_rows() {
        let key = key_arrays
            .iter()
            .map(|array| {
                let strings = array.as_string::<i32>();
                (!strings.is_null(row)).then(|| strings.value(row).to_string())
            })
            .collect();
        groups.entry(key).or_default().push(row as u32);
    }

    groups
        .into_iter()
        .map(|(key, rows)| {
            let values = columns
                .iter()
                .zip(key)
                .map(|(column, value)| {
                    let value = value
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| HIVE_DEFAULT_PARTITION.to_string());
                    (column.to_string(), value)
                })
                .collect();
            let batch = take_record_batch(&data, &UInt32Array::from(rows))?;
            Ok(PartitionedBatch { values, batch })
        })
        .collect()
}

/// Relative directory for a partition, e.g. `year=2018/month=11`.
///
/// Empty for an unpartitioned table.
pub fn partition_path(values: &[(String, String)]) -> String {
    values
        .iter()
        .map(|(column, value)| {
            if value == HIVE_DEFAULT_PARTITION {
                format!("{}={}", escape_path_name(column), value)
            } else {
                format!("{}={}", escape_path_name(column), escape_path_name(value))
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encode the characters Hive does not allow in path segments.
pub fn escape_path_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if needs_escaping(c) {
            let _ = write!(escaped, "%{:02X}", c as u32);
        } else {
            escaped.push(c);
        }
    }
    escaped
}

fn needs_escaping(c: char) -> bool {
    matches!(
        c,
        '\u{01}'..='\u{1F}'
            | '"'
            | '#'
            | '%'
            | '\''
            | '*'
            | '/'
            | ':'
            | '='
            | '?'
            | '\\'
            | '\u{7F}'
            | '{'
            | '['
            | ']'
            | '^'
    )
}
