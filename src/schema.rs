//! Record schemas and the output table catalog.
//!
//! The input schemas are declared rather than inferred so that every run
//! decodes the same column types regardless of which fields happen to be
//! present in a given file. Fields not listed here are ignored on read.

use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

/// Column holding each record's position in ingestion order.
///
/// Files are read in sorted path order and records in file order, so the
/// ordinal is stable across runs over the same input.
pub const ORDINAL_COLUMN: &str = "_ordinal";

/// Derived wall-clock timestamp column added to play events.
pub const START_TIME_COLUMN: &str = "start_time";

/// Schema of a song metadata record.
pub fn song_record_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("num_songs", DataType::Int64, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("artist_latitude", DataType::Float64, true),
        Field::new("artist_longitude", DataType::Float64, true),
        Field::new("artist_location", DataType::Utf8, true),
        Field::new("artist_name", DataType::Utf8, true),
        Field::new("song_id", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("duration", DataType::Float64, true),
        Field::new("year", DataType::Int64, true),
    ]))
}

/// Schema of an activity log record.
pub fn log_record_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("artist", DataType::Utf8, true),
        Field::new("auth", DataType::Utf8, true),
        Field::new("firstName", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("itemInSession", DataType::Int64, true),
        Field::new("lastName", DataType::Utf8, true),
        Field::new("length", DataType::Float64, true),
        Field::new("level", DataType::Utf8, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("method", DataType::Utf8, true),
        Field::new("page", DataType::Utf8, true),
        Field::new("registration", DataType::Float64, true),
        Field::new("sessionId", DataType::Int64, true),
        Field::new("song", DataType::Utf8, true),
        Field::new("status", DataType::Int64, true),
        Field::new("ts", DataType::Int64, true),
        Field::new("userAgent", DataType::Utf8, true),
        Field::new("userId", DataType::Utf8, true),
    ]))
}

/// An output table: its directory name and Hive partition columns, in
/// directory nesting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub partition_columns: &'static [&'static str],
}

impl TableSpec {
    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }
}

pub const SONGS: TableSpec = TableSpec {
    name: "songs",
    partition_columns: &["year", "artist_id"],
};

pub const ARTISTS: TableSpec = TableSpec {
    name: "artists",
    partition_columns: &[],
};

pub const USERS: TableSpec = TableSpec {
    name: "users",
    partition_columns: &[],
};

pub const TIME: TableSpec = TableSpec {
    name: "time",
    partition_columns: &["year", "month"],
};

pub const SONGPLAYS: TableSpec = TableSpec {
    name: "songplays",
    partition_columns: &["year", "month"],
};

/// Every table a run produces, in write order.
pub const ALL_TABLES: [TableSpec; 5] = [SONGS, ARTISTS, USERS, TIME, SONGPLAYS];
