//! Wall-clock start times.
//!
//! `ts` is epoch milliseconds. The start time is the wall-clock reading of
//! `floor(ts / 1000)` seconds in the configured zone, stored as a zone-less
//! microsecond timestamp.

use datafusion::arrow::array::{
    Array, ArrayRef, AsArray, RecordBatch, TimestampMicrosecondArray,
};
use datafusion::arrow::datatypes::{DataType, Field, Int64Type, Schema, SchemaRef, TimeUnit};
use snafu::prelude::*;
use std::sync::Arc;

use crate::config::TimeZoneConfig;
use crate::error::{ArrowComputeSnafu, ColumnTypeSnafu, TransformError};
use crate::schema::START_TIME_COLUMN;

const STAGE: &str = "start_time";

/// Derive the start time for every value of an epoch-millisecond column.
///
/// Null inputs, and instants outside the representable range, give null.
pub fn start_time_column(
    ts: &dyn Array,
    time_zone: &TimeZoneConfig,
) -> Result<TimestampMicrosecondArray, TransformError> {
    let millis = ts
        .as_primitive_opt::<Int64Type>()
        .context(ColumnTypeSnafu {
            column: "ts",
            stage: STAGE,
        })?;

    Ok(millis
        .iter()
        .map(|ms| {
            let ms = ms?;
            let wall = time_zone.wall_clock(ms.div_euclid(1000))?;
            Some(wall.and_utc().timestamp_micros())
        })
        .collect())
}

/// Append a `start_time` column derived from `ts` to each batch.
pub fn with_start_time(
    schema: &SchemaRef,
    batches: &[RecordBatch],
    time_zone: &TimeZoneConfig,
) -> Result<(SchemaRef, Vec<RecordBatch>), TransformError> {
    let ts_index = schema.index_of("ts").ok().context(ColumnTypeSnafu {
        column: "ts",
        stage: STAGE,
    })?;

    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(
        START_TIME_COLUMN,
        DataType::Timestamp(TimeUnit::Microsecond, None),
        true,
    ));
    let extended: SchemaRef = Arc::new(Schema::new(fields));

    let batches = batches
        .iter()
        .map(|batch| {
            let start_time = start_time_column(batch.column(ts_index), time_zone)?;
            let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
            columns.push(Arc::new(start_time));
            RecordBatch::try_new(Arc::clone(&extended), columns)
                .context(ArrowComputeSnafu { stage: STAGE })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((extended, batches))
}
