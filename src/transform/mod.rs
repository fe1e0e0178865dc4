//! Star schema derivations.
//!
//! Every relational step (filter, projection, distinct, ranking, join) is a
//! SQL query against an in-process DataFusion session. Source datasets are
//! registered as in-memory tables and each derived table is collected back
//! into Arrow batches for the sink.
//!
//! - `songs`: song and artist dimensions
//! - `logs`: play events, user and time dimensions
//! - `songplays`: the fact table

pub mod logs;
pub mod songplays;
pub mod songs;
mod timestamp;

pub use timestamp::{start_time_column, with_start_time};

use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::datasource::MemTable;
use datafusion::prelude::{SessionConfig, SessionContext};
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::error::{QuerySnafu, TransformError};
use crate::source::SourceDataset;

/// A named, fully materialised table.
#[derive(Debug, Clone)]
pub struct Relation {
    pub name: &'static str,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl Relation {
    pub fn new(name: &'static str, schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            name,
            schema,
            batches,
        }
    }

    /// Wrap a loaded source dataset.
    pub fn from_source(name: &'static str, dataset: SourceDataset) -> Self {
        Self::new(name, dataset.schema, dataset.batches)
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Query session holding the registered relations of one stage.
pub struct Session {
    ctx: SessionContext,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        // Source fields are camelCase, so identifiers must keep their case.
        let config = SessionConfig::new()
            .set_bool("datafusion.sql_parser.enable_ident_normalization", false);
        Self {
            ctx: SessionContext::new_with_config(config),
        }
    }

    /// Make `relation` queryable under its name.
    pub fn register(&self, relation: &Relation) -> Result<(), TransformError> {
        let stage = relation.name;
        let table = MemTable::try_new(
            Arc::clone(&relation.schema),
            vec![relation.batches.clone()],
        )
        .context(QuerySnafu { stage })?;
        self.ctx
            .register_table(relation.name, Arc::new(table))
            .context(QuerySnafu { stage })?;
        debug!(
            "Registered {} ({} rows)",
            relation.name,
            relation.num_rows()
        );
        Ok(())
    }

    /// Register the result of `sql` as a view named `name`.
    pub async fn register_view(&self, name: &'static str, sql: &str) -> Result<(), TransformError> {
        let view = self
            .ctx
            .sql(sql)
            .await
            .context(QuerySnafu { stage: name })?
            .into_view();
        self.ctx
            .register_table(name, view)
            .context(QuerySnafu { stage: name })?;
        Ok(())
    }

    /// Run `sql` and collect the result as the relation `name`.
    pub async fn query(&self, name: &'static str, sql: &str) -> Result<Relation, TransformError> {
        let df = self
            .ctx
            .sql(sql)
            .await
            .context(QuerySnafu { stage: name })?;
        let planned: SchemaRef = Arc::new(df.schema().as_arrow().clone());
        let batches = df.collect().await.context(QuerySnafu { stage: name })?;
        let schema = batches
            .first()
            .map(|batch| batch.schema())
            .unwrap_or(planned);

        let relation = Relation::new(name, schema, batches);
        debug!("Derived {} ({} rows)", name, relation.num_rows());
        Ok(relation)
    }
}
