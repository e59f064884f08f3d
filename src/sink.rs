//! `deadpool_postgres`-backed [`BatchSink`]: streams one sealed batch over a
//! pooled connection's `COPY ... FROM STDIN WITH (FORMAT binary)` (spec §4.7,
//! §5: "per-attempt acquisition, no connection held across sleep").

use bytes::Bytes;
use futures::SinkExt;

use crate::copyenc::{encode_batch, ColumnPlan};
use crate::coordinator::BatchSink;
use crate::error::{classify_pool_error, classify_query_error, IngestError};
use crate::header::HeaderField;
use crate::rowbuild::TableRow;

/// Fixed core columns written ahead of the header-derived INFO/FORMAT
/// columns, in the exact order [`crate::copyenc::encode_tuple`] writes them.
const CORE_COLUMNS: &[&str] = &[
    "chrom",
    "pos",
    "id",
    "reference",
    "alt",
    "alt_index",
    "is_spanning_deletion",
    "qual",
    "filter",
    "position_range",
    "fingerprint",
    "audit_batch_id",
];

fn column_list(plan: &ColumnPlan) -> String {
    let mut columns: Vec<String> = CORE_COLUMNS.iter().map(|s| s.to_string()).collect();
    for field in &plan.info_fields {
        columns.push(field.column_name.clone());
    }
    for sample_name in &plan.sample_names {
        for field in &plan.format_fields {
            columns.push(sample_column_name(sample_name, field));
        }
    }
    columns.join(", ")
}

/// `<sample>__<field column name>`, kept distinct from the plain INFO column
/// namespace so a sample named e.g. `ac` cannot collide with `INFO/AC`.
fn sample_column_name(sample_name: &str, field: &HeaderField) -> String {
    format!(
        "{}__{}",
        crate::sanitize::sanitize_identifier(sample_name),
        field.column_name
    )
}

pub struct PostgresBatchSink {
    pool: deadpool_postgres::Pool,
    table_name: String,
}

impl PostgresBatchSink {
    pub fn new(pool: deadpool_postgres::Pool, table_name: impl Into<String>) -> Self {
        Self {
            pool,
            table_name: table_name.into(),
        }
    }
}

#[async_trait::async_trait]
impl BatchSink for PostgresBatchSink {
    async fn write_batch(&self, rows: &[TableRow], plan: &ColumnPlan) -> Result<(), IngestError> {
        let client = self.pool.get().await.map_err(classify_pool_error)?;
        let statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT binary)",
            self.table_name,
            column_list(plan)
        );

        let mut buf = Vec::new();
        encode_batch(&mut buf, rows, plan).await?;

        let sink = client
            .copy_in(statement.as_str())
            .await
            .map_err(classify_query_error)?;
        futures::pin_mut!(sink);
        sink.send(Bytes::from(buf))
            .await
            .map_err(classify_query_error)?;
        sink.finish().await.map_err(classify_query_error)?;
        Ok(())
    }
}
