use crate::table::{ParquetLogTable, TableSnapshot};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use datafusion::prelude::{ParquetReadOptions, SessionContext};
use std::sync::Arc;
use tracing::info;

/// Drops whatever is stored at the table location and recreates it empty.
pub async fn bootstrap_empty(table: &ParquetLogTable, schema: SchemaRef) -> Result<TableSnapshot> {
    let removed = table.delete().await?;
    let snapshot = table.create_empty(schema).await?;

    info!(
        table = table.uri(),
        removed_objects = removed,
        "Bootstrapped empty table"
    );
    Ok(snapshot)
}

/// Recreates the table and loads `batches` as its first append.
pub async fn bootstrap_with_data(
    table: &ParquetLogTable,
    schema: SchemaRef,
    batches: &[RecordBatch],
) -> Result<TableSnapshot> {
    bootstrap_empty(table, schema).await?;
    table.append(batches).await?;

    let snapshot = table.snapshot().await?;
    info!(table = table.uri(), rows = snapshot.num_rows(), "Loaded table");
    Ok(snapshot)
}

/// Schema of the Parquet file or directory at `path`.
pub async fn parquet_schema(ctx: &SessionContext, path: &str) -> Result<SchemaRef> {
    let df = ctx
        .read_parquet(path, ParquetReadOptions::default())
        .await
        .map_err(|e| Error::Other(format!("Failed to read schema from {}: {}", path, e)))?;

    Ok(Arc::new(Schema::from(df.schema().clone())))
}

/// Every row of the Parquet file or directory at `path`.
pub async fn read_parquet(ctx: &SessionContext, path: &str) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let df = ctx
        .read_parquet(path, ParquetReadOptions::default())
        .await
        .map_err(|e| Error::Other(format!("Failed to read {}: {}", path, e)))?;

    let schema = Arc::new(Schema::from(df.schema().clone()));
    let batches = df.collect().await?;
    Ok((schema, batches))
}
