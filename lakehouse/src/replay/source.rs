use super::{KeyRange, ReplaySource};
use crate::utils::arrow::{date_to_days, dates_from_batches};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{Error, Result};
use datafusion::common::ScalarValue;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// A replay source backed by a table registered in a DataFusion context.
pub struct TableSource {
    ctx: SessionContext,
    view: String,
    key_column: String,
}

impl TableSource {
    /// Registers the Parquet file or directory at `path` as `view`.
    pub async fn from_parquet(
        ctx: SessionContext,
        view: &str,
        path: &str,
        key_column: &str,
    ) -> Result<Self> {
        // Clean up existing registration if present
        let _ = ctx.deregister_table(view);

        ctx.register_parquet(view, path, ParquetReadOptions::default())
            .await
            .map_err(|e| Error::Other(format!("Failed to register {} at {}: {}", view, path, e)))?;

        debug!(view, path, "Registered replay source");
        Self::checked(ctx, view, key_column).await
    }

    /// Registers in-memory batches as `view`.
    pub async fn from_batches(
        ctx: SessionContext,
        view: &str,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        key_column: &str,
    ) -> Result<Self> {
        let _ = ctx.deregister_table(view);

        let table = MemTable::try_new(schema, vec![batches])?;
        ctx.register_table(view, Arc::new(table))?;

        Self::checked(ctx, view, key_column).await
    }

    async fn checked(ctx: SessionContext, view: &str, key_column: &str) -> Result<Self> {
        let df = ctx.table(view).await?;
        if !df.schema().has_column_with_unqualified_name(key_column) {
            return Err(Error::InvalidConfiguration(format!(
                "Ordering column '{}' does not exist in {}",
                key_column, view
            )));
        }

        Ok(Self {
            ctx,
            view: view.to_string(),
            key_column: key_column.to_string(),
        })
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    fn key_expr(&self) -> Expr {
        cast(col(self.key_column.as_str()), DataType::Date32)
    }

    pub async fn data_frame(&self) -> Result<DataFrame> {
        Ok(self.ctx.table(self.view.as_str()).await?)
    }
}

#[async_trait]
impl ReplaySource for TableSource {
    async fn distinct_keys(&self) -> Result<Vec<NaiveDate>> {
        let batches = self
            .data_frame()
            .await?
            .select(vec![self.key_expr().alias(self.key_column.as_str())])?
            .distinct()?
            .sort(vec![col(self.key_column.as_str()).sort(true, false)])?
            .collect()
            .await?;

        let mut keys = dates_from_batches(&batches)?;
        keys.dedup();
        Ok(keys)
    }

    async fn select_range(&self, range: &KeyRange) -> Result<Vec<RecordBatch>> {
        let min = lit(ScalarValue::Date32(Some(date_to_days(range.min))));
        let max = lit(ScalarValue::Date32(Some(date_to_days(range.max))));

        Ok(self
            .data_frame()
            .await?
            .filter(self.key_expr().between(min, max))?
            .collect()
            .await?)
    }
}
