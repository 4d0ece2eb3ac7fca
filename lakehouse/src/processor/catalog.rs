use crate::table::ParquetLogTable;
use crate::utils::arrow::single_count;
use common::{Error, Result};
use datafusion::prelude::SessionContext;
use datafusion::common::TableReference;
use tracing::{debug, info};

/// SQL-visible databases and tables in a session context.
pub struct Catalog {
    ctx: SessionContext,
}

impl Catalog {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.ctx
    }

    pub async fn create_database(&self, database: &str) -> Result<()> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(database)?);
        self.ctx.sql(&sql).await?.collect().await?;

        debug!(database, "Database ready");
        Ok(())
    }

    /// Returns whether a table was registered under the name.
    pub async fn drop_table_if_exists(&self, database: &str, table: &str) -> Result<bool> {
        let reference = TableReference::partial(database, table);
        let dropped = self.ctx.deregister_table(reference)?.is_some();

        if dropped {
            debug!(database, table, "Dropped table");
        }
        Ok(dropped)
    }

    /// Registers `database.table` over the versions of `source` committed so
    /// far. Re-register to pick up later appends.
    pub async fn register_table(
        &self,
        database: &str,
        table: &str,
        source: &ParquetLogTable,
    ) -> Result<()> {
        self.drop_table_if_exists(database, table).await?;

        let provider = source.listing_table().await?;
        self.ctx
            .register_table(TableReference::partial(database, table), provider)
            .map_err(|e| {
                Error::Other(format!(
                    "Failed to register {}.{} at {}: {}",
                    database,
                    table,
                    source.uri(),
                    e
                ))
            })?;

        info!(database, table, location = source.uri(), "Registered table");
        Ok(())
    }

    pub async fn count_rows(&self, database: &str, table: &str) -> Result<u64> {
        let sql = format!(
            "SELECT count(*) FROM {}.{}",
            quote_identifier(database)?,
            quote_identifier(table)?
        );
        let batches = self.ctx.sql(&sql).await?.collect().await?;
        single_count(&batches)
    }
}

fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('"') {
        return Err(Error::InvalidInput(format!("Invalid identifier: '{}'", name)));
    }
    Ok(format!("\"{}\"", name))
}
