use crate::processor::{Catalog, bootstrap_empty, bootstrap_with_data, parquet_schema, read_parquet};
use crate::replay::{CancelToken, ReplayConfig, ReplayDriver, ReplayReport, TableSource, TokioPacer};
use crate::schema::price_fund_schema;
use crate::storage::StoreManager;
use crate::table::{ParquetLogTable, TableSnapshot};
use common::Result;
use common::config::Settings;
use datafusion::prelude::{SessionConfig, SessionContext};
use etl::DownloadOutcome;
use std::sync::Arc;
use tracing::info;

/// Tables created by [`SetupService::bootstrap_tables`].
#[derive(Debug, Clone)]
pub struct BootstrapSummary {
    pub prices: TableSnapshot,
    pub fundamentals: TableSnapshot,
    pub price_fund: TableSnapshot,
}

/// Prepares the streaming demo: downloads the samples, lays out the tables
/// and replays the price history into the streaming table.
pub struct SetupService {
    settings: Settings,
    stores: StoreManager,
    catalog: Catalog,
}

impl SetupService {
    pub fn new(settings: Settings) -> Self {
        let stores = StoreManager::new(settings.s3.clone());
        Self {
            settings,
            stores,
            catalog: Catalog::new(session_context()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn ctx(&self) -> &SessionContext {
        self.catalog.session_context()
    }

    pub async fn download_sources(&self) -> Result<Vec<DownloadOutcome>> {
        let outcomes = etl::download_samples(&self.settings).await?;
        for outcome in &outcomes {
            info!(path = %outcome.path().display(), ?outcome, "Sample file ready");
        }
        Ok(outcomes)
    }

    pub async fn table(&self, uri: &str) -> Result<ParquetLogTable> {
        self.stores.register_object_store(self.ctx(), uri)?;
        Ok(ParquetLogTable::new(self.stores.resolve(uri).await?))
    }

    /// Recreates the three tables: prices empty, fundamentals fully loaded
    /// and the joined price/fundamentals table empty.
    pub async fn bootstrap_tables(&self) -> Result<BootstrapSummary> {
        let paths = &self.settings.paths;
        self.stores.register_object_store(self.ctx(), &paths.parquet_price_path)?;
        self.stores.register_object_store(self.ctx(), &paths.parquet_fund_path)?;

        let price_schema = parquet_schema(self.ctx(), &paths.parquet_price_path).await?;
        let (fund_schema, fund_batches) = read_parquet(self.ctx(), &paths.parquet_fund_path).await?;
        let joined_schema = Arc::new(price_fund_schema(
            &price_schema,
            &fund_schema,
            &self.settings.price_fund.fund_columns,
        )?);

        let prices = bootstrap_empty(&self.table(&paths.table_price_path).await?, price_schema).await?;
        let fundamentals = bootstrap_with_data(
            &self.table(&paths.table_fund_path).await?,
            fund_schema,
            &fund_batches,
        )
        .await?;
        let price_fund =
            bootstrap_empty(&self.table(&paths.table_price_fund_path).await?, joined_schema).await?;

        Ok(BootstrapSummary {
            prices,
            fundamentals,
            price_fund,
        })
    }

    /// Creates the database and (re)registers the streaming price table.
    pub async fn register_price_table(&self) -> Result<()> {
        let catalog = &self.settings.catalog;
        let table = self.table(&self.settings.paths.table_price_path).await?;

        self.catalog.create_database(&catalog.database).await?;
        self.catalog
            .register_table(&catalog.database, &catalog.table, &table)
            .await
    }

    pub async fn price_source(&self) -> Result<TableSource> {
        let replay = &self.settings.replay;
        let path = &self.settings.paths.parquet_price_path;
        self.stores.register_object_store(self.ctx(), path)?;

        TableSource::from_parquet(
            self.ctx().clone(),
            &replay.source_view,
            path,
            &replay.ordering_column,
        )
        .await
    }

    /// Replays the price history into the streaming price table.
    pub async fn replay_prices(&self, config: ReplayConfig, cancel: CancelToken) -> Result<ReplayReport> {
        let source = self.price_source().await?;
        let target = self.table(&self.settings.paths.table_price_path).await?;

        ReplayDriver::new(source, target, TokioPacer::new(cancel.clone()), config)
            .with_cancellation(cancel)
            .run()
            .await
    }

    /// Rows currently committed to the streaming price table, through SQL.
    pub async fn count_price_rows(&self) -> Result<u64> {
        self.register_price_table().await?;

        let catalog = &self.settings.catalog;
        let count = self.catalog.count_rows(&catalog.database, &catalog.table).await?;
        info!(database = %catalog.database, table = %catalog.table, count, "Counted rows");
        Ok(count)
    }
}

/// Session used for every read and registration. Parquet strings are kept as
/// `Utf8` so source schemas match the stored table schemas.
pub fn session_context() -> SessionContext {
    let config = SessionConfig::new()
        .set_bool("datafusion.execution.parquet.schema_force_view_types", false);
    SessionContext::new_with_config(config)
}
