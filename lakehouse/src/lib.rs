pub mod processor;
pub mod replay;
pub mod schema;
pub mod services;
pub mod storage;
pub mod table;
pub mod utils;

use common::Result;
use common::config::Settings;
use replay::{CancelToken, ReplayConfig, ReplayReport};
use services::SetupService;
use tracing::info;

/// Runs the complete setup: download the samples, bootstrap the tables,
/// register the streaming table and replay the price history into it.
pub async fn run_setup_pipeline(settings: Settings, cancel: CancelToken) -> Result<ReplayReport> {
    // Validate before touching any table
    let config = ReplayConfig::from_settings(&settings.replay)?;
    let service = SetupService::new(settings);

    service.download_sources().await?;
    let summary = service.bootstrap_tables().await?;
    info!(
        fundamentals_rows = summary.fundamentals.num_rows(),
        "Tables bootstrapped"
    );

    service.register_price_table().await?;
    let report = service.replay_prices(config, cancel).await?;
    service.count_price_rows().await?;

    Ok(report)
}
