pub mod download;
pub mod utils;

use common::{Error, Result};
use common::config::Settings;
use std::path::Path;

pub use download::{DownloadOutcome, SampleDownloader};

/// Downloads the price and fundamentals sample files into their Parquet
/// directories.
pub async fn download_samples(settings: &Settings) -> Result<Vec<DownloadOutcome>> {
    // Validate both targets before fetching anything
    let targets = [
        (
            &settings.sources.price_url,
            local_dir(&settings.paths.parquet_price_path)?,
        ),
        (
            &settings.sources.fund_url,
            local_dir(&settings.paths.parquet_fund_path)?,
        ),
    ];

    let downloader =
        SampleDownloader::new(settings.download.retries, settings.download.base_delay_ms)?;

    let mut outcomes = Vec::with_capacity(targets.len());
    for (url, dir) in targets {
        outcomes.push(downloader.fetch(url, dir).await?);
    }

    Ok(outcomes)
}

/// Samples are written with the local filesystem, so the Parquet directories
/// must be plain paths or `file://` URLs.
fn local_dir(path: &str) -> Result<&Path> {
    if let Some(local) = path.strip_prefix("file://") {
        return Ok(Path::new(local));
    }
    if path.contains("://") {
        return Err(Error::InvalidConfiguration(format!(
            "Sample downloads need a local Parquet directory, got '{}'",
            path
        )));
    }
    Ok(Path::new(path))
}

pub async fn run_download(config_path: &str) -> Result<()> {
    let settings = Settings::new(config_path)?;
    download_samples(&settings).await?;
    Ok(())
}
