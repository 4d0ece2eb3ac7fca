use crate::utils::retry_with_backoff;
use common::{Error, Result};
use rquest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    UpToDate { path: PathBuf },
}

impl DownloadOutcome {
    pub fn path(&self) -> &Path {
        match self {
            DownloadOutcome::Downloaded { path, .. } => path,
            DownloadOutcome::UpToDate { path } => path,
        }
    }
}

/// Fetches sample files into local directories, skipping files whose local
/// copy already has the remote size.
pub struct SampleDownloader {
    client: Client,
    retries: u32,
    base_delay_ms: u64,
}

impl SampleDownloader {
    pub fn new(retries: u32, base_delay_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            retries,
            base_delay_ms,
        })
    }

    pub async fn fetch(&self, url: &str, target_dir: &Path) -> Result<DownloadOutcome> {
        let file_name = file_name_from_url(url)?;
        tokio::fs::create_dir_all(target_dir).await?;
        let target = target_dir.join(&file_name);
        let target = target.as_path();

        retry_with_backoff(self.retries, self.base_delay_ms, move || {
            self.fetch_once(url, target)
        })
        .await
    }

    async fn fetch_once(&self, url: &str, target: &Path) -> Result<DownloadOutcome> {
        let response = self.client.get(url).send().await?;
        check_status(url, response.status())?;

        let remote_len = response
            .headers()
            .get(rquest::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        if is_up_to_date(target, remote_len).await {
            info!(url, path = %target.display(), "Local copy is up to date, skipping download");
            return Ok(DownloadOutcome::UpToDate {
                path: target.to_path_buf(),
            });
        }

        let body = response.bytes().await?;
        debug!(url, bytes = body.len(), "Downloaded response body");

        // Readers list the directory, so the final name only appears once complete.
        let partial = partial_path(target);
        tokio::fs::write(&partial, &body).await?;
        tokio::fs::rename(&partial, target).await?;

        info!(url, path = %target.display(), bytes = body.len(), "Downloaded sample file");
        Ok(DownloadOutcome::Downloaded {
            path: target.to_path_buf(),
            bytes: body.len() as u64,
        })
    }
}

fn check_status(url: &str, status: StatusCode) -> Result<()> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RateLimit);
    }
    if !status.is_success() {
        return Err(Error::Download(format!("{} returned {}", url, status)));
    }
    Ok(())
}

pub fn file_name_from_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .ok_or_else(|| Error::InvalidInput(format!("URL '{}' has no file name", url)))
}

/// `<name>.part` next to `target`; the Parquet reader only lists `.parquet`.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn is_up_to_date(target: &Path, remote_len: Option<u64>) -> bool {
    let Some(remote_len) = remote_len else {
        return false;
    };
    match tokio::fs::metadata(target).await {
        Ok(meta) => meta.is_file() && meta.len() == remote_len,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        let name = file_name_from_url(
            "https://pages.databricks.com/rs/094-YMS-629/images/stocksDailyPricesSample.snappy.parquet",
        )
        .unwrap();
        assert_eq!(name, "stocksDailyPricesSample.snappy.parquet");

        assert!(file_name_from_url("https://example.com/").is_err());
        assert!(file_name_from_url("not a url").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(check_status("u", StatusCode::OK).is_ok());
        assert!(matches!(
            check_status("u", StatusCode::TOO_MANY_REQUESTS),
            Err(Error::RateLimit)
        ));
        assert!(matches!(
            check_status("u", StatusCode::NOT_FOUND),
            Err(Error::Download(_))
        ));
    }

    #[test]
    fn test_partial_path_keeps_full_name() {
        let target = Path::new("data/parquet/prices/stocksDailyPricesSample.snappy.parquet");
        assert_eq!(
            partial_path(target),
            PathBuf::from("data/parquet/prices/stocksDailyPricesSample.snappy.parquet.part")
        );
    }

    #[tokio::test]
    async fn test_up_to_date_compares_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.parquet");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        assert!(is_up_to_date(&path, Some(10)).await);
        assert!(!is_up_to_date(&path, Some(11)).await);
        assert!(!is_up_to_date(&path, None).await);
        assert!(!is_up_to_date(&dir.path().join("missing.parquet"), Some(10)).await);
    }
}
