use config::{Config, ConfigError, FileFormat};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub sources: SourceConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub replay: ReplaySettings,
    #[serde(default)]
    pub price_fund: PriceFundConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub s3: Option<S3Settings>,
}

/// Remote locations of the sample Parquet files.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub price_url: String,
    pub fund_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub parquet_price_path: String,
    pub parquet_fund_path: String,
    pub table_price_path: String,
    pub table_fund_path: String,
    pub table_price_fund_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            table: default_table(),
        }
    }
}

/// Raw replay knobs as written in the file. Signed and floating on purpose so
/// that bad values reach validation instead of failing deserialization.
#[derive(Debug, Deserialize, Clone)]
pub struct ReplaySettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: f64,
    #[serde(default = "default_ordering_column")]
    pub ordering_column: String,
    #[serde(default = "default_source_view")]
    pub source_view: String,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pause_secs: default_pause_secs(),
            ordering_column: default_ordering_column(),
            source_view: default_source_view(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceFundConfig {
    #[serde(default = "default_fund_columns")]
    pub fund_columns: Vec<String>,
}

impl Default for PriceFundConfig {
    fn default() -> Self {
        Self {
            fund_columns: default_fund_columns(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Settings {
    #[serde(default = "default_s3_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_allow_http")]
    pub allow_http: bool,
}

fn default_database() -> String {
    "stock_delta_streaming".to_string()
}

fn default_table() -> String {
    "stock_daily_prices_delta".to_string()
}

fn default_batch_size() -> i64 {
    3
}

fn default_pause_secs() -> f64 {
    7.0
}

fn default_ordering_column() -> String {
    "price_date".to_string()
}

fn default_source_view() -> String {
    "stock_daily_prices".to_string()
}

fn default_fund_columns() -> Vec<String> {
    vec!["eps_basic_net".to_string()]
}

fn default_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_s3_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_allow_http() -> bool {
    true
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        Self::from_config(builder.build()?)
    }

    /// Parses settings from an in-memory TOML document, without environment
    /// overrides.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(config::File::from_str(contents, FileFormat::Toml))
            .build()?;

        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Settings = config.try_deserialize()?;

        debug!(
            replay = ?settings.replay,
            catalog = ?settings.catalog,
            "Parsed settings"
        );

        Ok(settings)
    }
}
