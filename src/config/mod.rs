use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub api: ApiConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Attempts at opening the store before the unit of work fails.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,

    /// Upper bound on a single store operation issued by the read API.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Fail the run when the trade-date heading is present but unparseable,
    /// instead of tagging the whole day with the processing date.
    #[serde(default = "default_true")]
    pub strict_trade_date: bool,

    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Read API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// Ingestion schedule: weekdays at a local time in the exchange's timezone.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<String>,

    /// "HH:MM"
    #[serde(default = "default_run_time")]
    pub time: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Mirror logs to this file in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.zse.co.zw".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1500
}
fn default_user_agent() -> String {
    "zse-market-data/0.1 (market data archive)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/zse.db")
}
fn default_connect_retries() -> u32 {
    3
}
fn default_connect_retry_delay_ms() -> u64 {
    1000
}
fn default_op_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}
fn default_currency() -> String {
    "ZWG".to_string()
}
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8000
}
fn default_weekdays() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}
fn default_run_time() -> String {
    "15:30".to_string()
}
fn default_timezone() -> String {
    "Africa/Harare".to_string()
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            connect_retries: default_connect_retries(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            run_migrations: true,
        }
    }
}

impl StorageConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strict_trade_date: true,
            currency: default_currency(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            weekdays: default_weekdays(),
            time: default_run_time(),
            timezone: default_timezone(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides.
    ///
    /// Environment keys use the `ZSE_` prefix and `__` between sections,
    /// e.g. `ZSE_STORAGE__DB_PATH=/var/lib/zse/zse.db`.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("ZSE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        cfg.try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.storage.db_path, PathBuf::from("data/zse.db"));
        assert_eq!(cfg.storage.connect_retries, 3);
        assert!(cfg.pipeline.strict_trade_date);
        assert_eq!(cfg.api.port, 8000);
        assert_eq!(cfg.schedule.timezone, "Africa/Harare");
        assert_eq!(cfg.schedule.weekdays.len(), 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[storage]\ndb_path = \"/tmp/x.db\"\n[api]\nport = 9000\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.storage.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.storage.op_timeout_ms, 5000);
        assert_eq!(cfg.api.port, 9000);
        assert_eq!(cfg.api.host, "0.0.0.0");
        assert_eq!(cfg.scraper.base_url, "https://www.zse.co.zw");
    }
}
