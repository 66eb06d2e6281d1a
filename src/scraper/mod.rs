pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::RawSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;
use url::Url;

use self::http_client::HttpClient;
use self::parsers::parse_homepage;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable snapshot source: the live homepage, or a captured snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<RawSnapshot>;

    /// Recorded in the scrape log.
    fn source_url(&self) -> &str;
}

// ── ZSE homepage scraper ──────────────────────────────────────────────────────

pub struct ZseScraper {
    client: HttpClient,
    base_url: String,
}

impl ZseScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid scraper base_url {:?}", config.base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("Scraper base_url must be http(s): {}", base_url);
        }

        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SnapshotSource for ZseScraper {
    async fn fetch_snapshot(&self) -> Result<RawSnapshot> {
        info!("Fetching homepage {}", self.base_url);
        let html = self
            .client
            .get_text(&self.base_url)
            .await
            .context("Failed to fetch ZSE homepage")?;

        let snapshot = parse_homepage(&html)?;
        info!(
            "Parsed {} gainers, {} losers, {} ETFs, {} REITs, {} indices, {} sectors, market activity: {}",
            snapshot.top_gainers.len(),
            snapshot.top_losers.len(),
            snapshot.etfs.len(),
            snapshot.reits.len(),
            snapshot.market_indices.len(),
            snapshot.sector_indices.len(),
            snapshot.has_market_activity(),
        );
        Ok(snapshot)
    }

    fn source_url(&self) -> &str {
        &self.base_url
    }
}

// ── Captured snapshot replay ──────────────────────────────────────────────────

/// Replays a snapshot JSON file, e.g. a `raw_snapshot` taken from the scrape
/// log, for backfills and re-ingestion.
pub struct FileSource {
    path: PathBuf,
    label: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = format!("file://{}", path.display());
        Self { path, label }
    }
}

#[async_trait]
impl SnapshotSource for FileSource {
    async fn fetch_snapshot(&self) -> Result<RawSnapshot> {
        info!("Replaying snapshot from {:?}", self.path);
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid snapshot JSON in {:?}", self.path))
    }

    fn source_url(&self) -> &str {
        &self.label
    }
}
