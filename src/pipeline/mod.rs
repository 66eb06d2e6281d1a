//! Pipeline orchestrator: snapshot source → normaliser → store.
//!
//! One `run()` is one unit of work:
//!   1. Fetch the homepage snapshot (an empty snapshot is fatal).
//!   2. Normalise it and resolve the trade date.
//!   3. In a single transaction: securities first, then prices, indices and
//!      the market snapshot, then the success entry in `scrape_logs`.
//!
//! Any failure rolls the transaction back, appends a failed scrape log with
//! the full error chain, and is returned to the caller. Re-running the same
//! snapshot for the same trade date leaves the store unchanged apart from
//! capture timestamps and the new log entry.

use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::models::{ScrapeLog, ScrapeStatus};
use crate::normalizer::{normalize, DateSource, NormalizedSnapshot};
use crate::scraper::SnapshotSource;
use crate::storage::{LogStore, MarketStore, PriceStore, Repository, SecurityStore};
use crate::utils::Timer;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Pipeline {
    repo: Arc<Repository>,
    source: Box<dyn SnapshotSource>,
    config: PipelineConfig,
    tz: Tz,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    pub trade_date: NaiveDate,
    pub date_source: DateSource,
    pub securities_seen: usize,
    pub securities_created: usize,
    pub prices_upserted: usize,
    pub indices_upserted: usize,
    pub snapshot_written: bool,
    /// Prices + indices + market snapshot, as recorded in the scrape log.
    pub records_parsed: i64,
    /// Rows dropped during normalisation or for an unresolved symbol.
    pub warnings: usize,
}

impl Pipeline {
    pub fn new(
        repo: Arc<Repository>,
        source: Box<dyn SnapshotSource>,
        config: PipelineConfig,
        tz: Tz,
    ) -> Self {
        Self {
            repo,
            source,
            config,
            tz,
        }
    }

    /// Run once. `date_override` pins the trade date ("05 DEC 2025" or ISO).
    pub async fn run(&self, date_override: Option<&str>) -> Result<PipelineStats> {
        let _timer = Timer::start("ZSE ingestion run");
        let mut raw_snapshot = None;

        match self.ingest(date_override, &mut raw_snapshot).await {
            Ok(stats) => {
                info!(
                    "=== Done: trade date {} ({}) | {} securities ({} new) | {} prices | {} indices | snapshot: {} | {} warnings ===",
                    stats.trade_date,
                    stats.date_source,
                    stats.securities_seen,
                    stats.securities_created,
                    stats.prices_upserted,
                    stats.indices_upserted,
                    stats.snapshot_written,
                    stats.warnings,
                );
                Ok(stats)
            }
            Err(e) => {
                let e = anyhow::Error::from(e);
                error!("Ingestion failed: {:#}", e);
                self.log_failure(&e, raw_snapshot).await;
                Err(e)
            }
        }
    }

    async fn ingest(
        &self,
        date_override: Option<&str>,
        raw_snapshot: &mut Option<String>,
    ) -> Result<PipelineStats, IngestError> {
        let raw = self.source.fetch_snapshot().await?;
        *raw_snapshot = Some(serde_json::to_string(&raw).context("Failed to serialise snapshot")?);
        if raw.is_empty() {
            return Err(IngestError::ScrapeUnavailable);
        }

        let today = Utc::now().with_timezone(&self.tz).date_naive();
        let normalized = normalize(&raw, date_override, today, &self.config.currency)?;

        if let DateSource::Fallback { raw } = &normalized.trade_date.source {
            if self.config.strict_trade_date {
                return Err(IngestError::TradeDateUnparseable { raw: raw.clone() });
            }
            warn!(
                "Tagging every observation with processing date {} (heading {:?} unparseable)",
                today, raw
            );
        }

        let repo = Arc::clone(&self.repo);
        let log = ScrapeLog {
            status: ScrapeStatus::Success,
            source_url: self.source.source_url().to_string(),
            records_parsed: 0,
            error_message: None,
            raw_snapshot: raw_snapshot.clone(),
            trade_date: Some(normalized.trade_date.date),
        };
        let now = Utc::now().naive_utc();

        let stats = tokio::task::spawn_blocking(move || {
            repo.transaction(|s| persist(s, &normalized, log, now))
        })
        .await
        .context("Store task panicked")??;

        Ok(stats)
    }

    async fn log_failure(&self, err: &anyhow::Error, raw_snapshot: Option<String>) {
        let repo = Arc::clone(&self.repo);
        let log = ScrapeLog {
            status: ScrapeStatus::Failed,
            source_url: self.source.source_url().to_string(),
            records_parsed: 0,
            error_message: Some(format!("{:#}", err)),
            raw_snapshot,
            trade_date: None,
        };
        let now = Utc::now().naive_utc();

        let logged =
            tokio::task::spawn_blocking(move || repo.session(|s| s.append_scrape_log(&log, now)))
                .await;
        match logged {
            Ok(Ok(id)) => info!("Recorded failed run as scrape log #{}", id),
            Ok(Err(e)) => error!("Could not record failed run: {:#}", e),
            Err(e) => error!("Scrape log task panicked: {}", e),
        }
    }
}

/// Write one normalised snapshot. Callers wrap this in a transaction.
fn persist<S>(
    store: &S,
    snapshot: &NormalizedSnapshot,
    mut log: ScrapeLog,
    now: NaiveDateTime,
) -> Result<PipelineStats>
where
    S: SecurityStore + PriceStore + MarketStore + LogStore,
{
    let mut ids: HashMap<&str, i64> = HashMap::with_capacity(snapshot.securities.len());
    let mut securities_created = 0;
    for security in &snapshot.securities {
        let (id, created) = store.get_or_create_security(security, now)?;
        securities_created += usize::from(created);
        ids.insert(security.symbol.as_str(), id);
    }

    let mut warnings = snapshot.skipped_rows;
    let mut prices_upserted = 0;
    for price in &snapshot.prices {
        match ids.get(price.symbol.as_str()) {
            Some(&id) => {
                store.upsert_price(id, price, now)?;
                prices_upserted += 1;
            }
            None => {
                warn!("No security for {} on {}, skipping price", price.symbol, price.trade_date);
                warnings += 1;
            }
        }
    }

    for index in &snapshot.indices {
        store.upsert_index(index, now)?;
    }

    if let Some(market) = &snapshot.market {
        store.upsert_snapshot(market, now)?;
    }

    let snapshot_written = snapshot.market.is_some();
    let records_parsed =
        (prices_upserted + snapshot.indices.len() + usize::from(snapshot_written)) as i64;
    log.records_parsed = records_parsed;
    store.append_scrape_log(&log, now)?;

    Ok(PipelineStats {
        trade_date: snapshot.trade_date.date,
        date_source: snapshot.trade_date.source.clone(),
        securities_seen: snapshot.securities.len(),
        securities_created,
        prices_upserted,
        indices_upserted: snapshot.indices.len(),
        snapshot_written,
        records_parsed,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        NewSecurity, PriceObservation, RawSnapshot, SecurityType,
    };
    use crate::normalizer::TradeDate;
    use crate::storage::PriceQuery;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticSource(RawSnapshot);

    #[async_trait]
    impl SnapshotSource for StaticSource {
        async fn fetch_snapshot(&self) -> Result<RawSnapshot> {
            Ok(self.0.clone())
        }

        fn source_url(&self) -> &str {
            "https://www.zse.co.zw"
        }
    }

    struct FailingSource;

    #[async_trait]
    impl SnapshotSource for FailingSource {
        async fn fetch_snapshot(&self) -> Result<RawSnapshot> {
            anyhow::bail!("connection reset by peer")
        }

        fn source_url(&self) -> &str {
            "https://www.zse.co.zw"
        }
    }

    fn delta_snapshot() -> RawSnapshot {
        serde_json::from_value(json!({
            "top_gainers": [{"symbol": "DELTA.zw", "price": 120.5, "change_pct": 3.2}],
            "market_activity": {"trade_date": "05 DEC 2025", "trades_count": "1,200"}
        }))
        .unwrap()
    }

    fn pipeline(repo: &Arc<Repository>, source: impl SnapshotSource + 'static) -> Pipeline {
        Pipeline::new(
            Arc::clone(repo),
            Box::new(source),
            PipelineConfig::default(),
            chrono_tz::Africa::Harare,
        )
    }

    fn dec5() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 5).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ingest_and_auth_share_a_store_file() {
        use crate::auth::{issue_key, AuthGate};
        use crate::config::StorageConfig;
        use crate::models::Tier;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            db_path: dir.path().join("zse.db"),
            ..StorageConfig::default()
        };
        // Separate handles stand in for the `serve` and `ingest` processes.
        let api_repo = Arc::new(Repository::connect(&config).await.unwrap());
        let ingest_repo = Arc::new(Repository::connect(&config).await.unwrap());

        let issued = api_repo
            .session(|s| issue_key(s, "client@example.com", Tier::Free, Utc::now().naive_utc()))
            .unwrap();
        let gate = AuthGate::new(Arc::clone(&api_repo), Duration::from_secs(5));
        let ingest = pipeline(&ingest_repo, StaticSource(delta_snapshot()));

        let requests = async {
            let mut admitted = Vec::new();
            for _ in 0..10 {
                admitted.push(gate.authenticate(Some(&issued.token)).await);
            }
            admitted
        };
        let (stats, admitted) = tokio::join!(ingest.run(None), requests);

        assert_eq!(stats.unwrap().records_parsed, 2);
        assert!(admitted.iter().all(|a| a.is_ok()), "{:?}", admitted);
        assert_eq!(admitted.last().unwrap().as_ref().unwrap().requests_today, 10);

        let latest = api_repo.session(|s| s.latest_price("DELTA")).unwrap().unwrap();
        assert_eq!(latest.trade_date, dec5());
        assert_eq!(api_repo.stats().unwrap().scrape_logs, 1);
    }

    #[tokio::test]
    async fn test_end_to_end_single_gainer() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let stats = pipeline(&repo, StaticSource(delta_snapshot()))
            .run(None)
            .await
            .unwrap();

        assert_eq!(stats.trade_date, dec5());
        assert_eq!(stats.date_source, DateSource::Heading);
        assert_eq!(stats.securities_created, 1);
        assert_eq!(stats.records_parsed, 2);

        let delta = repo.session(|s| s.get_security("DELTA")).unwrap().unwrap();
        assert_eq!(delta.security_type, SecurityType::Equity);

        let prices = repo
            .session(|s| s.price_history("DELTA", &PriceQuery::default()))
            .unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].trade_date, dec5());
        assert_eq!(prices[0].price, Some(120.5));
        assert_eq!(prices[0].change_pct, Some(3.2));

        let summary = repo.session(|s| s.market_summary(Some(dec5()))).unwrap().unwrap();
        assert_eq!(summary.snapshot.total_trades, Some(1200));

        let logs = repo.session(|s| s.recent_scrape_logs(10)).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log.status, ScrapeStatus::Success);
        assert_eq!(logs[0].log.records_parsed, 2);
        assert_eq!(logs[0].log.trade_date, Some(dec5()));
        let replay: RawSnapshot =
            serde_json::from_str(logs[0].log.raw_snapshot.as_deref().unwrap()).unwrap();
        assert_eq!(replay, delta_snapshot());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let p = pipeline(&repo, StaticSource(delta_snapshot()));

        p.run(None).await.unwrap();
        let before = repo.stats().unwrap();
        let second = p.run(None).await.unwrap();
        let after = repo.stats().unwrap();

        assert_eq!(second.securities_created, 0);
        assert_eq!(before.securities, after.securities);
        assert_eq!(before.prices, after.prices);
        assert_eq!(before.snapshots, after.snapshots);
        assert_eq!(after.scrape_logs, before.scrape_logs + 1);

        let prices = repo
            .session(|s| s.price_history("DELTA", &PriceQuery::default()))
            .unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].price, Some(120.5));
    }

    #[tokio::test]
    async fn test_rescrape_corrects_same_day() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        pipeline(&repo, StaticSource(delta_snapshot())).run(None).await.unwrap();

        let corrected: RawSnapshot = serde_json::from_value(json!({
            "top_gainers": [{"symbol": "DELTA", "price": "121.00", "change_pct": "3.6%"}],
            "market_activity": {"trade_date": "05 DEC 2025", "trades_count": "1,250"}
        }))
        .unwrap();
        pipeline(&repo, StaticSource(corrected)).run(None).await.unwrap();

        let latest = repo.session(|s| s.latest_price("DELTA")).unwrap().unwrap();
        assert_eq!(latest.price, Some(121.0));
        assert_eq!(latest.change_pct, Some(3.6));
        let summary = repo.session(|s| s.market_summary(None)).unwrap().unwrap();
        assert_eq!(summary.snapshot.total_trades, Some(1250));
    }

    #[tokio::test]
    async fn test_empty_snapshot_fails_and_is_logged() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let err = pipeline(&repo, StaticSource(RawSnapshot::default()))
            .run(None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::ScrapeUnavailable)
        ));

        let stats = repo.stats().unwrap();
        assert_eq!(stats.securities, 0);
        let logs = repo.session(|s| s.recent_scrape_logs(10)).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log.status, ScrapeStatus::Failed);
        assert_eq!(logs[0].log.records_parsed, 0);
        assert_eq!(
            logs[0].log.error_message.as_deref(),
            Some("scrape returned no data")
        );
    }

    #[tokio::test]
    async fn test_source_error_is_logged_with_message() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let err = pipeline(&repo, FailingSource).run(None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("connection reset"));

        let logs = repo.session(|s| s.recent_scrape_logs(10)).unwrap();
        assert_eq!(logs[0].log.status, ScrapeStatus::Failed);
        assert!(logs[0].log.error_message.as_deref().unwrap().contains("connection reset"));
        assert_eq!(logs[0].log.raw_snapshot, None);
    }

    fn malformed_date_snapshot() -> RawSnapshot {
        serde_json::from_value(json!({
            "top_gainers": [{"symbol": "DELTA.zw", "price": 120.5, "change_pct": 3.2}],
            "market_activity": {"trade_date": "Market Activity 2025/12/05", "trades_count": "1,200"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_date_fails_when_strict() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let err = pipeline(&repo, StaticSource(malformed_date_snapshot()))
            .run(None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::TradeDateUnparseable { .. })
        ));
        assert_eq!(repo.stats().unwrap().prices, 0);
        assert_eq!(repo.stats().unwrap().scrape_logs, 1);
    }

    #[tokio::test]
    async fn test_malformed_date_falls_back_when_lenient() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let p = Pipeline::new(
            Arc::clone(&repo),
            Box::new(StaticSource(malformed_date_snapshot())),
            PipelineConfig {
                strict_trade_date: false,
                ..PipelineConfig::default()
            },
            chrono_tz::Africa::Harare,
        );

        let stats = p.run(None).await.unwrap();
        assert!(matches!(stats.date_source, DateSource::Fallback { .. }));
        assert_eq!(stats.records_parsed, 2);
    }

    #[tokio::test]
    async fn test_date_override_wins() {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let stats = pipeline(&repo, StaticSource(malformed_date_snapshot()))
            .run(Some("04 DEC 2025"))
            .await
            .unwrap();
        assert_eq!(stats.trade_date, NaiveDate::from_ymd_opt(2025, 12, 4).unwrap());
        assert_eq!(stats.date_source, DateSource::Override);
    }

    #[test]
    fn test_persist_skips_price_without_security() {
        let repo = Repository::open_in_memory().unwrap();
        let snapshot = NormalizedSnapshot {
            trade_date: TradeDate { date: dec5(), source: DateSource::Heading },
            securities: vec![NewSecurity {
                symbol: "DELTA".into(),
                name: None,
                security_type: SecurityType::Equity,
                sector: None,
                currency: "ZWG".into(),
            }],
            prices: vec![
                PriceObservation {
                    symbol: "DELTA".into(),
                    trade_date: dec5(),
                    price: Some(120.5),
                    change_pct: None,
                    market_cap: None,
                    volume: None,
                    trades_count: None,
                },
                PriceObservation {
                    symbol: "GHOST".into(),
                    trade_date: dec5(),
                    price: Some(1.0),
                    change_pct: None,
                    market_cap: None,
                    volume: None,
                    trades_count: None,
                },
            ],
            indices: vec![],
            market: None,
            skipped_rows: 0,
        };
        let log = ScrapeLog {
            status: ScrapeStatus::Success,
            source_url: "test".into(),
            records_parsed: 0,
            error_message: None,
            raw_snapshot: None,
            trade_date: Some(dec5()),
        };

        let stats = repo
            .transaction(|s| persist(s, &snapshot, log, dec5().and_hms_opt(16, 0, 0).unwrap()))
            .unwrap();
        assert_eq!(stats.prices_upserted, 1);
        assert_eq!(stats.warnings, 1);
        assert_eq!(stats.records_parsed, 1);
        assert_eq!(repo.stats().unwrap().prices, 1);
    }
}
