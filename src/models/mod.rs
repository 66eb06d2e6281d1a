use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use std::str::FromStr;

// ── Security type ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityType {
    Equity,
    Etf,
    Reit,
}

impl SecurityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityType::Equity => "equity",
            SecurityType::Etf => "etf",
            SecurityType::Reit => "reit",
        }
    }

    /// ETF and REIT listings are more specific than the generic equity tag
    /// the movers tables give every symbol.
    pub fn is_specific(&self) -> bool {
        !matches!(self, SecurityType::Equity)
    }
}

impl Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equity" => Ok(SecurityType::Equity),
            "etf" => Ok(SecurityType::Etf),
            "reit" => Ok(SecurityType::Reit),
            other => Err(format!("Invalid security type: {}", other)),
        }
    }
}

// ── Index type ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    MarketIndex,
    Sector,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::MarketIndex => "market_index",
            IndexType::Sector => "sector",
        }
    }
}

impl Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "market_index" => Ok(IndexType::MarketIndex),
            "sector" => Ok(IndexType::Sector),
            other => Err(format!("Invalid index type: {}", other)),
        }
    }
}

// ── Securities ────────────────────────────────────────────────────────────────

/// A security as first sighted on the homepage, before it has a store id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSecurity {
    pub symbol: String,
    pub name: Option<String>,
    pub security_type: SecurityType,
    pub sector: Option<String>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    #[serde(skip_serializing)]
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
    pub security_type: SecurityType,
    pub sector: Option<String>,
    pub currency: String,
    pub is_active: bool,
}

// ── Observations ──────────────────────────────────────────────────────────────

/// One security's price line for a trade date, keyed by symbol until the
/// pipeline resolves it to a security id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub price: Option<f64>,
    pub change_pct: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume: Option<i64>,
    pub trades_count: Option<i64>,
}

/// Stored price joined with its security, as served by the read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub symbol: String,
    pub currency: String,
    pub trade_date: NaiveDate,
    pub price: Option<f64>,
    pub change_pct: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume: Option<i64>,
    pub trades_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexObservation {
    pub index_name: String,
    pub index_type: IndexType,
    pub trade_date: NaiveDate,
    pub index_value: Option<f64>,
    pub change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub trade_date: NaiveDate,
    pub total_trades: Option<i64>,
    pub total_turnover: Option<f64>,
    pub market_cap: Option<f64>,
    pub foreign_purchases: Option<f64>,
    pub foreign_sales: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    #[serde(flatten)]
    pub snapshot: MarketSnapshot,
    pub gainers_count: i64,
    pub losers_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Gainer,
    Loser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopMover {
    pub symbol: String,
    pub price: Option<f64>,
    pub change_pct: Option<f64>,
    pub movement_type: MovementType,
}

// ── Scrape audit trail ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Success,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Success => "success",
            ScrapeStatus::Failed => "failed",
        }
    }
}

impl FromStr for ScrapeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ScrapeStatus::Success),
            "failed" => Ok(ScrapeStatus::Failed),
            other => Err(format!("Invalid scrape status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeLog {
    pub status: ScrapeStatus,
    pub source_url: String,
    pub records_parsed: i64,
    pub error_message: Option<String>,
    /// Serialized `RawSnapshot`, kept for audit and replay.
    pub raw_snapshot: Option<String>,
    pub trade_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredScrapeLog {
    pub id: i64,
    pub log: ScrapeLog,
    pub created_at: NaiveDateTime,
}

// ── API keys ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    /// (daily_limit, monthly_limit)
    pub fn limits(&self) -> (i64, i64) {
        match self {
            Tier::Free => (100, 5_000),
            Tier::Pro => (1_000, 50_000),
            Tier::Enterprise => (10_000, 1_000_000),
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!(
                "Invalid tier '{}'. Choose from: free, pro, enterprise",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewApiKey {
    pub key_hash: String,
    pub key_prefix: String,
    pub user_email: String,
    pub tier: Tier,
}

/// Stored key metadata. The hash never leaves the store layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKey {
    pub id: i64,
    pub key_prefix: String,
    pub user_email: String,
    pub tier: Tier,
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub requests_today: i64,
    pub requests_month: i64,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub last_used_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageStats {
    pub total_keys: i64,
    pub active_keys: i64,
    pub requests_today: i64,
    pub requests_month: i64,
    /// (user_email, requests_today), busiest first
    pub top_users: Vec<(String, i64)>,
}

// ── Raw snapshot (scraper output) ─────────────────────────────────────────────

/// One homepage scrape before normalisation. Field values are kept as the
/// scraper produced them: strings with separators and glyphs, or numbers
/// when replaying a cleaned capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSnapshot {
    pub top_gainers: Vec<RawSecurityRow>,
    pub top_losers: Vec<RawSecurityRow>,
    pub etfs: Vec<RawSecurityRow>,
    pub reits: Vec<RawSecurityRow>,
    pub market_indices: Vec<RawIndexRow>,
    pub sector_indices: Vec<RawIndexRow>,
    pub market_activity: Option<RawMarketActivity>,
}

impl RawSnapshot {
    pub fn row_count(&self) -> usize {
        self.top_gainers.len()
            + self.top_losers.len()
            + self.etfs.len()
            + self.reits.len()
            + self.market_indices.len()
            + self.sector_indices.len()
            + usize::from(self.has_market_activity())
    }

    pub fn has_market_activity(&self) -> bool {
        self.market_activity
            .as_ref()
            .map(|a| !a.is_empty())
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSecurityRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trades_count: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawIndexRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMarketActivity {
    /// Date text lifted from the section heading, e.g. "05 DEC 2025".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_date: Option<String>,
    #[serde(alias = "total_trades", skip_serializing_if = "Option::is_none")]
    pub trades_count: Option<Value>,
    #[serde(alias = "total_turnover", skip_serializing_if = "Option::is_none")]
    pub turnover: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_purchases: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_sales: Option<Value>,
}

impl RawMarketActivity {
    pub fn is_empty(&self) -> bool {
        self.trade_date.is_none()
            && self.trades_count.is_none()
            && self.turnover.is_none()
            && self.market_cap.is_none()
            && self.foreign_purchases.is_none()
            && self.foreign_sales.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_limits() {
        assert_eq!(Tier::Free.limits(), (100, 5_000));
        assert_eq!(Tier::Pro.limits(), (1_000, 50_000));
        assert_eq!(Tier::Enterprise.limits(), (10_000, 1_000_000));
        assert_eq!("PRO".parse::<Tier>(), Ok(Tier::Pro));
        assert!("gold".parse::<Tier>().is_err());
    }

    #[test]
    fn test_snapshot_missing_categories_default_empty() {
        let snap: RawSnapshot = serde_json::from_value(json!({
            "top_gainers": [{"symbol": "DELTA.zw", "price": 120.5, "change_pct": "3.2%"}],
            "market_activity": {}
        }))
        .unwrap();

        assert_eq!(snap.top_gainers.len(), 1);
        assert!(snap.etfs.is_empty());
        assert!(!snap.has_market_activity());
        assert_eq!(snap.row_count(), 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap: RawSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snap.is_empty());
    }
}
