//! Raw snapshot → typed records.
//!
//! The normaliser is pure: it never touches the store or the clock. The
//! caller supplies "today" so trade-date fallback stays deterministic and
//! testable.

pub mod cleaner;

use crate::error::IngestError;
use crate::models::{
    IndexObservation, IndexType, MarketSnapshot, NewSecurity, PriceObservation, RawIndexRow,
    RawSecurityRow, RawSnapshot, SecurityType,
};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use self::cleaner::{
    normalise_symbol, normalise_text, opt_f64, opt_i64, parse_heading_date, parse_override_date,
};

// ── Trade date ────────────────────────────────────────────────────────────────

/// Where the trade date for a run came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSource {
    /// Parsed from the market-activity heading.
    Heading,
    /// Supplied by the operator.
    Override,
    /// No heading on the page; processing date used.
    Today,
    /// Heading present but unparseable; processing date used.
    Fallback { raw: String },
}

impl fmt::Display for DateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSource::Heading => f.write_str("heading"),
            DateSource::Override => f.write_str("override"),
            DateSource::Today => f.write_str("today"),
            DateSource::Fallback { raw } => write!(f, "fallback (unparseable {:?})", raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeDate {
    pub date: NaiveDate,
    pub source: DateSource,
}

/// Resolve the single authoritative trade date for a snapshot.
///
/// A malformed heading still resolves (to `today`) but is reported as
/// `DateSource::Fallback`; whether that is fatal is the pipeline's call.
pub fn resolve_trade_date(heading: Option<&str>, today: NaiveDate) -> TradeDate {
    match heading.map(str::trim).filter(|h| !h.is_empty()) {
        None => {
            warn!("No trade date heading in snapshot, using processing date {}", today);
            TradeDate { date: today, source: DateSource::Today }
        }
        Some(raw) => match parse_heading_date(raw) {
            Some(date) => TradeDate { date, source: DateSource::Heading },
            None => {
                warn!(
                    "Could not parse trade date heading {:?}, falling back to {}",
                    raw, today
                );
                TradeDate {
                    date: today,
                    source: DateSource::Fallback { raw: raw.to_string() },
                }
            }
        },
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSnapshot {
    pub trade_date: TradeDate,
    /// One entry per symbol, in first-sighting order.
    pub securities: Vec<NewSecurity>,
    /// One entry per symbol; later sightings overwrite earlier ones.
    pub prices: Vec<PriceObservation>,
    pub indices: Vec<IndexObservation>,
    pub market: Option<MarketSnapshot>,
    /// Rows dropped for lacking a usable symbol or index name.
    pub skipped_rows: usize,
}

// ── Normaliser ────────────────────────────────────────────────────────────────

pub fn normalize(
    raw: &RawSnapshot,
    date_override: Option<&str>,
    today: NaiveDate,
    currency: &str,
) -> Result<NormalizedSnapshot, IngestError> {
    let trade_date = match date_override {
        Some(s) => TradeDate {
            date: parse_override_date(s)
                .ok_or_else(|| IngestError::TradeDateUnparseable { raw: s.to_string() })?,
            source: DateSource::Override,
        },
        None => resolve_trade_date(
            raw.market_activity
                .as_ref()
                .and_then(|a| a.trade_date.as_deref()),
            today,
        ),
    };
    let date = trade_date.date;

    let mut builder = SecurityBuilder::new(date, currency);
    let lists: [(&[RawSecurityRow], SecurityType); 4] = [
        (raw.top_gainers.as_slice(), SecurityType::Equity),
        (raw.top_losers.as_slice(), SecurityType::Equity),
        (raw.etfs.as_slice(), SecurityType::Etf),
        (raw.reits.as_slice(), SecurityType::Reit),
    ];
    for (rows, security_type) in lists {
        for row in rows {
            builder.push(row, security_type);
        }
    }

    let mut skipped_rows = builder.skipped;
    let mut indices = Vec::new();
    let index_lists: [(&[RawIndexRow], IndexType); 2] = [
        (raw.market_indices.as_slice(), IndexType::MarketIndex),
        (raw.sector_indices.as_slice(), IndexType::Sector),
    ];
    for (rows, index_type) in index_lists {
        for row in rows {
            match index_row(row, index_type, date) {
                Some(obs) => indices.push(obs),
                None => skipped_rows += 1,
            }
        }
    }
    dedup_indices(&mut indices);

    let market = raw
        .market_activity
        .as_ref()
        .filter(|a| !a.is_empty())
        .map(|a| MarketSnapshot {
            trade_date: date,
            total_trades: opt_i64(a.trades_count.as_ref()),
            total_turnover: opt_f64(a.turnover.as_ref()),
            market_cap: opt_f64(a.market_cap.as_ref()),
            foreign_purchases: opt_f64(a.foreign_purchases.as_ref()),
            foreign_sales: opt_f64(a.foreign_sales.as_ref()),
        });

    let (securities, prices) = builder.finish();
    debug!(
        "Normalised {} securities, {} prices, {} indices, market snapshot: {}",
        securities.len(),
        prices.len(),
        indices.len(),
        market.is_some()
    );

    Ok(NormalizedSnapshot {
        trade_date,
        securities,
        prices,
        indices,
        market,
        skipped_rows,
    })
}

/// Collapses repeated symbols across the movers/ETF/REIT lists.
struct SecurityBuilder<'a> {
    date: NaiveDate,
    currency: &'a str,
    securities: Vec<NewSecurity>,
    prices: Vec<PriceObservation>,
    by_symbol: HashMap<String, usize>,
    skipped: usize,
}

impl<'a> SecurityBuilder<'a> {
    fn new(date: NaiveDate, currency: &'a str) -> Self {
        Self {
            date,
            currency,
            securities: Vec::new(),
            prices: Vec::new(),
            by_symbol: HashMap::new(),
            skipped: 0,
        }
    }

    fn push(&mut self, row: &RawSecurityRow, security_type: SecurityType) {
        let Some(symbol) = row.symbol.as_deref().and_then(normalise_symbol) else {
            debug!("Skipping {} row without symbol: {:?}", security_type, row);
            self.skipped += 1;
            return;
        };

        let price = PriceObservation {
            symbol: symbol.clone(),
            trade_date: self.date,
            price: opt_f64(row.price.as_ref()),
            change_pct: opt_f64(row.change_pct.as_ref()),
            market_cap: opt_f64(row.market_cap.as_ref()),
            volume: opt_i64(row.volume.as_ref()),
            trades_count: opt_i64(row.trades_count.as_ref()),
        };
        let name = normalise_text(row.name.as_deref());

        match self.by_symbol.get(&symbol) {
            Some(&i) => {
                let existing = &mut self.securities[i];
                if security_type.is_specific() {
                    existing.security_type = security_type;
                }
                if existing.name.is_none() {
                    existing.name = name;
                }
                self.prices[i] = price;
            }
            None => {
                self.by_symbol.insert(symbol.clone(), self.securities.len());
                self.securities.push(NewSecurity {
                    symbol,
                    name,
                    security_type,
                    sector: None,
                    currency: self.currency.to_string(),
                });
                self.prices.push(price);
            }
        }
    }

    fn finish(self) -> (Vec<NewSecurity>, Vec<PriceObservation>) {
        (self.securities, self.prices)
    }
}

fn index_row(row: &RawIndexRow, index_type: IndexType, date: NaiveDate) -> Option<IndexObservation> {
    let index_name = normalise_text(row.name.as_deref())?;
    Some(IndexObservation {
        index_name,
        index_type,
        trade_date: date,
        index_value: opt_f64(row.value.as_ref()),
        change_pct: opt_f64(row.change_pct.as_ref()),
    })
}

/// (index_name, trade_date) is the store key; keep the last sighting.
fn dedup_indices(indices: &mut Vec<IndexObservation>) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<IndexObservation> = Vec::with_capacity(indices.len());
    for obs in indices.drain(..) {
        match seen.get(&obs.index_name) {
            Some(&i) => out[i] = obs,
            None => {
                seen.insert(obs.index_name.clone(), out.len());
                out.push(obs);
            }
        }
    }
    *indices = out;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 9).unwrap()
    }

    fn snapshot(value: serde_json::Value) -> RawSnapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_resolve_trade_date_from_heading() {
        let td = resolve_trade_date(Some("05 DEC 2025"), today());
        assert_eq!(td.date, NaiveDate::from_ymd_opt(2025, 12, 5).unwrap());
        assert_eq!(td.source, DateSource::Heading);
    }

    #[test]
    fn test_resolve_trade_date_malformed_falls_back_observably() {
        let td = resolve_trade_date(Some("Market Activity 2025/12/05"), today());
        assert_eq!(td.date, today());
        assert_eq!(
            td.source,
            DateSource::Fallback { raw: "Market Activity 2025/12/05".to_string() }
        );
    }

    #[test]
    fn test_resolve_trade_date_absent_is_today() {
        let td = resolve_trade_date(None, today());
        assert_eq!(td, TradeDate { date: today(), source: DateSource::Today });
        assert_eq!(resolve_trade_date(Some("  "), today()).source, DateSource::Today);
    }

    #[test]
    fn test_normalize_gainer_and_activity() {
        let raw = snapshot(json!({
            "top_gainers": [{"symbol": "DELTA.zw", "price": 120.5, "change_pct": 3.2}],
            "market_activity": {"trade_date": "05 DEC 2025", "trades_count": "1,200"}
        }));

        let n = normalize(&raw, None, today(), "ZWG").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 12, 5).unwrap();

        assert_eq!(n.trade_date.source, DateSource::Heading);
        assert_eq!(
            n.securities,
            vec![NewSecurity {
                symbol: "DELTA".into(),
                name: None,
                security_type: SecurityType::Equity,
                sector: None,
                currency: "ZWG".into(),
            }]
        );
        assert_eq!(n.prices.len(), 1);
        assert_eq!(n.prices[0].trade_date, date);
        assert_eq!(n.prices[0].price, Some(120.5));
        assert_eq!(n.prices[0].change_pct, Some(3.2));

        let market = n.market.unwrap();
        assert_eq!(market.trade_date, date);
        assert_eq!(market.total_trades, Some(1200));
        assert_eq!(market.total_turnover, None);
    }

    #[test]
    fn test_normalize_types_and_dedup() {
        let raw = snapshot(json!({
            "top_gainers": [{"symbol": "cbz", "name": "CBZ Holdings", "price": "10.00"}],
            "top_losers": [{"symbol": "ECO.zw", "price": "250.00", "change_pct": "-2.5%"}],
            "etfs": [
                {"symbol": "MIZ.zw", "price": "1.20"},
                {"symbol": "CBZ", "price": "10.50"}
            ],
            "reits": [{"symbol": "TIG", "price": "N/A"}, {"name": "no symbol"}]
        }));

        let n = normalize(&raw, None, today(), "ZWG").unwrap();
        let symbols: Vec<_> = n.securities.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["CBZ", "ECO", "MIZ", "TIG"]);

        let cbz = &n.securities[0];
        assert_eq!(cbz.security_type, SecurityType::Etf);
        assert_eq!(cbz.name.as_deref(), Some("CBZ Holdings"));
        assert_eq!(n.prices[0].price, Some(10.5));

        assert_eq!(n.prices[1].change_pct, Some(-2.5));
        assert_eq!(n.securities[3].security_type, SecurityType::Reit);
        assert_eq!(n.prices[3].price, None);
        assert_eq!(n.skipped_rows, 1);
        assert!(n.market.is_none());
        assert_eq!(n.trade_date.source, DateSource::Today);
    }

    #[test]
    fn test_normalize_indices() {
        let raw = snapshot(json!({
            "market_indices": [
                {"name": "ZSE All Share", "value": "21,345.67", "change_pct": "▲ 0.45%"},
                {"name": "", "value": "1"}
            ],
            "sector_indices": [{"name": "Banking", "value": "1,002.10", "change_pct": "-"}]
        }));

        let n = normalize(&raw, Some("2025-12-05"), today(), "ZWG").unwrap();
        assert_eq!(n.trade_date.source, DateSource::Override);
        assert_eq!(n.indices.len(), 2);
        assert_eq!(n.indices[0].index_type, IndexType::MarketIndex);
        assert_eq!(n.indices[0].index_value, Some(21345.67));
        assert_eq!(n.indices[0].change_pct, Some(0.45));
        assert_eq!(n.indices[1].index_type, IndexType::Sector);
        assert_eq!(n.indices[1].change_pct, None);
        assert_eq!(n.skipped_rows, 1);
    }

    #[test]
    fn test_normalize_bad_override_is_an_error() {
        let raw = snapshot(json!({"top_gainers": [{"symbol": "DELTA"}]}));
        let err = normalize(&raw, Some("yesterday"), today(), "ZWG").unwrap_err();
        assert!(matches!(err, IngestError::TradeDateUnparseable { .. }));
    }
}
