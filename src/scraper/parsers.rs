//! ZSE homepage → `RawSnapshot`.
//!
//! The homepage is a stack of titled tables. Each table is classified by its
//! caption or, failing that, the nearest heading before it. Cell text is
//! kept verbatim; cleaning happens in the normaliser.

use crate::models::{RawIndexRow, RawMarketActivity, RawSecurityRow, RawSnapshot};
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Gainers,
    Losers,
    Etfs,
    Reits,
    MarketIndices,
    SectorIndices,
    MarketActivity,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", css, e))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn classify(heading: &str) -> Option<Section> {
    let h = heading.to_lowercase();
    if h.contains("gainer") {
        Some(Section::Gainers)
    } else if h.contains("loser") {
        Some(Section::Losers)
    } else if h.contains("etf") || h.contains("traded fund") {
        Some(Section::Etfs)
    } else if h.contains("reit") || h.contains("real estate") {
        Some(Section::Reits)
    } else if h.contains("sector") {
        Some(Section::SectorIndices)
    } else if h.contains("ind") {
        Some(Section::MarketIndices)
    } else if h.contains("activity") {
        Some(Section::MarketActivity)
    } else {
        None
    }
}

pub fn parse_homepage(html: &str) -> Result<RawSnapshot> {
    let doc = Html::parse_document(html);
    let block_sel = selector(
        "h1, h2, h3, h4, h5, h6, table, .card-header, .card-title, .panel-heading",
    )?;
    let caption_sel = selector("caption")?;
    let tr_sel = selector("tr")?;
    let th_sel = selector("th")?;
    let td_sel = selector("td")?;

    let mut snapshot = RawSnapshot::default();
    let mut last_heading: Option<String> = None;

    for el in doc.select(&block_sel) {
        if el.value().name() != "table" {
            let text = text_of(el);
            if !text.is_empty() {
                last_heading = Some(text);
            }
            continue;
        }

        let heading = el
            .select(&caption_sel)
            .next()
            .map(text_of)
            .filter(|c| !c.is_empty())
            .or_else(|| last_heading.take());
        let Some(heading) = heading else {
            continue;
        };
        let Some(section) = classify(&heading) else {
            debug!("Ignoring table under heading {:?}", heading);
            continue;
        };

        let header: Vec<String> = el
            .select(&tr_sel)
            .find(|tr| tr.select(&th_sel).next().is_some())
            .map(|tr| tr.select(&th_sel).map(|th| text_of(th).to_lowercase()).collect())
            .unwrap_or_default();
        let rows: Vec<Vec<String>> = el
            .select(&tr_sel)
            .map(|tr| tr.select(&td_sel).map(text_of).collect::<Vec<_>>())
            .filter(|cells| !cells.is_empty())
            .collect();

        debug!("Table {:?} ({:?}): {} rows", heading, section, rows.len());

        match section {
            Section::Gainers => snapshot.top_gainers.extend(security_rows(&header, &rows)),
            Section::Losers => snapshot.top_losers.extend(security_rows(&header, &rows)),
            Section::Etfs => snapshot.etfs.extend(security_rows(&header, &rows)),
            Section::Reits => snapshot.reits.extend(security_rows(&header, &rows)),
            Section::MarketIndices => snapshot.market_indices.extend(index_rows(&header, &rows)),
            Section::SectorIndices => snapshot.sector_indices.extend(index_rows(&header, &rows)),
            Section::MarketActivity => {
                snapshot.market_activity = Some(market_activity(&heading, &rows));
            }
        }
    }

    Ok(snapshot)
}

// ── Column mapping ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct SecurityColumns {
    symbol: Option<usize>,
    name: Option<usize>,
    price: Option<usize>,
    change_pct: Option<usize>,
    market_cap: Option<usize>,
    volume: Option<usize>,
    trades_count: Option<usize>,
}

impl SecurityColumns {
    fn from_header(header: &[String]) -> Self {
        let mut cols = Self::default();
        for (i, h) in header.iter().enumerate() {
            let slot = if h.contains("cap") {
                &mut cols.market_cap
            } else if h.contains("trades") || h.contains("deals") {
                &mut cols.trades_count
            } else if h.contains("vol") {
                &mut cols.volume
            } else if h.contains("change") || h.contains('%') || h.contains("chg") {
                &mut cols.change_pct
            } else if h.contains("price") || h.contains("close") || h.contains("last") {
                &mut cols.price
            } else if h.contains("symbol") || h.contains("ticker") || h.contains("code") || h.contains("counter") {
                &mut cols.symbol
            } else if h.contains("name") || h.contains("company") || h.contains("security") {
                &mut cols.name
            } else {
                continue;
            };
            slot.get_or_insert(i);
        }

        if cols.symbol.is_none() {
            // Headerless (or unrecognised) tables: symbol, price, change.
            cols = Self {
                symbol: Some(0),
                price: Some(1),
                change_pct: Some(2),
                ..Self::default()
            };
        }
        cols
    }
}

fn cell(cells: &[String], idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| cells.get(i)).filter(|s| !s.is_empty()).cloned()
}

fn cell_value(cells: &[String], idx: Option<usize>) -> Option<Value> {
    cell(cells, idx).map(Value::String)
}

fn security_rows(header: &[String], rows: &[Vec<String>]) -> Vec<RawSecurityRow> {
    let cols = SecurityColumns::from_header(header);
    rows.iter()
        .map(|cells| RawSecurityRow {
            symbol: cell(cells, cols.symbol),
            name: cell(cells, cols.name),
            price: cell_value(cells, cols.price),
            change_pct: cell_value(cells, cols.change_pct),
            market_cap: cell_value(cells, cols.market_cap),
            volume: cell_value(cells, cols.volume),
            trades_count: cell_value(cells, cols.trades_count),
        })
        .collect()
}

fn index_rows(header: &[String], rows: &[Vec<String>]) -> Vec<RawIndexRow> {
    let find = |keys: &[&str]| header.iter().position(|h| keys.iter().any(|k| h.contains(k)));
    let (mut name, mut value, mut change) = (
        find(&["index", "name", "sector"]),
        find(&["value", "level", "close", "points"]),
        find(&["change", "%"]),
    );
    if name.is_none() || value.is_none() {
        (name, value, change) = (Some(0), Some(1), Some(2));
    }

    rows.iter()
        .map(|cells| RawIndexRow {
            name: cell(cells, name),
            value: cell_value(cells, value),
            change_pct: cell_value(cells, change),
        })
        .collect()
}

fn market_activity(heading: &str, rows: &[Vec<String>]) -> RawMarketActivity {
    let mut activity = RawMarketActivity {
        trade_date: find_embedded_date(heading)
            // A heading with digits was trying to carry a date; hand it on
            // so the normaliser can report it as unparseable.
            .or_else(|| heading.chars().any(|c| c.is_ascii_digit()).then(|| heading.to_string())),
        ..RawMarketActivity::default()
    };

    for cells in rows.iter().filter(|c| c.len() >= 2) {
        let label = cells[0].to_lowercase();
        let value = Some(Value::String(cells[1].clone()));
        if label.contains("foreign") && (label.contains("purchase") || label.contains("buy")) {
            activity.foreign_purchases = value;
        } else if label.contains("foreign") && (label.contains("sale") || label.contains("sell")) {
            activity.foreign_sales = value;
        } else if label.contains("trades") || label.contains("deals") {
            activity.trades_count = value;
        } else if label.contains("turnover") {
            activity.turnover = value;
        } else if label.contains("capitali") || label.contains("market cap") {
            activity.market_cap = value;
        }
    }
    activity
}

/// Pull "05 DEC 2025" out of e.g. "Market Activity as at 05 Dec, 2025".
fn find_embedded_date(heading: &str) -> Option<String> {
    let tokens: Vec<&str> = heading
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':' || c == '-')
        .filter(|t| !t.is_empty())
        .collect();

    tokens.windows(3).find_map(|w| {
        let (day, month, year) = (w[0], w[1], w[2]);
        let ok = (1..=2).contains(&day.len())
            && day.chars().all(|c| c.is_ascii_digit())
            && month.len() >= 3
            && month.chars().all(|c| c.is_ascii_alphabetic())
            && year.len() == 4
            && year.chars().all(|c| c.is_ascii_digit());
        ok.then(|| format!("{:0>2} {} {}", day, month[..3].to_uppercase(), year))
    })
}
