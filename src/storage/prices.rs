use super::{clamp_limit, SqlStore};
use crate::models::{MovementType, PriceObservation, PriceRecord, TopMover};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone)]
pub struct PriceQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: usize,
}

impl Default for PriceQuery {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            limit: 30,
        }
    }
}

pub trait PriceStore {
    /// Insert or overwrite the (security, trade_date) observation.
    fn upsert_price(&self, security_id: i64, price: &PriceObservation, now: NaiveDateTime)
        -> Result<()>;

    /// Newest first.
    fn price_history(&self, symbol: &str, query: &PriceQuery) -> Result<Vec<PriceRecord>>;

    fn latest_price(&self, symbol: &str) -> Result<Option<PriceRecord>>;

    /// Movers on the most recent trade date held in the store.
    fn top_movers(&self, movement: MovementType, limit: usize) -> Result<Vec<TopMover>>;
}

fn map_price(r: &rusqlite::Row<'_>) -> rusqlite::Result<PriceRecord> {
    Ok(PriceRecord {
        symbol: r.get(0)?,
        currency: r.get(1)?,
        trade_date: r.get(2)?,
        price: r.get(3)?,
        change_pct: r.get(4)?,
        market_cap: r.get(5)?,
        volume: r.get(6)?,
        trades_count: r.get(7)?,
    })
}

impl PriceStore for SqlStore<'_> {
    fn upsert_price(
        &self,
        security_id: i64,
        price: &PriceObservation,
        now: NaiveDateTime,
    ) -> Result<()> {
        // Price fields are last-write-wins so re-scrapes can correct a day.
        // Counts survive a later sighting that omits them.
        self.conn
            .execute(
                r#"INSERT INTO daily_prices
                       (security_id, trade_date, price, change_pct, market_cap, volume, trades_count, captured_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                   ON CONFLICT (security_id, trade_date) DO UPDATE SET
                       price        = excluded.price,
                       change_pct   = excluded.change_pct,
                       market_cap   = excluded.market_cap,
                       volume       = COALESCE(excluded.volume, daily_prices.volume),
                       trades_count = COALESCE(excluded.trades_count, daily_prices.trades_count),
                       captured_at  = excluded.captured_at"#,
                params![
                    security_id,
                    price.trade_date,
                    price.price,
                    price.change_pct,
                    price.market_cap,
                    price.volume,
                    price.trades_count,
                    now,
                ],
            )
            .with_context(|| format!("upsert price {} {}", price.symbol, price.trade_date))?;
        Ok(())
    }

    fn price_history(&self, symbol: &str, query: &PriceQuery) -> Result<Vec<PriceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT s.symbol, s.currency, dp.trade_date, dp.price, dp.change_pct,
                      dp.market_cap, dp.volume, dp.trades_count
               FROM daily_prices dp
               JOIN securities s ON s.id = dp.security_id
               WHERE s.symbol = ?1
                 AND dp.trade_date BETWEEN COALESCE(?2, '0000-01-01')
                                       AND COALESCE(?3, '9999-12-31')
               ORDER BY dp.trade_date DESC
               LIMIT {}"#,
            clamp_limit(query.limit)
        ))?;
        let rows = stmt
            .query_map(params![symbol, query.start_date, query.end_date], map_price)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn latest_price(&self, symbol: &str) -> Result<Option<PriceRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"SELECT symbol, currency, trade_date, price, change_pct,
                          market_cap, volume, trades_count
                   FROM v_latest_prices
                   WHERE symbol = ?1"#,
                params![symbol],
                map_price,
            )
            .optional()?)
    }

    fn top_movers(&self, movement: MovementType, limit: usize) -> Result<Vec<TopMover>> {
        let (condition, order) = match movement {
            MovementType::Gainer => ("dp.change_pct > 0", "DESC"),
            MovementType::Loser => ("dp.change_pct < 0", "ASC"),
        };
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT s.symbol, dp.price, dp.change_pct
               FROM daily_prices dp
               JOIN securities s ON s.id = dp.security_id
               WHERE dp.trade_date = (SELECT MAX(trade_date) FROM daily_prices)
                 AND {}
               ORDER BY dp.change_pct {}, s.symbol
               LIMIT {}"#,
            condition,
            order,
            clamp_limit(limit)
        ))?;
        let rows = stmt
            .query_map([], |r| {
                Ok(TopMover {
                    symbol: r.get(0)?,
                    price: r.get(1)?,
                    change_pct: r.get(2)?,
                    movement_type: movement,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
