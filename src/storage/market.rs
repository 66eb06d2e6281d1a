use super::{parse_column, SqlStore};
use crate::models::{IndexObservation, IndexType, MarketSnapshot, MarketSummary};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub index_type: Option<IndexType>,
    /// Latest stored date when absent.
    pub trade_date: Option<NaiveDate>,
}

pub trait MarketStore {
    fn upsert_index(&self, index: &IndexObservation, now: NaiveDateTime) -> Result<()>;

    fn upsert_snapshot(&self, snapshot: &MarketSnapshot, now: NaiveDateTime) -> Result<()>;

    /// Summary for `trade_date`, or the most recent one.
    fn market_summary(&self, trade_date: Option<NaiveDate>) -> Result<Option<MarketSummary>>;

    fn list_indices(&self, filter: &IndexFilter) -> Result<Vec<IndexObservation>>;
}

impl MarketStore for SqlStore<'_> {
    fn upsert_index(&self, index: &IndexObservation, now: NaiveDateTime) -> Result<()> {
        self.conn
            .execute(
                r#"INSERT INTO market_indices
                       (index_name, index_type, trade_date, index_value, change_pct, captured_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                   ON CONFLICT (index_name, trade_date) DO UPDATE SET
                       index_type  = excluded.index_type,
                       index_value = excluded.index_value,
                       change_pct  = excluded.change_pct,
                       captured_at = excluded.captured_at"#,
                params![
                    index.index_name,
                    index.index_type.as_str(),
                    index.trade_date,
                    index.index_value,
                    index.change_pct,
                    now,
                ],
            )
            .with_context(|| format!("upsert index {} {}", index.index_name, index.trade_date))?;
        Ok(())
    }

    fn upsert_snapshot(&self, snapshot: &MarketSnapshot, now: NaiveDateTime) -> Result<()> {
        self.conn
            .execute(
                r#"INSERT INTO market_snapshots
                       (trade_date, total_trades, total_turnover, market_cap,
                        foreign_purchases, foreign_sales, captured_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                   ON CONFLICT (trade_date) DO UPDATE SET
                       total_trades      = excluded.total_trades,
                       total_turnover    = excluded.total_turnover,
                       market_cap        = excluded.market_cap,
                       foreign_purchases = excluded.foreign_purchases,
                       foreign_sales     = excluded.foreign_sales,
                       captured_at       = excluded.captured_at"#,
                params![
                    snapshot.trade_date,
                    snapshot.total_trades,
                    snapshot.total_turnover,
                    snapshot.market_cap,
                    snapshot.foreign_purchases,
                    snapshot.foreign_sales,
                    now,
                ],
            )
            .with_context(|| format!("upsert market snapshot {}", snapshot.trade_date))?;
        Ok(())
    }

    fn market_summary(&self, trade_date: Option<NaiveDate>) -> Result<Option<MarketSummary>> {
        Ok(self
            .conn
            .query_row(
                r#"SELECT trade_date, total_trades, total_turnover, market_cap,
                          foreign_purchases, foreign_sales, gainers_count, losers_count
                   FROM v_market_summary
                   WHERE ?1 IS NULL OR trade_date = ?1
                   ORDER BY trade_date DESC
                   LIMIT 1"#,
                params![trade_date],
                |r| {
                    Ok(MarketSummary {
                        snapshot: MarketSnapshot {
                            trade_date: r.get(0)?,
                            total_trades: r.get(1)?,
                            total_turnover: r.get(2)?,
                            market_cap: r.get(3)?,
                            foreign_purchases: r.get(4)?,
                            foreign_sales: r.get(5)?,
                        },
                        gainers_count: r.get(6)?,
                        losers_count: r.get(7)?,
                    })
                },
            )
            .optional()?)
    }

    fn list_indices(&self, filter: &IndexFilter) -> Result<Vec<IndexObservation>> {
        let index_type = filter.index_type.map(|t| t.as_str());
        let mut stmt = self.conn.prepare(
            r#"SELECT index_name, index_type, trade_date, index_value, change_pct
               FROM market_indices
               WHERE (?1 IS NULL OR index_type = ?1)
                 AND trade_date = COALESCE(?2, (SELECT MAX(trade_date) FROM market_indices))
               ORDER BY index_name"#,
        )?;
        let rows = stmt
            .query_map(params![index_type, filter.trade_date], |r| {
                Ok(IndexObservation {
                    index_name: r.get(0)?,
                    index_type: parse_column(r, 1)?,
                    trade_date: r.get(2)?,
                    index_value: r.get(3)?,
                    change_pct: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSecurity, PriceObservation, SecurityType};
    use crate::storage::{PriceStore, Repository, SecurityStore};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
    }

    fn now() -> NaiveDateTime {
        date(5).and_hms_opt(15, 30, 0).unwrap()
    }

    fn snapshot(d: u32, trades: i64) -> MarketSnapshot {
        MarketSnapshot {
            trade_date: date(d),
            total_trades: Some(trades),
            total_turnover: Some(1_500_000.0),
            market_cap: None,
            foreign_purchases: None,
            foreign_sales: None,
        }
    }

    fn index(name: &str, index_type: IndexType, d: u32, value: f64) -> IndexObservation {
        IndexObservation {
            index_name: name.to_string(),
            index_type,
            trade_date: date(d),
            index_value: Some(value),
            change_pct: None,
        }
    }

    #[test]
    fn test_snapshot_upsert_and_summary_counts() {
        let repo = Repository::open_in_memory().unwrap();
        repo.session(|s| {
            s.upsert_snapshot(&snapshot(4, 900), now())?;
            s.upsert_snapshot(&snapshot(5, 1000), now())?;
            s.upsert_snapshot(&snapshot(5, 1200), now())?;

            let (id, _) = s.get_or_create_security(
                &NewSecurity {
                    symbol: "DELTA".into(),
                    name: None,
                    security_type: SecurityType::Equity,
                    sector: None,
                    currency: "ZWG".into(),
                },
                now(),
            )?;
            s.upsert_price(
                id,
                &PriceObservation {
                    symbol: "DELTA".into(),
                    trade_date: date(5),
                    price: Some(120.5),
                    change_pct: Some(3.2),
                    market_cap: None,
                    volume: None,
                    trades_count: None,
                },
                now(),
            )
        })
        .unwrap();

        let latest = repo.session(|s| s.market_summary(None)).unwrap().unwrap();
        assert_eq!(latest.snapshot.trade_date, date(5));
        assert_eq!(latest.snapshot.total_trades, Some(1200));
        assert_eq!(latest.gainers_count, 1);
        assert_eq!(latest.losers_count, 0);

        let earlier = repo
            .session(|s| s.market_summary(Some(date(4))))
            .unwrap()
            .unwrap();
        assert_eq!(earlier.snapshot.total_trades, Some(900));
        assert_eq!(earlier.gainers_count, 0);

        assert!(repo.session(|s| s.market_summary(Some(date(1)))).unwrap().is_none());
        assert_eq!(repo.stats().unwrap().snapshots, 2);
    }

    #[test]
    fn test_list_indices_defaults_to_latest_date() {
        let repo = Repository::open_in_memory().unwrap();
        repo.session(|s| {
            s.upsert_index(&index("ZSE All Share", IndexType::MarketIndex, 4, 21_000.0), now())?;
            s.upsert_index(&index("ZSE All Share", IndexType::MarketIndex, 5, 21_345.67), now())?;
            s.upsert_index(&index("Banking", IndexType::Sector, 5, 1_002.1), now())?;
            s.upsert_index(&index("Banking", IndexType::Sector, 5, 1_010.0), now())
        })
        .unwrap();

        let latest = repo.session(|s| s.list_indices(&IndexFilter::default())).unwrap();
        let names: Vec<_> = latest.iter().map(|i| i.index_name.as_str()).collect();
        assert_eq!(names, vec!["Banking", "ZSE All Share"]);
        assert_eq!(latest[0].index_value, Some(1_010.0));

        let sectors = repo
            .session(|s| {
                s.list_indices(&IndexFilter {
                    index_type: Some(IndexType::Sector),
                    trade_date: None,
                })
            })
            .unwrap();
        assert_eq!(sectors.len(), 1);

        let older = repo
            .session(|s| {
                s.list_indices(&IndexFilter {
                    index_type: None,
                    trade_date: Some(date(4)),
                })
            })
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].index_value, Some(21_000.0));
    }
}
