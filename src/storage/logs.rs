use super::{parse_column, SqlStore};
use crate::models::{ScrapeLog, StoredScrapeLog};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::params;

/// Append-only audit trail of ingestion runs.
pub trait LogStore {
    fn append_scrape_log(&self, log: &ScrapeLog, now: NaiveDateTime) -> Result<i64>;

    /// Newest first.
    fn recent_scrape_logs(&self, limit: usize) -> Result<Vec<StoredScrapeLog>>;
}

impl LogStore for SqlStore<'_> {
    fn append_scrape_log(&self, log: &ScrapeLog, now: NaiveDateTime) -> Result<i64> {
        self.conn
            .execute(
                r#"INSERT INTO scrape_logs
                       (status, source_url, records_parsed, error_message,
                        raw_snapshot, trade_date, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    log.status.as_str(),
                    log.source_url,
                    log.records_parsed,
                    log.error_message,
                    log.raw_snapshot,
                    log.trade_date,
                    now,
                ],
            )
            .context("append scrape log")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent_scrape_logs(&self, limit: usize) -> Result<Vec<StoredScrapeLog>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT id, status, source_url, records_parsed, error_message,
                      raw_snapshot, trade_date, created_at
               FROM scrape_logs
               ORDER BY created_at DESC, id DESC
               LIMIT {}"#,
            super::clamp_limit(limit)
        ))?;
        let rows = stmt
            .query_map([], |r| {
                Ok(StoredScrapeLog {
                    id: r.get(0)?,
                    log: ScrapeLog {
                        status: parse_column(r, 1)?,
                        source_url: r.get(2)?,
                        records_parsed: r.get(3)?,
                        error_message: r.get(4)?,
                        raw_snapshot: r.get(5)?,
                        trade_date: r.get(6)?,
                    },
                    created_at: r.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
