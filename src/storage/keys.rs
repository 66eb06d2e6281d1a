use super::{parse_column, SqlStore};
use crate::models::{ApiKey, NewApiKey, UsageStats};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

/// Result of one quota check-and-increment.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaOutcome {
    /// Counters were incremented; the key as it stands afterwards.
    Admitted(ApiKey),
    UnknownOrInactive,
    DailyExceeded { limit: i64 },
    MonthlyExceeded { limit: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCadence {
    Daily,
    Monthly,
}

pub trait KeyStore {
    fn insert_api_key(&self, key: &NewApiKey, now: NaiveDateTime) -> Result<ApiKey>;

    fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;

    /// Check both quotas and increment both counters in one statement.
    fn consume_quota(&self, key_hash: &str, now: NaiveDateTime) -> Result<QuotaOutcome>;

    fn list_api_keys(&self) -> Result<Vec<ApiKey>>;

    /// Returns the key owner's email, or `None` for an unknown id.
    fn set_key_active(&self, id: i64, active: bool) -> Result<Option<String>>;

    /// Zero one counter across every key; returns the number of keys touched.
    fn reset_counters(&self, cadence: ResetCadence) -> Result<usize>;

    fn usage_stats(&self) -> Result<UsageStats>;
}

const SELECT_KEY: &str = r#"SELECT id, key_prefix, user_email, tier, daily_limit, monthly_limit,
       requests_today, requests_month, is_active, created_at, last_used_at
FROM api_keys"#;

fn map_key(r: &rusqlite::Row<'_>) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: r.get(0)?,
        key_prefix: r.get(1)?,
        user_email: r.get(2)?,
        tier: parse_column(r, 3)?,
        daily_limit: r.get(4)?,
        monthly_limit: r.get(5)?,
        requests_today: r.get(6)?,
        requests_month: r.get(7)?,
        is_active: r.get(8)?,
        created_at: r.get(9)?,
        last_used_at: r.get(10)?,
    })
}

impl KeyStore for SqlStore<'_> {
    fn insert_api_key(&self, key: &NewApiKey, now: NaiveDateTime) -> Result<ApiKey> {
        let (daily_limit, monthly_limit) = key.tier.limits();
        self.conn
            .execute(
                r#"INSERT INTO api_keys
                       (key_hash, key_prefix, user_email, tier, daily_limit, monthly_limit,
                        requests_today, requests_month, is_active, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, TRUE, ?7)"#,
                params![
                    key.key_hash,
                    key.key_prefix,
                    key.user_email,
                    key.tier.as_str(),
                    daily_limit,
                    monthly_limit,
                    now,
                ],
            )
            .with_context(|| format!("insert api key for {}", key.user_email))?;
        let id = self.conn.last_insert_rowid();

        Ok(ApiKey {
            id,
            key_prefix: key.key_prefix.clone(),
            user_email: key.user_email.clone(),
            tier: key.tier,
            daily_limit,
            monthly_limit,
            requests_today: 0,
            requests_month: 0,
            is_active: true,
            created_at: now,
            last_used_at: None,
        })
    }

    fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .conn
            .query_row(
                &format!("{} WHERE key_hash = ?1", SELECT_KEY),
                params![key_hash],
                map_key,
            )
            .optional()?)
    }

    fn consume_quota(&self, key_hash: &str, now: NaiveDateTime) -> Result<QuotaOutcome> {
        // The WHERE clause is the quota check; a row is only touched when
        // both limits still have room, so no reader can observe a partial
        // increment and no two callers can both take the last slot.
        let updated = self
            .conn
            .execute(
                r#"UPDATE api_keys SET
                       requests_today = requests_today + 1,
                       requests_month = requests_month + 1,
                       last_used_at   = ?1
                   WHERE key_hash = ?2
                     AND is_active
                     AND requests_today < daily_limit
                     AND requests_month < monthly_limit"#,
                params![now, key_hash],
            )
            .context("quota update")?;

        let Some(key) = self.find_api_key_by_hash(key_hash)? else {
            return Ok(QuotaOutcome::UnknownOrInactive);
        };

        Ok(if updated == 1 {
            QuotaOutcome::Admitted(key)
        } else if !key.is_active {
            QuotaOutcome::UnknownOrInactive
        } else if key.requests_today >= key.daily_limit {
            QuotaOutcome::DailyExceeded { limit: key.daily_limit }
        } else {
            QuotaOutcome::MonthlyExceeded { limit: key.monthly_limit }
        })
    }

    fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        let mut stmt = self.conn.prepare(&format!("{} ORDER BY created_at DESC, id DESC", SELECT_KEY))?;
        let rows = stmt
            .query_map([], map_key)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn set_key_active(&self, id: i64, active: bool) -> Result<Option<String>> {
        let email: Option<String> = self
            .conn
            .query_row("SELECT user_email FROM api_keys WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        if email.is_some() {
            self.conn
                .execute("UPDATE api_keys SET is_active = ?1 WHERE id = ?2", params![active, id])
                .with_context(|| format!("set api key {} active={}", id, active))?;
        }
        Ok(email)
    }

    fn reset_counters(&self, cadence: ResetCadence) -> Result<usize> {
        let sql = match cadence {
            ResetCadence::Daily => "UPDATE api_keys SET requests_today = 0",
            ResetCadence::Monthly => "UPDATE api_keys SET requests_month = 0",
        };
        Ok(self.conn.execute(sql, []).context("reset counters")?)
    }

    fn usage_stats(&self) -> Result<UsageStats> {
        let (total_keys, active_keys, requests_today, requests_month) = self.conn.query_row(
            r#"SELECT COUNT(*),
                      COUNT(*) FILTER (WHERE is_active),
                      CAST(COALESCE(SUM(requests_today), 0) AS INTEGER),
                      CAST(COALESCE(SUM(requests_month), 0) AS INTEGER)
               FROM api_keys"#,
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;

        let mut stmt = self.conn.prepare(
            r#"SELECT user_email, requests_today
               FROM api_keys
               WHERE is_active
               ORDER BY requests_today DESC, user_email
               LIMIT 5"#,
        )?;
        let top_users = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(UsageStats {
            total_keys,
            active_keys,
            requests_today,
            requests_month,
            top_users,
        })
    }
}
