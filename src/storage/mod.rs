//! Embedded SQLite store.
//!
//! The file is shared by separate processes (API server, scheduler, admin
//! CLI), so it runs in WAL mode with a busy timeout. Within a process there
//! is one connection behind a mutex. Every unit of work takes the lock, runs
//! against a [`SqlStore`] borrowed from the connection (or from a
//! transaction), and releases the lock when the closure returns.

mod keys;
mod logs;
mod market;
mod prices;
mod schema;
mod securities;

pub use keys::{KeyStore, QuotaOutcome, ResetCadence};
pub use logs::LogStore;
pub use market::{IndexFilter, MarketStore};
pub use prices::{PriceQuery, PriceStore};
pub use securities::{SecurityFilter, SecurityStore};

use crate::config::StorageConfig;
use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{info, warn};

use self::schema::{DDL, INDEXES, SCHEMA_VERSION, VIEWS};

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    /// Open (creating if needed) the store file. `busy_timeout` bounds how
    /// long a statement waits on another process's write lock.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite store at {:?}", path))?;

        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))
            .with_context(|| format!("Failed to enable WAL on {:?}", path))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("Store {:?} is in {} journal mode, not WAL", path, mode);
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(busy_timeout)?;

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let repo = Self::with_connection(Connection::open_in_memory()?)?;
        repo.run_migrations()?;
        Ok(repo)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open the configured store, retrying transient failures a bounded
    /// number of times before giving up on the unit of work.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let attempts = config.connect_retries.max(1) as usize;
        let strategy = FixedInterval::new(Duration::from_millis(config.connect_retry_delay_ms))
            .take(attempts - 1);

        let mut attempt = 0usize;
        let repo = Retry::start(strategy, || {
            attempt += 1;
            let n = attempt;
            let path = config.db_path.clone();
            let busy_timeout = config.op_timeout();
            async move {
                Self::open(&path, busy_timeout).map_err(|e| {
                    warn!("Store connection attempt {}/{} failed: {:#}", n, attempts, e);
                    e
                })
            }
        })
        .await
        .with_context(|| format!("Store unavailable after {} attempts", attempts))?;

        if config.run_migrations {
            repo.run_migrations()?;
        }
        Ok(repo)
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn.lock();
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute_batch(VIEWS).context("View creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, Utc::now().naive_utc()],
        )?;
        info!("Migrations done (schema v{}).", SCHEMA_VERSION);
        Ok(())
    }

    /// Run `f` against the shared connection.
    pub fn session<T>(&self, f: impl FnOnce(&SqlStore<'_>) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&SqlStore { conn: &conn })
    }

    /// [`session`](Self::session), giving up without running `f` when the
    /// connection is not free within `wait`.
    pub fn session_timeout<T>(
        &self,
        wait: Duration,
        f: impl FnOnce(&SqlStore<'_>) -> Result<T>,
    ) -> Result<T> {
        let conn = self
            .conn
            .try_lock_for(wait)
            .ok_or_else(|| anyhow!("store busy for {:?}", wait))?;
        f(&SqlStore { conn: &conn })
    }

    /// Run `f` inside one transaction: committed when `f` returns `Ok`,
    /// rolled back otherwise. The write lock is taken up front so a
    /// concurrent writer in another process waits instead of deadlocking.
    pub fn transaction<T>(&self, f: impl FnOnce(&SqlStore<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;
        let out = f(&SqlStore { conn: &tx })?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(out)
    }

    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |r| r.get::<_, i32>(0))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.session(|s| {
            let count = |table: &str| -> Result<i64> {
                Ok(s.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
            };
            let (first_date, last_date) = s.conn.query_row(
                "SELECT MIN(trade_date), MAX(trade_date) FROM daily_prices",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            Ok(StoreStats {
                securities: count("securities")?,
                prices: count("daily_prices")?,
                indices: count("market_indices")?,
                snapshots: count("market_snapshots")?,
                scrape_logs: count("scrape_logs")?,
                api_keys: count("api_keys")?,
                first_date,
                last_date,
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub securities: i64,
    pub prices: i64,
    pub indices: i64,
    pub snapshots: i64,
    pub scrape_logs: i64,
    pub api_keys: i64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

// ── SqlStore ──────────────────────────────────────────────────────────────────

/// The entity-store traits, implemented over a borrowed connection. Inside
/// [`Repository::transaction`] the connection is the open transaction.
pub struct SqlStore<'c> {
    conn: &'c Connection,
}

impl SqlStore<'_> {
    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        self.conn
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Read a text column holding one of our enum spellings.
fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// LIMIT values are interpolated, so clamp them here.
fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, 1000)
}
