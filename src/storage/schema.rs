pub const SCHEMA_VERSION: i64 = 1;

// Dates are ISO-8601 text and timestamps "YYYY-MM-DD HH:MM:SS", so plain
// string comparison orders them.
pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS securities (
    id              INTEGER PRIMARY KEY,
    symbol          TEXT NOT NULL UNIQUE,
    name            TEXT,
    security_type   TEXT NOT NULL CHECK (security_type IN ('equity', 'etf', 'reit')),
    sector          TEXT,
    currency        TEXT NOT NULL,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_prices (
    security_id     INTEGER NOT NULL REFERENCES securities (id),
    trade_date      TEXT    NOT NULL,
    price           REAL,
    change_pct      REAL,
    market_cap      REAL,
    volume          INTEGER,
    trades_count    INTEGER,
    data_source     TEXT NOT NULL DEFAULT 'zse_homepage',
    captured_at     TEXT NOT NULL,
    PRIMARY KEY (security_id, trade_date)
);

CREATE TABLE IF NOT EXISTS market_indices (
    index_name      TEXT NOT NULL,
    index_type      TEXT NOT NULL CHECK (index_type IN ('market_index', 'sector')),
    trade_date      TEXT NOT NULL,
    index_value     REAL,
    change_pct      REAL,
    captured_at     TEXT NOT NULL,
    PRIMARY KEY (index_name, trade_date)
);

CREATE TABLE IF NOT EXISTS market_snapshots (
    trade_date          TEXT PRIMARY KEY,
    total_trades        INTEGER,
    total_turnover      REAL,
    market_cap          REAL,
    foreign_purchases   REAL,
    foreign_sales       REAL,
    captured_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scrape_logs (
    id              INTEGER PRIMARY KEY,
    status          TEXT NOT NULL CHECK (status IN ('success', 'failed')),
    source_url      TEXT NOT NULL,
    records_parsed  INTEGER NOT NULL DEFAULT 0,
    error_message   TEXT,
    raw_snapshot    TEXT,
    trade_date      TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    id              INTEGER PRIMARY KEY,
    key_hash        TEXT NOT NULL UNIQUE,
    key_prefix      TEXT NOT NULL,
    user_email      TEXT NOT NULL,
    tier            TEXT NOT NULL CHECK (tier IN ('free', 'pro', 'enterprise')),
    daily_limit     INTEGER NOT NULL,
    monthly_limit   INTEGER NOT NULL,
    requests_today  INTEGER NOT NULL DEFAULT 0,
    requests_month  INTEGER NOT NULL DEFAULT 0,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    last_used_at    TEXT
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);
"#;

pub const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_prices_date     ON daily_prices (trade_date);
CREATE INDEX IF NOT EXISTS idx_indices_date    ON market_indices (trade_date);
CREATE INDEX IF NOT EXISTS idx_logs_created    ON scrape_logs (created_at);
CREATE INDEX IF NOT EXISTS idx_securities_type ON securities (security_type);
"#;

// SQLite has no CREATE OR REPLACE VIEW.
pub const VIEWS: &str = r#"
DROP VIEW IF EXISTS v_latest_prices;
CREATE VIEW v_latest_prices AS
SELECT
    s.id            AS security_id,
    s.symbol,
    s.name,
    s.security_type,
    s.currency,
    dp.trade_date,
    dp.price,
    dp.change_pct,
    dp.market_cap,
    dp.volume,
    dp.trades_count
FROM daily_prices dp
JOIN securities s ON s.id = dp.security_id
WHERE dp.trade_date = (
    SELECT MAX(p2.trade_date) FROM daily_prices p2 WHERE p2.security_id = dp.security_id
);

DROP VIEW IF EXISTS v_market_summary;
CREATE VIEW v_market_summary AS
SELECT
    ms.trade_date,
    ms.total_trades,
    ms.total_turnover,
    ms.market_cap,
    ms.foreign_purchases,
    ms.foreign_sales,
    (SELECT COUNT(*) FROM daily_prices dp
      WHERE dp.trade_date = ms.trade_date AND dp.change_pct > 0) AS gainers_count,
    (SELECT COUNT(*) FROM daily_prices dp
      WHERE dp.trade_date = ms.trade_date AND dp.change_pct < 0) AS losers_count
FROM market_snapshots ms;
"#;
