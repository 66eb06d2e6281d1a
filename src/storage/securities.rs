use super::{parse_column, SqlStore};
use crate::models::{NewSecurity, Security, SecurityType};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SecurityFilter {
    pub security_type: Option<SecurityType>,
    pub sector: Option<String>,
    pub active_only: bool,
}

pub trait SecurityStore {
    fn find_security_id(&self, symbol: &str) -> Result<Option<i64>>;

    /// Look the symbol up, inserting it on first sighting. Returns the id and
    /// whether a row was created. Known symbols get a metadata refresh.
    fn get_or_create_security(&self, security: &NewSecurity, now: NaiveDateTime)
        -> Result<(i64, bool)>;

    fn get_security(&self, symbol: &str) -> Result<Option<Security>>;

    fn list_securities(&self, filter: &SecurityFilter) -> Result<Vec<Security>>;
}

const SELECT_SECURITY: &str =
    "SELECT id, symbol, name, security_type, sector, currency, is_active FROM securities";

fn map_security(r: &rusqlite::Row<'_>) -> rusqlite::Result<Security> {
    Ok(Security {
        id: r.get(0)?,
        symbol: r.get(1)?,
        name: r.get(2)?,
        security_type: parse_column(r, 3)?,
        sector: r.get(4)?,
        currency: r.get(5)?,
        is_active: r.get(6)?,
    })
}

impl SqlStore<'_> {
    fn refresh_security(&self, id: i64, security: &NewSecurity, now: NaiveDateTime) -> Result<()> {
        // A generic "equity" sighting never downgrades an etf/reit.
        let specific_type = security
            .security_type
            .is_specific()
            .then(|| security.security_type.as_str());
        self.conn
            .execute(
                r#"UPDATE securities SET
                       name          = COALESCE(?1, name),
                       sector        = COALESCE(?2, sector),
                       security_type = COALESCE(?3, security_type),
                       updated_at    = ?4
                   WHERE id = ?5"#,
                params![security.name, security.sector, specific_type, now, id],
            )
            .with_context(|| format!("refresh security {}", security.symbol))?;
        Ok(())
    }

    /// Insert unless the symbol already exists. `None` means another writer
    /// got there first; the statement never fails on the conflict, so an
    /// enclosing transaction stays usable.
    fn insert_security(&self, security: &NewSecurity, now: NaiveDateTime) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                r#"INSERT INTO securities
                       (symbol, name, security_type, sector, currency, is_active, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, TRUE, ?6, ?6)
                   ON CONFLICT (symbol) DO NOTHING
                   RETURNING id"#,
                params![
                    security.symbol,
                    security.name,
                    security.security_type.as_str(),
                    security.sector,
                    security.currency,
                    now,
                ],
                |r| r.get(0),
            )
            .optional()
            .with_context(|| format!("insert security {}", security.symbol))?;
        Ok(id)
    }
}

impl SecurityStore for SqlStore<'_> {
    fn find_security_id(&self, symbol: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM securities WHERE symbol = ?1", params![symbol], |r| r.get(0))
            .optional()?)
    }

    fn get_or_create_security(
        &self,
        security: &NewSecurity,
        now: NaiveDateTime,
    ) -> Result<(i64, bool)> {
        if let Some(id) = self.insert_security(security, now)? {
            debug!("Created security {} ({})", security.symbol, security.security_type);
            return Ok((id, true));
        }

        let id = self
            .find_security_id(&security.symbol)?
            .with_context(|| format!("security {} vanished after conflict", security.symbol))?;
        self.refresh_security(id, security, now)?;
        Ok((id, false))
    }

    fn get_security(&self, symbol: &str) -> Result<Option<Security>> {
        Ok(self
            .conn
            .query_row(
                &format!("{} WHERE symbol = ?1", SELECT_SECURITY),
                params![symbol],
                map_security,
            )
            .optional()?)
    }

    fn list_securities(&self, filter: &SecurityFilter) -> Result<Vec<Security>> {
        let security_type = filter.security_type.map(|t| t.as_str());
        let mut stmt = self.conn.prepare(&format!(
            r#"{}
               WHERE (is_active OR NOT ?1)
                 AND (?2 IS NULL OR security_type = ?2)
                 AND (?3 IS NULL OR sector = ?3)
               ORDER BY symbol"#,
            SELECT_SECURITY
        ))?;
        let rows = stmt
            .query_map(
                params![filter.active_only, security_type, filter.sector],
                map_security,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
