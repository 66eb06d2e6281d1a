//! API-key gate: hash lookup, quota check and usage increment.

pub mod keys;

use crate::error::AuthError;
use crate::models::ApiKey;
use crate::storage::{KeyStore, QuotaOutcome, Repository};
use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use self::keys::{hash_key, issue_key};

#[derive(Clone)]
pub struct AuthGate {
    repo: Arc<Repository>,
    timeout: Duration,
}

impl AuthGate {
    pub fn new(repo: Arc<Repository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    /// Admit or reject one request. Admission increments the key's daily and
    /// monthly counters and stamps `last_used_at`.
    pub async fn authenticate(&self, raw_key: Option<&str>) -> Result<ApiKey, AuthError> {
        let raw_key = raw_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AuthError::MissingKey)?;
        let key_hash = hash_key(raw_key);

        let repo = Arc::clone(&self.repo);
        let now = Utc::now().naive_utc();
        let wait = self.timeout;

        // The wait is bounded inside the blocking task, before any write, so
        // a request that gives up never touches the counters.
        tokio::task::spawn_blocking(move || check_quota(&repo, &key_hash, now, wait))
            .await
            .map_err(|join_err| AuthError::Unavailable(join_err.to_string()))?
    }
}

/// The store-side half of [`AuthGate::authenticate`].
pub fn check_quota(
    repo: &Repository,
    key_hash: &str,
    now: NaiveDateTime,
    wait: Duration,
) -> Result<ApiKey, AuthError> {
    let outcome = repo
        .session_timeout(wait, |s| s.consume_quota(key_hash, now))
        .map_err(|e| {
            warn!("Auth store error: {:#}", e);
            AuthError::Unavailable(e.to_string())
        })?;

    match outcome {
        QuotaOutcome::Admitted(key) => {
            debug!(
                "Admitted key {} ({}/{} today)",
                key.key_prefix, key.requests_today, key.daily_limit
            );
            Ok(key)
        }
        QuotaOutcome::UnknownOrInactive => Err(AuthError::InvalidOrInactiveKey),
        QuotaOutcome::DailyExceeded { limit } => Err(AuthError::DailyQuotaExceeded { limit }),
        QuotaOutcome::MonthlyExceeded { limit } => Err(AuthError::MonthlyQuotaExceeded { limit }),
    }
}
