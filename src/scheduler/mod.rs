//! Trading-day ingestion schedule.
//!
//! Runs the pipeline on the configured weekdays at a fixed local time in the
//! exchange's timezone. A failed run is logged and the loop waits for the
//! next slot; Ctrl-C stops the loop between runs.

use crate::config::ScheduleConfig;
use crate::pipeline::Pipeline;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestSchedule {
    weekdays: Vec<Weekday>,
    time: NaiveTime,
    tz: Tz,
}

impl IngestSchedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let weekdays = config
            .weekdays
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|_| anyhow!("Invalid weekday in schedule: {:?}", d))
            })
            .collect::<Result<Vec<_>>>()?;
        if weekdays.is_empty() {
            bail!("Schedule has no weekdays");
        }

        let time = NaiveTime::parse_from_str(&config.time, "%H:%M")
            .with_context(|| format!("Invalid schedule time {:?} (expected HH:MM)", config.time))?;

        Ok(Self {
            weekdays,
            time,
            tz: parse_timezone(&config.timezone)?,
        })
    }

    /// First scheduled instant strictly after `now`.
    ///
    /// Local times skipped by a DST jump are passed over; ambiguous ones
    /// resolve to the earlier instant.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.tz).date_naive();
        (0..=7)
            .filter_map(|offset| today.checked_add_signed(ChronoDuration::days(offset)))
            .filter(|day| self.weekdays.contains(&day.weekday()))
            .filter_map(|day| day.and_time(self.time).and_local_timezone(self.tz).earliest())
            .map(|local| local.with_timezone(&Utc))
            .find(|at| *at > now)
    }

    /// Block until Ctrl-C, running the pipeline at every scheduled slot.
    pub async fn run(&self, pipeline: &Pipeline) -> Result<()> {
        info!(
            "Scheduler started: {:?} at {} ({})",
            self.weekdays, self.time, self.tz
        );

        loop {
            let now = Utc::now();
            let next = self
                .next_run_after(now)
                .context("No upcoming slot in the ingestion schedule")?;
            let wait = (next - now).to_std().unwrap_or_default();
            info!(
                "Next ingestion at {} (in {}h {}m)",
                next.with_timezone(&self.tz).format("%a %Y-%m-%d %H:%M %Z"),
                wait.as_secs() / 3600,
                (wait.as_secs() % 3600) / 60
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down scheduler");
                    return Ok(());
                }
            }

            info!("Starting scheduled ingestion");
            match pipeline.run(None).await {
                Ok(stats) => info!(
                    "Scheduled ingestion done: {} records for {}",
                    stats.records_parsed, stats.trade_date
                ),
                Err(e) => error!("Scheduled ingestion failed: {:#}", e),
            }
        }
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow!("Invalid timezone {:?}: {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule() -> IngestSchedule {
        IngestSchedule::from_config(&ScheduleConfig::default()).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_default_schedule() {
        let s = schedule();
        assert_eq!(s.weekdays.len(), 5);
        assert_eq!(s.time, NaiveTime::from_hms_opt(15, 30, 0).unwrap());
        assert_eq!(s.tz, chrono_tz::Africa::Harare);
    }

    #[test]
    fn test_next_run_same_day() {
        // Fri 5 Dec 2025, 10:00 UTC = 12:00 Harare (UTC+2)
        let next = schedule().next_run_after(utc(2025, 12, 5, 10, 0)).unwrap();
        assert_eq!(next, utc(2025, 12, 5, 13, 30));
    }

    #[test]
    fn test_next_run_skips_weekend() {
        // Fri 5 Dec 2025, 13:30 UTC is exactly the slot; next is Monday.
        let next = schedule().next_run_after(utc(2025, 12, 5, 13, 30)).unwrap();
        assert_eq!(next, utc(2025, 12, 8, 13, 30));

        let next = schedule().next_run_after(utc(2025, 12, 6, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 12, 8, 13, 30));
    }

    #[test]
    fn test_single_weekday_wraps_a_week() {
        let s = IngestSchedule::from_config(&ScheduleConfig {
            weekdays: vec!["Friday".to_string()],
            time: "15:30".to_string(),
            timezone: "Africa/Harare".to_string(),
        })
        .unwrap();
        let next = s.next_run_after(utc(2025, 12, 5, 14, 0)).unwrap();
        assert_eq!(next, utc(2025, 12, 12, 13, 30));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let base = ScheduleConfig::default();
        let bad_day = ScheduleConfig {
            weekdays: vec!["funday".to_string()],
            ..base.clone()
        };
        let bad_time = ScheduleConfig {
            time: "3pm".to_string(),
            ..base.clone()
        };
        let bad_tz = ScheduleConfig {
            timezone: "Mars/Olympus".to_string(),
            ..base.clone()
        };
        let no_days = ScheduleConfig {
            weekdays: vec![],
            ..base
        };

        assert!(IngestSchedule::from_config(&bad_day).is_err());
        assert!(IngestSchedule::from_config(&bad_time).is_err());
        assert!(IngestSchedule::from_config(&bad_tz).is_err());
        assert!(IngestSchedule::from_config(&no_days).is_err());
    }
}
