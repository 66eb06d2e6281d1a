//! Operator commands behind `zse-etl keys ...` and `zse-etl stats`.
//!
//! Output here is for a terminal, so it goes to stdout; everything else in
//! the crate logs through `tracing`.

use crate::auth::issue_key;
use crate::models::{ApiKey, Tier, UsageStats};
use crate::storage::{KeyStore, LogStore, Repository, ResetCadence};
use crate::utils::{fmt_number, fmt_timestamp, Timer};
use anyhow::{bail, Result};
use chrono::Utc;
use std::fmt::Write as _;

const RULE: &str = "─────────────────────────────────────────────────────────────";

pub fn create_key(repo: &Repository, email: &str, tier: Tier) -> Result<()> {
    let issued = repo.session(|s| issue_key(s, email, tier, Utc::now().naive_utc()))?;
    let key = &issued.key;

    println!("{}", RULE);
    println!("  API key created");
    println!("{}", RULE);
    println!("  Key ID      : {}", key.id);
    println!("  Email       : {}", key.user_email);
    println!("  Tier        : {}", key.tier);
    println!("  Daily limit : {}", fmt_number(key.daily_limit));
    println!("  Monthly     : {}", fmt_number(key.monthly_limit));
    println!("{}", RULE);
    println!("  {}", issued.token);
    println!("{}", RULE);
    println!("  Save this key now. It is stored hashed and cannot be shown again.");
    println!();
    println!("  curl -H \"X-API-Key: {}\" http://localhost:8000/api/v1/securities", issued.token);
    Ok(())
}

pub fn list_keys(repo: &Repository) -> Result<()> {
    let keys = repo.session(|s| s.list_api_keys())?;
    if keys.is_empty() {
        println!("No API keys found.");
    } else {
        print!("{}", key_table(&keys));
    }
    Ok(())
}

fn key_table(keys: &[ApiKey]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<5} {:<10} {:<30} {:<11} {:<13} {:<7} {:<16}",
        "ID", "Prefix", "Email", "Tier", "Today", "Active", "Last used"
    );
    let _ = writeln!(out, "{}", "=".repeat(98));
    for key in keys {
        let _ = writeln!(
            out,
            "{:<5} {:<10} {:<30} {:<11} {:<13} {:<7} {:<16}",
            key.id,
            key.key_prefix,
            key.user_email,
            key.tier.as_str(),
            format!("{}/{}", key.requests_today, key.daily_limit),
            if key.is_active { "yes" } else { "no" },
            fmt_timestamp(key.last_used_at),
        );
    }
    out
}

pub fn set_active(repo: &Repository, id: i64, active: bool) -> Result<()> {
    let verb = if active { "reactivated" } else { "deactivated" };
    match repo.session(|s| s.set_key_active(id, active))? {
        Some(email) => {
            println!("API key #{} for {} has been {}.", id, email, verb);
            Ok(())
        }
        None => bail!("API key #{} not found", id),
    }
}

pub fn usage_stats(repo: &Repository) -> Result<()> {
    let stats = repo.session(|s| s.usage_stats())?;
    print!("{}", usage_report(&stats));
    Ok(())
}

fn usage_report(stats: &UsageStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  API usage");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  Total keys          : {}", fmt_number(stats.total_keys));
    let _ = writeln!(out, "  Active keys         : {}", fmt_number(stats.active_keys));
    let _ = writeln!(out, "  Requests today      : {}", fmt_number(stats.requests_today));
    let _ = writeln!(out, "  Requests this month : {}", fmt_number(stats.requests_month));
    let _ = writeln!(out, "{}", RULE);
    if !stats.top_users.is_empty() {
        let _ = writeln!(out, "  Top users today:");
        for (email, requests) in &stats.top_users {
            let _ = writeln!(out, "    {:<40} {:>8} requests", email, fmt_number(*requests));
        }
    }
    out
}

pub fn reset_counters(repo: &Repository, cadence: ResetCadence) -> Result<()> {
    let label = match cadence {
        ResetCadence::Daily => "daily",
        ResetCadence::Monthly => "monthly",
    };
    let _t = Timer::start(format!("Reset {} counters", label));
    let affected = repo.session(|s| s.reset_counters(cadence))?;
    println!("Reset {} counters for {} API keys.", label, affected);
    Ok(())
}

/// Row counts, date coverage and the most recent scrape.
pub fn store_stats(repo: &Repository) -> Result<()> {
    let stats = repo.stats()?;
    let last_log = repo.session(|s| s.recent_scrape_logs(1))?.into_iter().next();
    let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "-".into());

    println!("{}", RULE);
    println!("  ZSE market data: database stats");
    println!("{}", RULE);
    println!("  Securities   : {}", fmt_number(stats.securities));
    println!("  Price rows   : {}", fmt_number(stats.prices));
    println!("  Index rows   : {}", fmt_number(stats.indices));
    println!("  Snapshots    : {}", fmt_number(stats.snapshots));
    println!("  Scrape logs  : {}", fmt_number(stats.scrape_logs));
    println!("  API keys     : {}", fmt_number(stats.api_keys));
    println!("  From         : {}", date(stats.first_date));
    println!("  To           : {}", date(stats.last_date));
    match last_log {
        Some(entry) => {
            println!(
                "  Last scrape  : {} {} ({} records, trade date {})",
                fmt_timestamp(Some(entry.created_at)),
                entry.log.status.as_str(),
                entry.log.records_parsed,
                date(entry.log.trade_date),
            );
            if let Some(err) = &entry.log.error_message {
                println!("  Last error   : {}", err);
            }
        }
        None => println!("  Last scrape  : never"),
    }
    println!("{}", RULE);
    Ok(())
}
