mod admin;
mod api;
mod auth;
mod config;
mod error;
mod models;
mod normalizer;
mod pipeline;
mod scheduler;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::api::ApiState;
use crate::config::AppConfig;
use crate::models::Tier;
use crate::pipeline::Pipeline;
use crate::scheduler::{parse_timezone, IngestSchedule};
use crate::scraper::{FileSource, SnapshotSource, ZseScraper};
use crate::storage::{Repository, ResetCadence};

#[derive(Parser)]
#[command(name = "zse-etl", about = "ZSE market data ingestion and API", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the ZSE homepage (or replay a captured snapshot) into the store
    Ingest {
        /// Replay a snapshot JSON file instead of fetching the homepage
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Pin the trade date, e.g. "05 DEC 2025" or 2025-12-05
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Serve the read API
    Serve,

    /// Run ingestion on the configured trading-day schedule until Ctrl-C
    Schedule,

    /// Apply schema migrations
    Migrate,

    /// Show database statistics
    Stats,

    /// Manage API keys
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Issue a new key (shown once)
    Create {
        email: String,
        #[arg(short, long, default_value = "free")]
        tier: Tier,
    },
    /// List all keys
    List,
    Deactivate { id: i64 },
    Reactivate { id: i64 },
    /// Aggregate usage and busiest users today
    Stats,
    /// Zero request counters
    Reset { cadence: Cadence },
}

#[derive(Clone, Copy, ValueEnum)]
enum Cadence {
    Daily,
    Monthly,
}

impl From<Cadence> for ResetCadence {
    fn from(c: Cadence) -> Self {
        match c {
            Cadence::Daily => ResetCadence::Daily,
            Cadence::Monthly => ResetCadence::Monthly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    init_tracing(cli.verbose, &config)?;

    match cli.command {
        Command::Ingest { file, date } => {
            let pipeline = build_pipeline(&config, file).await?;
            let stats = pipeline.run(date.as_deref()).await?;
            info!(
                "Ingested {} records for {}",
                stats.records_parsed, stats.trade_date
            );
        }

        Command::Serve => {
            let repo = Arc::new(Repository::connect(&config.storage).await?);
            let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
                .parse()
                .with_context(|| {
                    format!("Invalid API address {}:{}", config.api.host, config.api.port)
                })?;
            let state = Arc::new(ApiState::new(repo, config.storage.op_timeout()));
            api::serve(state, addr).await?;
        }

        Command::Schedule => {
            let schedule = IngestSchedule::from_config(&config.schedule)?;
            let pipeline = build_pipeline(&config, None).await?;
            schedule.run(&pipeline).await?;
        }

        Command::Migrate => {
            let repo = Repository::open(&config.storage.db_path, config.storage.op_timeout())?;
            repo.run_migrations()?;
            println!("Schema up to date at {:?}", config.storage.db_path);
        }

        Command::Stats => {
            let repo = Repository::connect(&config.storage).await?;
            admin::store_stats(&repo)?;
        }

        Command::Keys { command } => {
            let repo = Repository::connect(&config.storage).await?;
            match command {
                KeysCommand::Create { email, tier } => admin::create_key(&repo, &email, tier)?,
                KeysCommand::List => admin::list_keys(&repo)?,
                KeysCommand::Deactivate { id } => admin::set_active(&repo, id, false)?,
                KeysCommand::Reactivate { id } => admin::set_active(&repo, id, true)?,
                KeysCommand::Stats => admin::usage_stats(&repo)?,
                KeysCommand::Reset { cadence } => admin::reset_counters(&repo, cadence.into())?,
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8, config: &AppConfig) -> Result<()> {
    let default_filter = match verbose {
        0 => "zse_market_data=info,warn",
        1 => "zse_market_data=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = match &config.logging.file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Cannot create log directory {:?}", dir))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {:?}", path))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(())
}

async fn build_pipeline(config: &AppConfig, file: Option<PathBuf>) -> Result<Pipeline> {
    let source: Box<dyn SnapshotSource> = match file {
        Some(path) => Box::new(FileSource::new(path)),
        None => Box::new(ZseScraper::new(&config.scraper)?),
    };
    let tz = parse_timezone(&config.schedule.timezone)?;
    let repo = Arc::new(Repository::connect(&config.storage).await?);
    Ok(Pipeline::new(repo, source, config.pipeline.clone(), tz))
}
