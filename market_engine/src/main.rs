//! Market scheduler
//! Runs full and light cycles on their intervals until interrupted

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use data_collector::{TrendAggregator, TrendSource};
use market_engine::{JsonFileStore, Market, MarketError, PgStore, SnapshotStore};
use shared::{ChatMessage, Config, TriggerMap};
use std::path::Path;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "market_engine", about = "Meme stock market simulation")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler (default)
    Run,
    /// Run a single full cycle and exit
    Cycle,
    /// Apply manual triggers, e.g. `LOVE=0.1 PANIK=-0.05`
    Trigger {
        #[arg(required = true, value_parser = parse_override)]
        overrides: Vec<(String, f64)>,
        /// Also roll for chaos
        #[arg(long)]
        chaos: bool,
        /// Text shown as the last event
        #[arg(long)]
        message: Option<String>,
    },
    /// Print prices and event state as JSON
    Status,
}

fn parse_override(raw: &str) -> Result<(String, f64)> {
    let (symbol, delta) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected SYMBOL=DELTA, got {}", raw))?;
    let delta: f64 = delta.trim().parse()?;
    if !delta.is_finite() {
        return Err(anyhow!("delta for {} is not finite", symbol));
    }
    Ok((symbol.trim().to_uppercase(), delta))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("🚀 Starting Market Engine");

    let config = Config::from_env()?;
    info!("✅ Configuration loaded");

    let store = open_store(&config).await;
    let trend: Option<Arc<dyn TrendSource>> = if config.trend_enabled {
        Some(Arc::new(TrendAggregator::from_config(&config)?))
    } else {
        info!("📴 Trend sources disabled");
        None
    };
    let market = Market::new(store, trend, &config)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_scheduler(&market, &config).await,
        Command::Cycle => {
            let messages = load_messages(&config.messages_path).await;
            market.run_full_cycle(&messages, Utc::now()).await?;
            Ok(())
        }
        Command::Trigger { overrides, chaos, message } => {
            let mut triggers = TriggerMap::new();
            for (symbol, delta) in overrides {
                triggers.add(symbol, delta);
            }
            triggers.display = message;
            market.apply_manual(triggers, chaos, Utc::now()).await?;
            Ok(())
        }
        Command::Status => {
            let status = market.status(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn open_store(config: &Config) -> Arc<dyn SnapshotStore> {
    if let Some(url) = &config.database_url {
        match PgStore::connect(url).await {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!("Database unavailable ({}), falling back to JSON files", e),
        }
    }
    info!("📁 Using snapshot file {}", config.snapshot_path.display());
    Arc::new(JsonFileStore::new(&config.snapshot_path, &config.history_path))
}

async fn run_scheduler(market: &Market, config: &Config) -> Result<()> {
    let mut full = interval(config.full_cycle);
    let mut light = interval(config.light_cycle);
    full.set_missed_tick_behavior(MissedTickBehavior::Skip);
    light.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first full tick covers the first light one
    light.tick().await;

    info!(
        "⏱️ Scheduler running: full cycle every {:?}, light cycle every {:?}",
        config.full_cycle, config.light_cycle
    );

    loop {
        tokio::select! {
            _ = full.tick() => {
                let messages = load_messages(&config.messages_path).await;
                report(market.run_full_cycle(&messages, Utc::now()).await);
            }
            _ = light.tick() => {
                report(market.run_light_cycle(Utc::now()).await);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("👋 Shutting down");
                return Ok(());
            }
        }
    }
}

fn report<T>(result: Result<T>) {
    if let Err(e) = result {
        match e.downcast_ref::<MarketError>() {
            Some(MarketError::CycleInProgress) => warn!("Skipped tick: {}", e),
            _ => error!("❌ Market cycle failed: {:#}", e),
        }
    }
}

/// Recent chat messages written by the chat bot. Missing or unreadable
/// files mean no chat activity.
async fn load_messages(path: &Path) -> Vec<ChatMessage> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Could not read {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Ignoring malformed messages in {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
