//! Trend scores
//! Queries every popularity source for the given symbols and prints the scores

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use data_collector::{TrendAggregator, TrendSource};
use shared::Config;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "data_collector", about = "Print trend scores for meme stock symbols")]
struct Args {
    /// Symbols to score
    #[arg(required = true)]
    symbols: Vec<String>,

    /// Only query the primary source
    #[arg(long)]
    quick: bool,
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
    info!("🚀 Starting trend scoring");

    let config = Config::from_env()?;
    info!("✅ Configuration loaded");

    let aggregator = TrendAggregator::from_config(&config)?;

    let now = Utc::now();
    for symbol in &args.symbols {
        let symbol = symbol.to_uppercase();
        let score = if args.quick {
            aggregator.quick_score(&symbol, now).await
        } else {
            aggregator.score(&symbol, now).await
        };
        info!("📊 {}: {:+.4}", symbol, score);
    }

    let disabled = aggregator.disabled_providers();
    if !disabled.is_empty() {
        info!("🔌 Sources on fallback: {}", disabled.join(", "));
    }

    Ok(())
}
