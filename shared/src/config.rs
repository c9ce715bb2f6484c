//! Runtime configuration loaded from the environment

use anyhow::{anyhow, Result};
use chrono::{FixedOffset, Offset, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder used for API keys that were not provided.
pub const NOT_SET: &str = "not_set";

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL. When absent the flat-file store is used.
    pub database_url: Option<String>,
    pub snapshot_path: PathBuf,
    pub history_path: PathBuf,
    /// JSON file with recent chat messages, written by the chat bot.
    pub messages_path: PathBuf,

    pub serpapi_key: String,
    pub twitter_bearer_token: String,
    pub youtube_api_key: String,
    pub tiktok_api_url: String,

    pub trend_enabled: bool,
    pub full_cycle: Duration,
    pub light_cycle: Duration,
    pub market_offset: FixedOffset,
    pub seed: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let offset_hours: i32 = parse_var("MARKET_UTC_OFFSET_HOURS", 0)?;
        let market_offset = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or_else(|| anyhow!("MARKET_UTC_OFFSET_HOURS out of range: {}", offset_hours))?;

        let seed = match std::env::var("MARKET_SEED") {
            Ok(s) => Some(s.parse::<u64>().map_err(|e| anyhow!("MARKET_SEED: {}", e))?),
            Err(_) => None,
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            snapshot_path: path_var("SNAPSHOT_PATH", "data/market.json"),
            history_path: path_var("HISTORY_PATH", "data/price_history.jsonl"),
            messages_path: path_var("MESSAGES_PATH", "data/recent_messages.json"),
            serpapi_key: key_var("SERPAPI_KEY"),
            twitter_bearer_token: key_var("TWITTER_BEARER_TOKEN"),
            youtube_api_key: key_var("YOUTUBE_API_KEY"),
            tiktok_api_url: key_var("TIKTOK_API_URL"),
            trend_enabled: parse_var("TREND_ENABLED", true)?,
            full_cycle: Duration::from_secs(parse_var("FULL_CYCLE_SECS", 300)?),
            light_cycle: Duration::from_secs(parse_var("LIGHT_CYCLE_SECS", 60)?),
            market_offset,
            seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            snapshot_path: PathBuf::from("data/market.json"),
            history_path: PathBuf::from("data/price_history.jsonl"),
            messages_path: PathBuf::from("data/recent_messages.json"),
            serpapi_key: NOT_SET.to_string(),
            twitter_bearer_token: NOT_SET.to_string(),
            youtube_api_key: NOT_SET.to_string(),
            tiktok_api_url: NOT_SET.to_string(),
            trend_enabled: true,
            full_cycle: Duration::from_secs(300),
            light_cycle: Duration::from_secs(60),
            market_offset: Utc.fix(),
            seed: None,
        }
    }
}

fn key_var(name: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| NOT_SET.to_string())
}

fn path_var(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {}={:?}: {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}
