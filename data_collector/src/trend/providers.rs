//! External popularity sources
//! Search interest (SerpApi Google Trends), Reddit, X/Twitter, YouTube, TikTok

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde::Deserialize;
use shared::{Config, NOT_SET};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One external popularity source.
///
/// `fetch` returns a raw signal in `[-1, 1]`: positive when the symbol is
/// trending above its usual level, negative when interest is fading.
#[async_trait]
pub trait TrendProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, symbol: &str) -> Result<f64>;
}

pub fn http_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent("MemeMarket/1.0 (trend collector)")
        .timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}

fn search_term(symbol: &str) -> String {
    symbol.to_lowercase()
}

fn require_key<'a>(key: &'a str, what: &str) -> Result<&'a str> {
    if key == NOT_SET {
        return Err(anyhow!("{} not configured", what));
    }
    Ok(key)
}

/// Relative change of the latest point against the mean of the earlier ones.
pub fn momentum(series: &[f64]) -> Option<f64> {
    let (last, earlier) = series.split_last()?;
    if earlier.is_empty() {
        return None;
    }
    let mean = earlier.iter().sum::<f64>() / earlier.len() as f64;
    Some(((last - mean) / mean.max(1.0)).clamp(-1.0, 1.0))
}

/// Squash an activity level around its baseline into `(-1, 1)`.
pub fn saturate(value: f64, baseline: f64) -> f64 {
    let baseline = baseline.max(f64::EPSILON);
    ((value - baseline) / baseline).tanh()
}

/* ----------------------- Search interest ------------------------ */

#[derive(Debug, Deserialize)]
struct TrendsResponse {
    interest_over_time: Option<InterestOverTime>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InterestOverTime {
    #[serde(default)]
    timeline_data: Vec<TimelinePoint>,
}

#[derive(Debug, Deserialize)]
struct TimelinePoint {
    #[serde(default)]
    values: Vec<TimelineValue>,
}

#[derive(Debug, Deserialize)]
struct TimelineValue {
    extracted_value: Option<f64>,
}

pub struct SearchInterestProvider {
    client: reqwest::Client,
    api_key: String,
}

impl SearchInterestProvider {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_key: config.serpapi_key.clone(),
        }
    }

    fn parse(body: &str) -> Result<f64> {
        let data: TrendsResponse = serde_json::from_str(body)?;
        if let Some(error) = data.error {
            return Err(anyhow!("SerpApi error: {}", error));
        }
        let series: Vec<f64> = data
            .interest_over_time
            .ok_or_else(|| anyhow!("No interest_over_time in response"))?
            .timeline_data
            .iter()
            .filter_map(|p| p.values.first().and_then(|v| v.extracted_value))
            .collect();
        momentum(&series).ok_or_else(|| anyhow!("Not enough interest points"))
    }
}

#[async_trait]
impl TrendProvider for SearchInterestProvider {
    fn name(&self) -> &'static str {
        "search_interest"
    }

    async fn fetch(&self, symbol: &str) -> Result<f64> {
        let key = require_key(&self.api_key, "SerpApi key")?;
        let url = Url::parse_with_params(
            "https://serpapi.com/search.json",
            &[
                ("engine", "google_trends"),
                ("q", search_term(symbol).as_str()),
                ("date", "now 7-d"),
                ("api_key", key),
            ],
        )?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("SerpApi status {}", response.status()));
        }
        Self::parse(&response.text().await?)
    }
}

/* ----------------------- Reddit ------------------------ */

#[derive(Debug, Deserialize)]
struct RedditListing {
    data: RedditListingData,
}

#[derive(Debug, Deserialize)]
struct RedditListingData {
    #[serde(default)]
    children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
struct RedditChild {
    data: RedditPost,
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
}

pub struct RedditProvider {
    client: reqwest::Client,
}

impl RedditProvider {
    /// Daily engagement considered "normal" for a symbol.
    const BASELINE: f64 = 200.0;

    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn parse(body: &str) -> Result<f64> {
        let listing: RedditListing = serde_json::from_str(body)?;
        let engagement: i64 = listing
            .data
            .children
            .iter()
            .map(|c| c.data.score.max(0) + 2 * c.data.num_comments.max(0))
            .sum();
        Ok(saturate(engagement as f64, Self::BASELINE))
    }
}

#[async_trait]
impl TrendProvider for RedditProvider {
    fn name(&self) -> &'static str {
        "reddit"
    }

    async fn fetch(&self, symbol: &str) -> Result<f64> {
        let url = Url::parse_with_params(
            "https://www.reddit.com/search.json",
            &[
                ("q", search_term(symbol).as_str()),
                ("sort", "new"),
                ("t", "day"),
                ("limit", "100"),
            ],
        )?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Reddit status {}", response.status()));
        }
        Self::parse(&response.text().await?)
    }
}

/* ----------------------- X / Twitter ------------------------ */

#[derive(Debug, Deserialize)]
struct TweetCounts {
    #[serde(default)]
    data: Vec<TweetCountBucket>,
}

#[derive(Debug, Deserialize)]
struct TweetCountBucket {
    tweet_count: f64,
}

pub struct TwitterProvider {
    client: reqwest::Client,
    bearer_token: String,
}

impl TwitterProvider {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            bearer_token: config.twitter_bearer_token.clone(),
        }
    }

    fn parse(body: &str) -> Result<f64> {
        let counts: TweetCounts = serde_json::from_str(body)?;
        let series: Vec<f64> = counts.data.iter().map(|b| b.tweet_count).collect();
        momentum(&series).ok_or_else(|| anyhow!("Not enough tweet count buckets"))
    }
}

#[async_trait]
impl TrendProvider for TwitterProvider {
    fn name(&self) -> &'static str {
        "twitter"
    }

    async fn fetch(&self, symbol: &str) -> Result<f64> {
        let token = require_key(&self.bearer_token, "Twitter bearer token")?;
        let url = Url::parse_with_params(
            "https://api.twitter.com/2/tweets/counts/recent",
            &[("query", search_term(symbol).as_str()), ("granularity", "hour")],
        )?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Twitter status {}", response.status()));
        }
        Self::parse(&response.text().await?)
    }
}

/* ----------------------- YouTube ------------------------ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YoutubeSearch {
    page_info: YoutubePageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YoutubePageInfo {
    total_results: f64,
}

pub struct YoutubeProvider {
    client: reqwest::Client,
    api_key: String,
}

impl YoutubeProvider {
    /// Uploads per day considered "normal" for a search term.
    const BASELINE: f64 = 500.0;

    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_key: config.youtube_api_key.clone(),
        }
    }

    fn parse(body: &str) -> Result<f64> {
        let search: YoutubeSearch = serde_json::from_str(body)?;
        Ok(saturate(search.page_info.total_results, Self::BASELINE))
    }
}

#[async_trait]
impl TrendProvider for YoutubeProvider {
    fn name(&self) -> &'static str {
        "youtube"
    }

    async fn fetch(&self, symbol: &str) -> Result<f64> {
        let key = require_key(&self.api_key, "YouTube API key")?;
        let since = (Utc::now() - ChronoDuration::hours(24)).to_rfc3339_opts(SecondsFormat::Secs, true);
        let url = Url::parse_with_params(
            "https://www.googleapis.com/youtube/v3/search",
            &[
                ("part", "id"),
                ("type", "video"),
                ("order", "date"),
                ("maxResults", "1"),
                ("q", search_term(symbol).as_str()),
                ("publishedAfter", since.as_str()),
                ("key", key),
            ],
        )?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("YouTube status {}", response.status()));
        }
        Self::parse(&response.text().await?)
    }
}

/* ----------------------- TikTok ------------------------ */

#[derive(Debug, Deserialize)]
struct TiktokSearch {
    #[serde(default)]
    videos: Vec<TiktokVideo>,
}

#[derive(Debug, Deserialize)]
struct TiktokVideo {
    #[serde(default)]
    play_count: f64,
    #[serde(default)]
    like_count: f64,
    #[serde(default)]
    share_count: f64,
}

/// Short-video engagement read from a configured search proxy.
pub struct TiktokProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl TiktokProvider {
    /// Likes plus shares per play considered "normal".
    const BASELINE_RATE: f64 = 0.05;

    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.tiktok_api_url.clone(),
        }
    }

    fn parse(body: &str) -> Result<f64> {
        let search: TiktokSearch = serde_json::from_str(body)?;
        let plays: f64 = search.videos.iter().map(|v| v.play_count).sum();
        if plays <= 0.0 {
            return Err(anyhow!("No TikTok plays in response"));
        }
        let reactions: f64 = search
            .videos
            .iter()
            .map(|v| v.like_count + 3.0 * v.share_count)
            .sum();
        Ok(saturate(reactions / plays, Self::BASELINE_RATE))
    }
}

#[async_trait]
impl TrendProvider for TiktokProvider {
    fn name(&self) -> &'static str {
        "tiktok"
    }

    async fn fetch(&self, symbol: &str) -> Result<f64> {
        let endpoint = require_key(&self.endpoint, "TikTok endpoint")?;
        let url = Url::parse_with_params(endpoint, &[("keyword", search_term(symbol).as_str())])?;
        debug!("TikTok lookup {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("TikTok status {}", response.status()));
        }
        Self::parse(&response.text().await?)
    }
}
