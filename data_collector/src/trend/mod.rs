//! Trend aggregation
//! Combines several unreliable popularity sources into one bounded score

pub mod guard;
pub mod providers;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use shared::Config;
use std::time::Duration;
use tracing::{debug, info, warn};

use guard::{fallback_score, CircuitBreaker, RateLimiter};
use providers::{
    http_client, RedditProvider, SearchInterestProvider, TiktokProvider, TrendProvider,
    TwitterProvider, YoutubeProvider,
};

/// Bound of the combined trend score.
pub const MAX_TREND: f64 = 0.08;

/// Something that can produce a bounded trend score for a symbol.
#[async_trait]
pub trait TrendSource: Send + Sync {
    /// Full score from every signal, within `[-MAX_TREND, MAX_TREND]`.
    ///
    /// `now` is the cycle clock; fallback values are bucketed by its hour.
    async fn score(&self, symbol: &str, now: DateTime<Utc>) -> f64;

    /// Cheaper single-signal score for light cycles.
    async fn quick_score(&self, symbol: &str, now: DateTime<Utc>) -> f64 {
        self.score(symbol, now).await
    }
}

/// Static tuning of one provider slot.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub weight: f64,
    /// Half-width of the fallback value used when the provider fails.
    pub fallback_range: f64,
    pub min_interval: Duration,
}

struct ProviderSlot {
    provider: Box<dyn TrendProvider>,
    spec: ProviderSpec,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

pub struct TrendAggregator {
    slots: Vec<ProviderSlot>,
    call_timeout: Duration,
    failure_threshold: u32,
    breaker_reset: Duration,
}

impl TrendAggregator {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            slots: Vec::new(),
            call_timeout,
            failure_threshold: 3,
            breaker_reset: Duration::from_secs(30 * 60),
        }
    }

    /// Breaker tuning for every provider, registered before or after this call.
    pub fn with_breaker(mut self, failure_threshold: u32, reset_after: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.breaker_reset = reset_after;
        for slot in &mut self.slots {
            slot.breaker = CircuitBreaker::new(failure_threshold, reset_after);
        }
        self
    }

    pub fn with_provider(mut self, provider: Box<dyn TrendProvider>, spec: ProviderSpec) -> Self {
        self.slots.push(ProviderSlot {
            provider,
            spec,
            limiter: RateLimiter::new(spec.min_interval),
            breaker: CircuitBreaker::new(self.failure_threshold, self.breaker_reset),
        });
        self
    }

    /// Live aggregator over every configured source.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http_client()?;
        let aggregator = Self::new(Duration::from_secs(8))
            .with_provider(
                Box::new(SearchInterestProvider::new(client.clone(), config)),
                ProviderSpec {
                    weight: 0.25,
                    fallback_range: 0.04,
                    min_interval: Duration::from_secs(2),
                },
            )
            .with_provider(
                Box::new(RedditProvider::new(client.clone())),
                ProviderSpec {
                    weight: 0.20,
                    fallback_range: 0.05,
                    min_interval: Duration::from_secs(1),
                },
            )
            .with_provider(
                Box::new(TwitterProvider::new(client.clone(), config)),
                ProviderSpec {
                    weight: 0.15,
                    fallback_range: 0.05,
                    min_interval: Duration::from_secs(1),
                },
            )
            .with_provider(
                Box::new(YoutubeProvider::new(client.clone(), config)),
                ProviderSpec {
                    weight: 0.25,
                    fallback_range: 0.03,
                    min_interval: Duration::from_secs(1),
                },
            )
            .with_provider(
                Box::new(TiktokProvider::new(client, config)),
                ProviderSpec {
                    weight: 0.15,
                    fallback_range: 0.06,
                    min_interval: Duration::from_secs(3),
                },
            );

        info!(
            "📡 Trend aggregator ready with {} sources (total weight {:.2})",
            aggregator.slots.len(),
            aggregator.total_weight()
        );
        Ok(aggregator)
    }

    pub fn total_weight(&self) -> f64 {
        self.slots.iter().map(|s| s.spec.weight).sum()
    }

    /// Names of providers currently running on their fallback.
    pub fn disabled_providers(&self) -> Vec<&'static str> {
        self.slots
            .iter()
            .filter(|s| s.breaker.is_open())
            .map(|s| s.provider.name())
            .collect()
    }

    /// Real-or-fallback output of one provider, scaled to a delta.
    async fn sample(&self, slot: &ProviderSlot, symbol: &str, now: DateTime<Utc>) -> f64 {
        let name = slot.provider.name();
        let fallback = || fallback_score(name, symbol, now, slot.spec.fallback_range);

        if !slot.breaker.allow() {
            debug!("{} disabled, using fallback for {}", name, symbol);
            return fallback();
        }

        slot.limiter.acquire().await;
        let outcome = tokio::time::timeout(self.call_timeout, slot.provider.fetch(symbol)).await;

        match outcome {
            Ok(Ok(signal)) if signal.is_finite() => {
                slot.breaker.record_success();
                signal.clamp(-1.0, 1.0) * MAX_TREND
            }
            Ok(Ok(signal)) => {
                self.note_failure(slot, symbol, &format!("non-finite signal {}", signal));
                fallback()
            }
            Ok(Err(e)) => {
                self.note_failure(slot, symbol, &e.to_string());
                fallback()
            }
            Err(_) => {
                self.note_failure(slot, symbol, "timed out");
                fallback()
            }
        }
    }

    fn note_failure(&self, slot: &ProviderSlot, symbol: &str, reason: &str) {
        let name = slot.provider.name();
        warn!("Trend source {} failed for {}: {}", name, symbol, reason);
        if slot.breaker.record_failure() {
            warn!(
                "🔌 {} disabled after {} consecutive failures, retrying in {:?}",
                name,
                slot.breaker.consecutive_failures(),
                self.breaker_reset
            );
        }
    }
}

#[async_trait]
impl TrendSource for TrendAggregator {
    async fn score(&self, symbol: &str, now: DateTime<Utc>) -> f64 {
        let samples = join_all(self.slots.iter().map(|slot| self.sample(slot, symbol, now))).await;
        let combined: f64 = self
            .slots
            .iter()
            .zip(samples)
            .map(|(slot, value)| slot.spec.weight * value)
            .sum();
        let score = combined.clamp(-MAX_TREND, MAX_TREND);
        debug!("📈 Trend score {}: {:+.4}", symbol, score);
        score
    }

    async fn quick_score(&self, symbol: &str, now: DateTime<Utc>) -> f64 {
        match self.slots.first() {
            Some(slot) => self.sample(slot, symbol, now).await.clamp(-MAX_TREND, MAX_TREND),
            None => 0.0,
        }
    }
}
