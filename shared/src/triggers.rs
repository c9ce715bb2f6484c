//! Per-cycle trigger maps, event descriptors and chat input

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Sparse per-cycle price deltas plus side-channel instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMap {
    /// Signed fractional delta per symbol (0.05 = +5%).
    #[serde(default)]
    pub deltas: BTreeMap<String, f64>,
    /// Symbols to freeze this cycle.
    #[serde(default)]
    pub freeze: Vec<String>,
    /// Global volatility multiplier while time stands still.
    #[serde(default)]
    pub time_freeze: Option<f64>,
    /// Text shown as the market's last event.
    #[serde(default)]
    pub display: Option<String>,
}

impl TriggerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delta(mut self, symbol: impl Into<String>, delta: f64) -> Self {
        self.add(symbol, delta);
        self
    }

    pub fn with_display(mut self, text: impl Into<String>) -> Self {
        self.display = Some(text.into());
        self
    }

    /// Add to the delta already present for `symbol`.
    pub fn add(&mut self, symbol: impl Into<String>, delta: f64) {
        *self.deltas.entry(symbol.into()).or_insert(0.0) += delta;
    }

    pub fn delta(&self, symbol: &str) -> Option<f64> {
        self.deltas.get(symbol).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
            && self.freeze.is_empty()
            && self.time_freeze.is_none()
            && self.display.is_none()
    }

    /// Fold `other` into `self`.
    ///
    /// Deltas are summed, freeze lists are unioned, the stronger time
    /// freeze wins and the incoming display text replaces the current one.
    pub fn merge(&mut self, other: TriggerMap) {
        for (symbol, delta) in other.deltas {
            self.add(symbol, delta);
        }
        for symbol in other.freeze {
            if !self.freeze.contains(&symbol) {
                self.freeze.push(symbol);
            }
        }
        self.time_freeze = match (self.time_freeze, other.time_freeze) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if other.display.is_some() {
            self.display = other.display;
        }
    }
}

/// Descriptive rarity of a global event. Has no effect on probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    Mythic,
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
            Rarity::Mythic => "mythic",
        };
        f.write_str(label)
    }
}

/// A fired global event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDescriptor {
    pub name: String,
    pub description: String,
    pub rarity: Rarity,
    pub triggers: TriggerMap,
    pub duration: Option<Duration>,
    pub global_impact: bool,
}

/// One message from the social activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            timestamp,
        }
    }
}
