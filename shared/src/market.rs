//! Price state, static metadata and the market snapshot

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Reserved snapshot key holding the last event text.
pub const LAST_EVENT_KEY: &str = "lastEvent";

/// Global lower bound for every price.
pub const MIN_PRICE: f64 = 0.01;

/// Named bucket mapping to a base random price-change range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityTier {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityTier {
    /// Half-width of the uniform draw, as a fraction of the price.
    pub fn base_range(self) -> f64 {
        match self {
            VolatilityTier::Low => 0.08,
            VolatilityTier::Medium => 0.15,
            VolatilityTier::High => 0.25,
            VolatilityTier::Extreme => 0.45,
        }
    }
}

/// Categorical flags some global events select on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFlags {
    #[serde(default)]
    pub meme: bool,
    #[serde(default)]
    pub food: bool,
    #[serde(default)]
    pub weather: bool,
    #[serde(default)]
    pub crypto: bool,
}

/// Static, compiled-in description of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMeta {
    pub name: String,
    pub tier: VolatilityTier,
    /// Symbol-specific hard floor, applied on top of [`MIN_PRICE`].
    #[serde(default)]
    pub floor: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub flags: StockFlags,
    pub initial_price: f64,
}

impl StockMeta {
    pub fn effective_floor(&self) -> f64 {
        self.floor.map_or(MIN_PRICE, |f| f.max(MIN_PRICE))
    }
}

/// Mutable price state of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockState {
    pub price: f64,
    #[serde(default)]
    pub last_change: f64,
    #[serde(default)]
    pub high_24h: f64,
    #[serde(default)]
    pub low_24h: f64,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub frozen_until: Option<DateTime<Utc>>,
    /// Start of the current high/low window.
    #[serde(default)]
    pub range_started: Option<DateTime<Utc>>,
}

impl StockState {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            last_change: 0.0,
            high_24h: price,
            low_24h: price,
            volume: 0,
            frozen_until: None,
            range_started: None,
        }
    }

    pub fn is_frozen_at(&self, now: DateTime<Utc>) -> bool {
        self.frozen_until.map_or(false, |until| until > now)
    }

    fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Full price state of the market plus the last event text.
///
/// Serialised as one JSON object keyed by symbol, with the reserved
/// [`LAST_EVENT_KEY`] entry for the event text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub stocks: BTreeMap<String, StockState>,
    pub last_event: Option<String>,
}

impl Snapshot {
    /// Build a snapshot from a raw document, skipping malformed entries.
    pub fn from_value(value: Value) -> Self {
        let mut snapshot = Snapshot::default();
        let Value::Object(entries) = value else {
            warn!("Snapshot document is not an object, ignoring it");
            return snapshot;
        };

        for (key, entry) in entries {
            if key == LAST_EVENT_KEY {
                snapshot.last_event = entry.as_str().map(str::to_string);
                continue;
            }
            match serde_json::from_value::<StockState>(entry) {
                Ok(state) if state.is_valid() => {
                    snapshot.stocks.insert(key, state);
                }
                Ok(state) => warn!("Skipping {}: invalid price {}", key, state.price),
                Err(e) => warn!("Skipping malformed entry {}: {}", key, e),
            }
        }
        snapshot
    }

    pub fn to_value(&self) -> Value {
        // Serialising plain structs into a Value cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.stocks.get(symbol).map(|s| s.price)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.stocks.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.stocks.len() + 1))?;
        for (symbol, state) in &self.stocks {
            map.serialize_entry(symbol, state)?;
        }
        map.serialize_entry(LAST_EVENT_KEY, &self.last_event)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Snapshot::from_value(value))
    }
}

/// One history tuple handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRecord {
    pub symbol: String,
    pub price: f64,
    pub trend_score: f64,
    pub timestamp: DateTime<Utc>,
}
