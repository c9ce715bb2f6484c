//! The compiled-in market: symbols, their static metadata and special rules

use chrono::Weekday;
use shared::{Snapshot, StockFlags, StockMeta, StockState, VolatilityTier};
use std::collections::BTreeMap;

pub const NIGHTOWL: &str = "NIGHTOWL";
pub const FRIDAY: &str = "FRIDAY";
pub const PENNY: &str = "PENNY";

/// Per-symbol rule that bends the normal update.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecialRule {
    /// Multiply the volatility range inside an hour window (market time).
    VolatilityWindow {
        symbol: &'static str,
        start_hour: u32,
        end_hour: u32,
        factor: f64,
    },
    /// Negative triggers are dropped on the given weekday.
    IgnoreNegativeOn {
        symbol: &'static str,
        weekday: Weekday,
    },
}

pub fn special_rules() -> Vec<SpecialRule> {
    vec![
        SpecialRule::VolatilityWindow {
            symbol: NIGHTOWL,
            start_hour: 0,
            end_hour: 5,
            factor: 2.0,
        },
        SpecialRule::IgnoreNegativeOn {
            symbol: FRIDAY,
            weekday: Weekday::Fri,
        },
    ]
}

fn stock(
    name: &str,
    tier: VolatilityTier,
    initial_price: f64,
    floor: Option<f64>,
    max_price: Option<f64>,
    flags: StockFlags,
) -> StockMeta {
    StockMeta {
        name: name.to_string(),
        tier,
        floor,
        max_price,
        flags,
        initial_price,
    }
}

/// Static metadata of every listed symbol.
pub fn default_meta() -> BTreeMap<String, StockMeta> {
    use VolatilityTier::*;

    let meme = StockFlags { meme: true, ..Default::default() };
    let food = StockFlags { food: true, ..Default::default() };
    let weather = StockFlags { weather: true, ..Default::default() };
    let crypto = StockFlags { crypto: true, meme: true, ..Default::default() };
    let plain = StockFlags::default();

    [
        ("LOVE", stock("Love Inc.", High, 42.0, None, None, meme)),
        ("PIZZA", stock("Pizza Holdings", Medium, 12.5, None, None, food)),
        ("COFFEE", stock("Bean Counter Coffee", Low, 8.0, None, None, food)),
        ("RAIN", stock("Rainy Day Fund", Medium, 15.0, None, None, weather)),
        ("SUN", stock("Sunshine Solar", Medium, 18.0, None, None, weather)),
        ("PANIK", stock("Panik Button Corp", Extreme, 6.66, None, None, meme)),
        (NIGHTOWL, stock("Night Owl Media", High, 23.0, None, None, plain)),
        (FRIDAY, stock("Friday Feeling Ltd", Medium, 13.0, None, None, plain)),
        (PENNY, stock("Penny Stock Penny", Low, 0.25, Some(0.20), None, plain)),
        ("GOLD", stock("Digital Gold", Low, 120.0, None, Some(500.0), plain)),
        ("MOON", stock("Moon Rocket Token", Extreme, 69.0, None, Some(1000.0), crypto)),
        ("HODL", stock("Diamond Hands Coin", Extreme, 21.0, None, None, crypto)),
        ("TOILET", stock("Toilet Paper Reserve", High, 9.0, None, None, plain)),
    ]
    .into_iter()
    .map(|(symbol, meta)| (symbol.to_string(), meta))
    .collect()
}

/// Fresh market at initial prices.
pub fn default_snapshot() -> Snapshot {
    let stocks = default_meta()
        .into_iter()
        .map(|(symbol, meta)| (symbol, StockState::new(meta.initial_price)))
        .collect();
    Snapshot {
        stocks,
        last_event: Some("🔔 The market opened".to_string()),
    }
}
