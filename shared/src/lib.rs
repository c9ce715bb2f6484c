//! Types shared between the signal collectors and the market engine

pub mod config;
pub mod market;
pub mod triggers;

pub use config::{Config, NOT_SET};
pub use market::{
    PriceRecord, Snapshot, StockFlags, StockMeta, StockState, VolatilityTier, LAST_EVENT_KEY,
    MIN_PRICE,
};
pub use triggers::{ChatMessage, EventDescriptor, Rarity, TriggerMap};
