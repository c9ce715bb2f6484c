//! Meme stock market engine
//! Global events, price updates, persistence and the cycle orchestration

pub mod engine;
pub mod error;
pub mod events;
pub mod market;
pub mod store;
pub mod universe;

pub use engine::{CycleInputs, CycleOutcome, PinnedDraw, PriceEngine, RandomDraw, TrendMode, VolatilityDraw};
pub use error::MarketError;
pub use events::{GlobalEventSelector, SelectorStatus};
pub use market::{CycleKind, CycleReport, Market, MarketStatus};
pub use store::{JsonFileStore, MemoryStore, PgStore, SnapshotStore};
