//! External signal collection for the meme market
//! Trend scores from popularity sources, chat triggers and incidental chaos

pub mod chaos;
pub mod trend;
pub mod triggers;

pub use chaos::{random_chaos_event, ChaosKind};
pub use trend::{TrendAggregator, TrendSource, MAX_TREND};
pub use triggers::TriggerDetector;
