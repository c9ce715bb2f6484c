use thiserror::Error;

/// Conditions callers of the market may want to branch on.
///
/// Everything else travels as `anyhow::Error`.
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("a market cycle is already running")]
    CycleInProgress,

    #[error("snapshot contains no valid symbols")]
    NoValidSymbols,

    #[error("could not reinitialise the market: {0}")]
    Reinitialise(String),
}
