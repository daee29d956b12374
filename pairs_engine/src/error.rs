/// error.rs — Error taxonomy of the scan engine
///
/// Failures are contained where they originate:
///   EvalError              → one (pair, window) evaluation, window skipped
///   MarketDataError        → one symbol, every pair touching it skipped
///   OrderSubmissionFailure → one signal, pair cooldown rolled back
///   ScanError              → one cycle, the engine loop keeps running
use thiserror::Error;

/// Failure evaluating a single pair over a single lookback window.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("series misaligned: {0}")]
    SeriesAlignment(String),

    #[error("insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("undefined z-score: residual std = {std:e} over {observations} observations")]
    UndefinedZScore { std: f64, observations: usize },

    #[error("degenerate regression: {0}")]
    DegenerateRegression(String),
}

impl EvalError {
    /// Short machine-readable tag used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::SeriesAlignment(_)         => "series_alignment",
            EvalError::InsufficientData { .. }    => "insufficient_data",
            EvalError::UndefinedZScore { .. }     => "undefined_zscore",
            EvalError::DegenerateRegression(_)    => "degenerate_regression",
        }
    }
}

/// Failure obtaining data from the market-data port.
#[derive(Error, Debug, Clone)]
pub enum MarketDataError {
    #[error("market data unavailable for {symbol}: {reason}")]
    Unavailable { symbol: String, reason: String },

    #[error("market data transport failure: {0}")]
    Transport(String),

    #[error("bars for {symbol} not strictly ascending at index {index}")]
    SeriesOrder { symbol: String, index: usize },
}

/// Rejection reported by the order-execution port.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("order for {pair} rejected: {reason}")]
pub struct OrderSubmissionFailure {
    pub pair:   String,
    pub reason: String,
}

/// Cycle-fatal conditions. The next scheduled cycle still runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("universe has fewer than two symbols")]
    EmptyUniverse,

    #[error("market data unavailable for the whole universe ({0} symbols)")]
    UniverseUnavailable(usize),

    #[error("scan cycle exceeded its {0:?} budget")]
    CycleTimedOut(std::time::Duration),
}

/// Rejected configuration value.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_error_kinds_are_stable() {
        let e = EvalError::InsufficientData { required: 70, available: 12 };
        assert_eq!(e.kind(), "insufficient_data");
        assert_eq!(e.to_string(), "insufficient data: need 70 bars, have 12");
    }
}
