/// models.rs — Core value types shared by every stage of the scan
///
/// Bars and series come from the market-data port, pair candidates are built
/// fresh each cycle, and `Signal` / `ExitAdvice` are the immutable outputs
/// handed to the order-execution port and the dashboard.
pub mod adf;
pub mod ols;
pub mod ou_process;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, MarketDataError};

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open:      f64,
    pub high:      f64,
    pub low:       f64,
    pub close:     f64,
    pub volume:    f64,
}

/// Price history for one symbol, strictly ascending by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSeries {
    symbol: String,
    bars:   Vec<Bar>,
}

impl AssetSeries {
    /// Validates chronological order; duplicates and out-of-order bars are rejected.
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self, MarketDataError> {
        let symbol = symbol.into();
        if let Some(index) = bars
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(MarketDataError::SeriesOrder { symbol, index: index + 1 });
        }
        Ok(Self { symbol, bars })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }

    /// The most recent `n` bars, or `None` when fewer are held.
    pub fn latest(&self, n: usize) -> Option<&[Bar]> {
        if n > self.bars.len() {
            return None;
        }
        Some(&self.bars[self.bars.len() - n..])
    }

    /// Index of the bar stamped exactly `ts`.
    pub fn position_of(&self, ts: DateTime<Utc>) -> Option<usize> {
        self.bars.binary_search_by(|b| b.timestamp.cmp(&ts)).ok()
    }

    /// The `n` bars ending at (and including) the bar stamped `ts`.
    pub fn window_ending_at(&self, ts: DateTime<Utc>, n: usize) -> Result<&[Bar], EvalError> {
        let end = self.position_of(ts).ok_or_else(|| {
            EvalError::SeriesAlignment(format!("{} has no bar at {}", self.symbol, ts))
        })?;
        let available = end + 1;
        if available < n {
            return Err(EvalError::InsufficientData { required: n, available });
        }
        Ok(&self.bars[available - n..available])
    }
}

/// Ordered pair: the dependent leg is regressed on the independent leg.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairCandidate {
    pub dependent:   String,
    pub independent: String,
}

impl PairCandidate {
    /// `None` for self-pairs.
    pub fn new(dependent: impl Into<String>, independent: impl Into<String>) -> Option<Self> {
        let dependent = dependent.into();
        let independent = independent.into();
        if dependent == independent {
            return None;
        }
        Some(Self { dependent, independent })
    }

    /// Full ordered cross product of a universe with itself, minus self-pairs.
    /// The universe is sorted and de-duplicated first so ordering is stable.
    pub fn universe(symbols: &[String]) -> Vec<PairCandidate> {
        let mut sorted: Vec<&String> = symbols.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut pairs = Vec::with_capacity(sorted.len() * sorted.len().saturating_sub(1));
        for dep in &sorted {
            for indep in &sorted {
                if let Some(pair) = PairCandidate::new(dep.as_str(), indep.as_str()) {
                    pairs.push(pair);
                }
            }
        }
        pairs
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.dependent, self.independent)
    }

    pub fn involves(&self, symbol: &str) -> bool {
        self.dependent == symbol || self.independent == symbol
    }
}

impl fmt::Display for PairCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dependent, self.independent)
    }
}

/// Trade direction on the dependent leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, −1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long  => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long  => f.write_str("LONG"),
            Direction::Short => f.write_str("SHORT"),
        }
    }
}

/// Final, immutable trading decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub pair:           PairCandidate,
    pub direction:      Direction,
    pub entry_price:    f64,
    pub stop_loss:      f64,
    pub take_profit:    f64,
    pub z_score:        f64,
    pub r_squared:      f64,
    pub strength_score: f64,
    pub window_length:  usize,
    pub generated_at:   DateTime<Utc>,
}

/// Open position on a pair whose spread has reverted inside the exit band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitAdvice {
    pub pair:          PairCandidate,
    pub position_id:   String,
    pub z_score:       f64,
    pub window_length: usize,
    pub generated_at:  DateTime<Utc>,
}

/// Position as reported by the broker account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub position_id: String,
    pub symbol:      String,
    pub volume:      f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance:        f64,
    pub equity:         f64,
    pub open_positions: Vec<OpenPosition>,
}
