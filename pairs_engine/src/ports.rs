/// ports.rs — Boundaries to the brokerage terminal
///
/// The engine only talks to the outside world through these two traits.
/// Implementations live outside the core (a terminal bridge in production,
/// `data::SyntheticMarketData` and `executor::PaperOrderPort` for paper runs
/// and tests).
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MarketDataError, OrderSubmissionFailure};
use crate::models::{AccountSnapshot, Bar, Direction, PairCandidate};

/// Bar timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Nominal bar length.
    pub fn duration(self) -> chrono::Duration {
        match self {
            Timeframe::M1  => chrono::Duration::minutes(1),
            Timeframe::M5  => chrono::Duration::minutes(5),
            Timeframe::M15 => chrono::Duration::minutes(15),
            Timeframe::M30 => chrono::Duration::minutes(30),
            Timeframe::H1  => chrono::Duration::hours(1),
            Timeframe::H4  => chrono::Duration::hours(4),
            Timeframe::D1  => chrono::Duration::days(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::M1  => "M1",
            Timeframe::M5  => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1  => "H1",
            Timeframe::H4  => "H4",
            Timeframe::D1  => "D1",
        };
        f.write_str(s)
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1"  => Ok(Timeframe::M1),
            "M5"  => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1"  => Ok(Timeframe::H1),
            "H4"  => Ok(Timeframe::H4),
            "D1"  => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

/// Historical bars and account state.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Up to `bar_count` most recent bars, ascending. An empty vector means
    /// the symbol has no data and is not an error.
    async fn get_history(
        &self,
        symbol:    &str,
        timeframe: Timeframe,
        bar_count: usize,
    ) -> Result<Vec<Bar>, MarketDataError>;

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, MarketDataError>;
}

pub type OrderId = String;

/// Order derived from an emitted signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub pair:        PairCandidate,
    pub direction:   Direction,
    pub volume:      f64,
    pub stop_loss:   f64,
    pub take_profit: f64,
}

/// Order placement. Retry / backoff policy belongs to the implementation.
#[async_trait]
pub trait OrderExecutionPort: Send + Sync {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderId, OrderSubmissionFailure>;
}
