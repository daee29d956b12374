/// store.rs — Per-cycle cache of aligned price history
///
/// Populated once per cycle with one port call per symbol (a pair (A,B) and
/// (A,C) share A's fetch), then frozen and shared read-only across the pair
/// workers behind an `Arc`.
use std::collections::BTreeMap;

use ahash::AHashMap;
use tracing::{debug, info, warn};

use crate::error::MarketDataError;
use crate::models::AssetSeries;
use crate::ports::{MarketDataPort, Timeframe};

#[derive(Debug, Default, Clone)]
pub struct SeriesStore {
    series:      AHashMap<String, AssetSeries>,
    /// symbol → reason, ordered for stable reporting
    unavailable: BTreeMap<String, String>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-built series (tests, replays).
    pub fn from_series(series: impl IntoIterator<Item = AssetSeries>) -> Self {
        let mut store = Self::new();
        for s in series {
            store.insert(s);
        }
        store
    }

    /// Fetch `bar_count` bars for every distinct symbol.
    ///
    /// Port failures and malformed series mark the symbol unavailable for the
    /// cycle; each is logged exactly once here, never per pair.
    pub async fn populate(
        port:      &dyn MarketDataPort,
        symbols:   &[String],
        timeframe: Timeframe,
        bar_count: usize,
    ) -> Self {
        let mut distinct: Vec<&String> = symbols.iter().collect();
        distinct.sort();
        distinct.dedup();

        let mut store = Self::new();
        for symbol in distinct {
            match port.get_history(symbol, timeframe, bar_count).await {
                Ok(bars) => match AssetSeries::new(symbol.as_str(), bars) {
                    Ok(series) => {
                        if series.is_empty() {
                            debug!(symbol = %symbol, "No bars returned");
                        }
                        store.insert(series);
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "Discarding malformed series for this cycle");
                        store.mark_unavailable(symbol, e);
                    }
                },
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Market data unavailable, skipping symbol this cycle");
                    store.mark_unavailable(symbol, e);
                }
            }
        }

        info!(
            "Series store ready: {} symbols loaded, {} unavailable ({} x {} bars)",
            store.series.len(),
            store.unavailable.len(),
            timeframe,
            bar_count
        );
        store
    }

    pub fn insert(&mut self, series: AssetSeries) {
        self.unavailable.remove(series.symbol());
        self.series.insert(series.symbol().to_owned(), series);
    }

    pub fn mark_unavailable(&mut self, symbol: &str, error: MarketDataError) {
        self.series.remove(symbol);
        self.unavailable.insert(symbol.to_owned(), error.to_string());
    }

    pub fn get(&self, symbol: &str) -> Option<&AssetSeries> {
        self.series.get(symbol)
    }

    pub fn is_available(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }

    /// Unavailable symbols with their reasons, sorted by symbol.
    pub fn unavailable(&self) -> &BTreeMap<String, String> {
        &self.unavailable
    }

    /// Loaded symbols, sorted.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.series.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
