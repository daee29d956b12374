/// data.rs — Synthetic market data for paper runs and tests
///
/// ─────────────────────────────────────────────────────────────────────────
/// GENERATOR
/// ─────────────────────────────────────────────────────────────────────────
/// Symbols are taken two at a time, in the order given:
///
///   driver_t    = driver_{t-1} + η_t,          η ~ N(0, σ_walk²)
///   spread_t    = φ · spread_{t-1} + ε_t,      ε ~ N(0, σ_spread²)
///   dependent_t = β · driver_t + spread_t
///
/// so each (first, second) pair is cointegrated with hedge ratio β and an
/// AR(1) spread. A trailing odd symbol is an independent random walk.
/// All paths come from one ChaCha8 stream: the same seed reproduces the
/// same universe bit for bit.
/// ─────────────────────────────────────────────────────────────────────────
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;
use tracing::debug;

use crate::error::MarketDataError;
use crate::executor::PaperOrderPort;
use crate::models::{AccountSnapshot, Bar};
use crate::ports::{MarketDataPort, Timeframe};

const PAPER_BALANCE: f64 = 100_000.0;
const PRICE_FLOOR: f64 = 0.5;

// ── Path primitives ──

/// Gaussian draws; a non-positive std yields zeros.
fn gaussian(rng: &mut impl Rng, n: usize, std: f64) -> Vec<f64> {
    match Normal::new(0.0, std) {
        Ok(dist) if std > 0.0 => (0..n).map(|_| dist.sample(rng)).collect(),
        _ => vec![0.0; n],
    }
}

/// Arithmetic random walk starting at `start`.
pub fn random_walk(rng: &mut impl Rng, n: usize, start: f64, step_std: f64) -> Vec<f64> {
    let mut level = start;
    gaussian(rng, n, step_std)
        .into_iter()
        .enumerate()
        .map(|(i, step)| {
            if i > 0 {
                level += step;
            }
            level
        })
        .collect()
}

/// Zero-mean AR(1) path. `phi = 0` is white noise.
pub fn ou_path(rng: &mut impl Rng, n: usize, phi: f64, noise_std: f64) -> Vec<f64> {
    let mut x = 0.0;
    gaussian(rng, n, noise_std)
        .into_iter()
        .map(|eps| {
            x = phi * x + eps;
            x
        })
        .collect()
}

/// Consecutive bars from `start`, one per timeframe step. Open is the prior close.
pub fn closes_to_bars(closes: &[f64], start: DateTime<Utc>, timeframe: Timeframe) -> Vec<Bar> {
    let step = timeframe.duration();
    let mut prev = closes.first().copied().unwrap_or_default();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar {
                timestamp: start + step * i as i32,
                open,
                high:      open.max(close),
                low:       open.min(close),
                close,
                volume:    1_000.0,
            }
        })
        .collect()
}

// ── Port ──

/// In-memory `MarketDataPort`.
///
/// Holds a full history per symbol and exposes a moving "now": `advance`
/// reveals further bars so consecutive cycles see new data.
pub struct SyntheticMarketData {
    timeframe: Timeframe,
    series:    AHashMap<String, Vec<Bar>>,
    visible:   AtomicUsize,
    failing:   BTreeSet<String>,
    account:   Option<Arc<PaperOrderPort>>,
}

impl SyntheticMarketData {
    /// Generate `total_bars` bars per symbol ending at `end`, of which the
    /// first `visible_bars` are initially exposed.
    pub fn generate(
        symbols:      &[String],
        total_bars:   usize,
        visible_bars: usize,
        timeframe:    Timeframe,
        seed:         u64,
        end:          DateTime<Utc>,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let start = end - timeframe.duration() * total_bars.saturating_sub(1) as i32;
        let mut series = AHashMap::with_capacity(symbols.len());

        for (k, chunk) in symbols.chunks(2).enumerate() {
            let base = 20.0 + 7.5 * k as f64;
            let driver = random_walk(&mut rng, total_bars, base, 0.25);
            match chunk {
                [dependent, independent] => {
                    let beta = 0.8 + 0.35 * k as f64;
                    let phi = rng.gen_range(0.55..0.9);
                    let spread = ou_path(&mut rng, total_bars, phi, 0.35);
                    let dep: Vec<f64> = driver
                        .iter()
                        .zip(&spread)
                        .map(|(x, s)| (beta * x + s).max(PRICE_FLOOR))
                        .collect();
                    let ind: Vec<f64> = driver.iter().map(|x| x.max(PRICE_FLOOR)).collect();
                    debug!(dependent = %dependent, independent = %independent, beta, phi, "Synthetic pair generated");
                    series.insert(dependent.clone(), closes_to_bars(&dep, start, timeframe));
                    series.insert(independent.clone(), closes_to_bars(&ind, start, timeframe));
                }
                [single] => {
                    let walk: Vec<f64> = driver.iter().map(|x| x.max(PRICE_FLOOR)).collect();
                    series.insert(single.clone(), closes_to_bars(&walk, start, timeframe));
                }
                _ => {}
            }
        }

        Self {
            timeframe,
            series,
            visible: AtomicUsize::new(visible_bars.min(total_bars)),
            failing: BTreeSet::new(),
            account: None,
        }
    }

    /// Every request for `symbol` fails.
    pub fn with_failure(mut self, symbol: impl Into<String>) -> Self {
        self.failing.insert(symbol.into());
        self
    }

    /// Report account state from a paper broker instead of a flat balance.
    pub fn with_account(mut self, broker: Arc<PaperOrderPort>) -> Self {
        self.account = Some(broker);
        self
    }

    /// Reveal `bars` more bars of every generated series.
    pub fn advance(&self, bars: usize) {
        self.visible.fetch_add(bars, Ordering::SeqCst);
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }
}

#[async_trait]
impl MarketDataPort for SyntheticMarketData {
    async fn get_history(
        &self,
        symbol:    &str,
        timeframe: Timeframe,
        bar_count: usize,
    ) -> Result<Vec<Bar>, MarketDataError> {
        if self.failing.contains(symbol) {
            return Err(MarketDataError::Unavailable {
                symbol: symbol.to_owned(),
                reason: "simulated outage".into(),
            });
        }
        if timeframe != self.timeframe {
            return Err(MarketDataError::Unavailable {
                symbol: symbol.to_owned(),
                reason: format!("only {} bars are generated, {timeframe} requested", self.timeframe),
            });
        }
        let bars = self.series.get(symbol).ok_or_else(|| MarketDataError::Unavailable {
            symbol: symbol.to_owned(),
            reason: "unknown symbol".into(),
        })?;

        let end = self.visible.load(Ordering::SeqCst).min(bars.len());
        let begin = end.saturating_sub(bar_count);
        Ok(bars[begin..end].to_vec())
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, MarketDataError> {
        Ok(match &self.account {
            Some(broker) => broker.snapshot(),
            None => AccountSnapshot {
                balance:        PAPER_BALANCE,
                equity:         PAPER_BALANCE,
                open_positions: Vec::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testutil::ts;

    fn universe() -> Vec<String> {
        ["PETR4", "PETR3", "VALE3"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn white_noise_has_unit_scale() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let xs = ou_path(&mut rng, 2_000, 0.0, 1.0);
        let m = xs.iter().sum::<f64>() / xs.len() as f64;
        let v = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
        assert!(m.abs() < 0.1);
        assert!((v - 1.0).abs() < 0.15);
    }

    #[test]
    fn zero_std_paths_are_flat() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        assert_eq!(ou_path(&mut rng, 5, 0.5, 0.0), vec![0.0; 5]);
        assert_eq!(random_walk(&mut rng, 3, 7.0, 0.0), vec![7.0; 3]);
    }

    #[test]
    fn bars_are_spaced_by_timeframe() {
        let bars = closes_to_bars(&[10.0, 11.0, 9.0], ts(0), Timeframe::M15);
        assert_eq!(bars[2].timestamp - bars[0].timestamp, chrono::Duration::minutes(30));
        assert_eq!(bars[1].open, 10.0);
        assert_eq!(bars[2].high, 11.0);
        assert_eq!(bars[2].low, 9.0);
    }

    #[tokio::test]
    async fn generation_is_reproducible_and_windowed() {
        let a = SyntheticMarketData::generate(&universe(), 300, 250, Timeframe::M15, 7, ts(1_000));
        let b = SyntheticMarketData::generate(&universe(), 300, 250, Timeframe::M15, 7, ts(1_000));

        let ha = a.get_history("PETR4", Timeframe::M15, 100).await.unwrap();
        let hb = b.get_history("PETR4", Timeframe::M15, 100).await.unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 100);

        a.advance(10);
        let later = a.get_history("PETR4", Timeframe::M15, 100).await.unwrap();
        assert_eq!(later[89].timestamp, ha[99].timestamp);

        // Odd leftover symbol still served.
        assert_eq!(a.get_history("VALE3", Timeframe::M15, 500).await.unwrap().len(), 260);
    }

    #[tokio::test]
    async fn failures_and_unknown_symbols_are_errors() {
        let port = SyntheticMarketData::generate(&universe(), 50, 50, Timeframe::M15, 1, ts(100))
            .with_failure("PETR3");
        assert!(port.get_history("PETR3", Timeframe::M15, 10).await.is_err());
        assert!(port.get_history("XXXX3", Timeframe::M15, 10).await.is_err());
        assert!(port.get_history("PETR4", Timeframe::H1, 10).await.is_err());

        let snap = port.get_account_snapshot().await.unwrap();
        assert_eq!(snap.balance, PAPER_BALANCE);
        assert!(snap.open_positions.is_empty());
    }
}
