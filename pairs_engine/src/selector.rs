/// selector.rs — Best lookback window per pair
///
/// Runs the cointegration tester over every canonical window and keeps one
/// result per pair. Windows are independent: a failure in one (too few bars,
/// misaligned history, zero-variance residual) is recorded and the others
/// still run.
///
/// TIE-BREAK
///   1. largest |z-score|
///   2. on exact ties, the shorter lookback (reacts faster)
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::cointegration::{CointegrationTester, WindowResult};
use crate::error::EvalError;
use crate::models::{AssetSeries, PairCandidate};
use crate::store::SeriesStore;

/// What happened to one canonical window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WindowOutcome {
    Evaluated { window_length: usize, z_score: f64, p_value: f64 },
    Skipped { window_length: usize, kind: &'static str, detail: String },
}

/// The chosen window for a pair this cycle, with the per-window trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedWindow {
    pub pair:     PairCandidate,
    pub result:   WindowResult,
    pub outcomes: Vec<WindowOutcome>,
}

#[derive(Debug, Clone)]
pub struct MultiWindowSelector {
    tester:  CointegrationTester,
    windows: Vec<usize>,
}

impl MultiWindowSelector {
    /// `windows` is taken as given; ordering does not affect the choice.
    pub fn new(tester: CointegrationTester, windows: Vec<usize>) -> Self {
        Self { tester, windows }
    }

    pub fn windows(&self) -> &[usize] {
        &self.windows
    }

    /// Evaluate every window and keep the best, or `None` when no window
    /// could be evaluated.
    pub fn select_best(&self, pair: &PairCandidate, store: &SeriesStore) -> Option<SelectedWindow> {
        let (Some(dep), Some(ind)) = (store.get(&pair.dependent), store.get(&pair.independent)) else {
            debug!(pair = %pair, "Series missing from store");
            return None;
        };
        let Some(anchor) = anchor_timestamp(dep, ind) else {
            debug!(pair = %pair, "Empty series, pair not evaluable");
            return None;
        };

        let evaluated: Vec<(usize, Result<WindowResult, EvalError>)> = self
            .windows
            .par_iter()
            .map(|&w| (w, self.evaluate_window(dep, ind, anchor, w)))
            .collect();

        let mut outcomes = Vec::with_capacity(evaluated.len());
        let mut results = Vec::with_capacity(evaluated.len());
        for (window_length, res) in evaluated {
            match res {
                Ok(r) => {
                    outcomes.push(WindowOutcome::Evaluated {
                        window_length,
                        z_score: r.z_score,
                        p_value: r.p_value,
                    });
                    results.push(r);
                }
                Err(e) => {
                    debug!(pair = %pair, window = window_length, error = %e, "Window skipped");
                    outcomes.push(WindowOutcome::Skipped {
                        window_length,
                        kind:   e.kind(),
                        detail: e.to_string(),
                    });
                }
            }
        }

        match pick_best(results) {
            Some(result) => Some(SelectedWindow { pair: pair.clone(), result, outcomes }),
            None => {
                debug!(pair = %pair, windows = self.windows.len(), "No window evaluable this cycle");
                None
            }
        }
    }

    fn evaluate_window(
        &self,
        dep:    &AssetSeries,
        ind:    &AssetSeries,
        anchor: DateTime<Utc>,
        window: usize,
    ) -> Result<WindowResult, EvalError> {
        let dep_bars = dep.window_ending_at(anchor, window)?;
        let ind_bars = ind.window_ending_at(anchor, window)?;
        self.tester.evaluate(dep_bars, ind_bars, window)
    }
}

/// Both legs are cut at the earlier of their last bars.
fn anchor_timestamp(dep: &AssetSeries, ind: &AssetSeries) -> Option<DateTime<Utc>> {
    Some(dep.last_timestamp()?.min(ind.last_timestamp()?))
}

/// Apply the tie-break rule.
pub fn pick_best(results: Vec<WindowResult>) -> Option<WindowResult> {
    results.into_iter().reduce(|best, candidate| {
        if compare_windows(&candidate, &best) == Ordering::Greater {
            candidate
        } else {
            best
        }
    })
}

/// `Greater` means `a` is preferred over `b`.
fn compare_windows(a: &WindowResult, b: &WindowResult) -> Ordering {
    a.z_score
        .abs()
        .total_cmp(&b.z_score.abs())
        .then_with(|| b.window_length.cmp(&a.window_length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{closes_to_bars, ou_path, random_walk};
    use crate::models::testutil::ts;
    use crate::ports::Timeframe;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn result(window_length: usize, z_score: f64) -> WindowResult {
        WindowResult {
            window_length,
            alpha: 0.0,
            beta: 1.0,
            r_squared: 0.9,
            residuals: vec![0.0; window_length],
            residual_mean: 0.0,
            residual_std: 1.0,
            z_score,
            forecast_z_buy: z_score,
            forecast_z_sell: z_score,
            p_value: 0.01,
            adf_statistic: Some(-4.0),
            adf_lags: 0,
            ar_coefficient: 0.5,
            half_life: Some(1.0),
            last_timestamp: ts(0),
            dependent_close: 10.0,
            independent_close: 10.0,
        }
    }

    fn store_with(dep_len: usize, ind_len: usize, seed: u64) -> SeriesStore {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = dep_len.max(ind_len);
        let ind = random_walk(&mut rng, n, 30.0, 0.4);
        let spread = ou_path(&mut rng, n, 0.7, 0.3);
        let dep: Vec<f64> = ind.iter().zip(&spread).map(|(x, s)| 1.5 * x + s).collect();
        let start = ts(0);
        let dep_bars = closes_to_bars(&dep, start, Timeframe::M15);
        let ind_bars = closes_to_bars(&ind, start, Timeframe::M15);
        SeriesStore::from_series([
            AssetSeries::new("DEP", dep_bars[n - dep_len..].to_vec()).unwrap(),
            AssetSeries::new("IND", ind_bars[n - ind_len..].to_vec()).unwrap(),
        ])
    }

    fn pair() -> PairCandidate {
        PairCandidate::new("DEP", "IND").unwrap()
    }

    #[test]
    fn largest_abs_z_wins() {
        let best = pick_best(vec![result(70, 1.0), result(100, -2.5), result(120, 2.4)]).unwrap();
        assert_eq!(best.window_length, 100);
    }

    #[test]
    fn exact_tie_prefers_shorter_window() {
        let best = pick_best(vec![result(140, -2.0), result(100, 2.0), result(120, 2.0)]).unwrap();
        assert_eq!(best.window_length, 100);
    }

    #[test]
    fn short_history_skips_long_windows_only() {
        let store = store_with(130, 200, 21);
        let selector = MultiWindowSelector::new(CointegrationTester::new(20, 8), vec![70, 100, 120, 140, 160]);

        let selected = selector.select_best(&pair(), &store).expect("three windows fit");
        assert!(selected.result.window_length <= 120);

        let skipped: Vec<usize> = selected
            .outcomes
            .iter()
            .filter_map(|o| match o {
                WindowOutcome::Skipped { window_length, kind, .. } => {
                    assert_eq!(*kind, "insufficient_data");
                    Some(*window_length)
                }
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![140, 160]);
    }

    #[test]
    fn no_evaluable_window_yields_none() {
        let store = store_with(50, 50, 22);
        let selector = MultiWindowSelector::new(CointegrationTester::new(20, 8), vec![70, 100]);
        assert!(selector.select_best(&pair(), &store).is_none());
    }

    #[test]
    fn missing_symbol_yields_none() {
        let store = store_with(100, 100, 23);
        let selector = MultiWindowSelector::new(CointegrationTester::new(20, 8), vec![70]);
        let ghost = PairCandidate::new("DEP", "GHOST").unwrap();
        assert!(selector.select_best(&ghost, &store).is_none());
    }

    #[test]
    fn window_below_tester_minimum_is_isolated() {
        let store = store_with(120, 120, 24);
        let selector = MultiWindowSelector::new(CointegrationTester::new(60, 8), vec![30, 90]);
        let selected = selector.select_best(&pair(), &store).unwrap();
        assert_eq!(selected.result.window_length, 90);
        assert!(matches!(
            selected.outcomes[0],
            WindowOutcome::Skipped { window_length: 30, kind: "insufficient_data", .. }
        ));
    }

    #[test]
    fn selection_is_deterministic() {
        let store = store_with(250, 250, 25);
        let selector = MultiWindowSelector::new(CointegrationTester::new(20, 12), crate::config::DEFAULT_WINDOWS.to_vec());
        let a = selector.select_best(&pair(), &store).unwrap();
        let b = selector.select_best(&pair(), &store).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.outcomes.len(), 10);
    }
}
