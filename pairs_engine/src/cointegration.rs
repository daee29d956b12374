/// cointegration.rs — Single-window cointegration test of an ordered pair
///
/// ─────────────────────────────────────────────────────────────────────────
/// PIPELINE (one pair, one lookback window of W bars)
/// ─────────────────────────────────────────────────────────────────────────
///
///   1. Alignment   both slices hold exactly W bars with identical timestamps
///   2. Hedge ratio dep_t = α + β·indep_t + e_t                (OLS, R²)
///   3. Residual    e_t = dep_t − (α + β·indep_t)              (len W)
///   4. Z-score     z = (e_W − ē) / s_e                         (s_e: ddof = 1)
///   5. AR(1)       e_t = c + φ·e_{t−1} + u_t  → half-life, one-step band
///   6. Forecasts   z_buy  = (ê_{W+1} − s_u − ē) / s_e
///                  z_sell = (ê_{W+1} + s_u − ē) / s_e
///   7. ADF         Engle-Granger residual test without a constant (ē = 0
///                  after step 2), MacKinnon p-value (N = 2)
///
/// Every z-score (current and forecast) shares the same ē and sample s_e.
/// ─────────────────────────────────────────────────────────────────────────
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::EvalError;
use crate::models::adf::{self, Regression};
use crate::models::ols;
use crate::models::ou_process::{mean, sample_std, Ar1Fit};
use crate::models::Bar;

/// |β| below this is treated as no relationship.
const MIN_ABS_BETA: f64 = 1e-12;

/// Residual std at or below this fraction of the price scale counts as zero.
const RESIDUAL_STD_FLOOR: f64 = 1e-10;

/// Variables in the cointegrating regression (dependent + independent).
const EG_VARIABLES: usize = 2;

/// Statistics of one (pair, window) evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowResult {
    pub window_length:     usize,
    pub alpha:             f64,
    /// Hedge ratio
    pub beta:              f64,
    pub r_squared:         f64,
    #[serde(skip_serializing)]
    pub residuals:         Vec<f64>,
    pub residual_mean:     f64,
    /// Sample std (ddof = 1)
    pub residual_std:      f64,
    pub z_score:           f64,
    pub forecast_z_buy:    f64,
    pub forecast_z_sell:   f64,
    /// 1.0 when the ADF regression is degenerate
    pub p_value:           f64,
    pub adf_statistic:     Option<f64>,
    pub adf_lags:          usize,
    pub ar_coefficient:    f64,
    /// Bars; `None` when the residual is not mean-reverting
    pub half_life:         Option<f64>,
    pub last_timestamp:    DateTime<Utc>,
    pub dependent_close:   f64,
    pub independent_close: f64,
}

impl WindowResult {
    /// |z| × R²; the single ranking formula used everywhere.
    pub fn strength_score(&self) -> f64 {
        self.z_score.abs() * self.r_squared
    }
}

/// Pure evaluator; holds only configuration.
#[derive(Debug, Clone, Copy)]
pub struct CointegrationTester {
    min_window:   usize,
    adf_max_lags: usize,
}

impl CointegrationTester {
    pub fn new(min_window: usize, adf_max_lags: usize) -> Self {
        Self { min_window, adf_max_lags }
    }

    pub fn min_window(&self) -> usize {
        self.min_window
    }

    /// Evaluate `dependent` against `independent` over exactly `window_length` bars.
    pub fn evaluate(
        &self,
        dependent:     &[Bar],
        independent:   &[Bar],
        window_length: usize,
    ) -> Result<WindowResult, EvalError> {
        if window_length < self.min_window {
            return Err(EvalError::InsufficientData {
                required:  self.min_window,
                available: window_length,
            });
        }
        check_alignment(dependent, independent, window_length)?;

        let dep: Vec<f64> = dependent.iter().map(|b| b.close).collect();
        let ind: Vec<f64> = independent.iter().map(|b| b.close).collect();

        // ── Hedge ratio ───────────────────────────────────────────────────
        let fit = ols::simple_regression(&dep, &ind).ok_or_else(|| {
            EvalError::DegenerateRegression("independent leg has no variance".into())
        })?;
        if !fit.alpha.is_finite() || !fit.beta.is_finite() || fit.beta.abs() < MIN_ABS_BETA {
            return Err(EvalError::DegenerateRegression(format!(
                "alpha={} beta={}",
                fit.alpha, fit.beta
            )));
        }

        // ── Z-score ───────────────────────────────────────────────────────
        let residuals = fit.residuals;
        let observations = residuals.len();
        let residual_mean = mean(&residuals);
        let residual_std = sample_std(&residuals);
        let scale = (dep.iter().map(|v| v.abs()).sum::<f64>() / dep.len() as f64).max(1.0);
        if observations < 2 || !residual_std.is_finite() || residual_std <= RESIDUAL_STD_FLOOR * scale {
            return Err(EvalError::UndefinedZScore { std: residual_std, observations });
        }
        let to_z = |value: f64| (value - residual_mean) / residual_std;

        let last_residual = residuals[observations - 1];
        let z_score = to_z(last_residual);

        // ── AR(1): half-life and one-step band ────────────────────────────
        // A lag series without variance is treated as a random walk.
        let ar = Ar1Fit::estimate(&residuals).unwrap_or(Ar1Fit { c: 0.0, phi: 1.0, sigma_eps: 0.0 });
        let (buy_side, sell_side) = ar.forecast_band(last_residual);

        // ── Stationarity ──────────────────────────────────────────────────
        let adf = adf::adf_test(&residuals, self.adf_max_lags, EG_VARIABLES, Regression::NoConstant);

        let last_dep = &dependent[observations - 1];
        let last_ind = &independent[observations - 1];

        Ok(WindowResult {
            window_length,
            alpha: fit.alpha,
            beta: fit.beta,
            r_squared: fit.r_squared,
            residual_mean,
            residual_std,
            z_score,
            forecast_z_buy: to_z(buy_side),
            forecast_z_sell: to_z(sell_side),
            p_value: adf.as_ref().map_or(1.0, |a| a.p_value),
            adf_statistic: adf.as_ref().map(|a| a.statistic),
            adf_lags: adf.as_ref().map_or(0, |a| a.lags),
            ar_coefficient: ar.phi,
            half_life: ar.half_life(),
            last_timestamp: last_dep.timestamp,
            dependent_close: last_dep.close,
            independent_close: last_ind.close,
            residuals,
        })
    }
}

fn check_alignment(dependent: &[Bar], independent: &[Bar], window_length: usize) -> Result<(), EvalError> {
    if dependent.len() != window_length || independent.len() != window_length {
        return Err(EvalError::SeriesAlignment(format!(
            "expected {} bars per leg, got dependent={} independent={}",
            window_length,
            dependent.len(),
            independent.len()
        )));
    }
    if let Some((i, (d, x))) = dependent
        .iter()
        .zip(independent.iter())
        .enumerate()
        .find(|(_, (d, x))| d.timestamp != x.timestamp)
    {
        return Err(EvalError::SeriesAlignment(format!(
            "timestamp mismatch at bar {}: {} vs {}",
            i, d.timestamp, x.timestamp
        )));
    }
    Ok(())
}
