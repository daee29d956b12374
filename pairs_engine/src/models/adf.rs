/// models/adf.rs — Augmented Dickey-Fuller unit-root test
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// Auxiliary regression (p lagged differences):
///
///   Δy_t = c + γ·y_{t−1} + Σ_{i=1..p} δ_i·Δy_{t−i} + ε_t
///
///   c is dropped for the residual of a regression that already had an
///   intercept (Engle-Granger), whose mean is zero by construction. The
///   p-value surface is still the constant one, indexed by N.
///
///   H0: γ = 0  (unit root, spread does not mean-revert)
///   H1: γ < 0  (stationary spread → the pair is cointegrated)
///
///   ADF statistic τ = γ̂ / se(γ̂)
///
/// LAG SELECTION:
///   p_max = ⌈12·(n/100)^¼⌉, bounded by n/2 − 2 and a configured cap.
///   Every p ∈ [0, p_max] is fitted on the same sample (the last n−1−p_max
///   differences) and the p with the lowest AIC wins; the winner is then
///   refitted on its full available sample.
///
/// P-VALUE (MacKinnon 1994, 2010 response surface):
///
///   p = Φ( Σ_k c_k·τ^k )
///
///   small-p coefficients for τ ≤ τ*, large-p coefficients above it;
///   p = 0 below τ_min and p = 1 above τ_max.
///   N = number of variables in the cointegrating regression
///   (N = 1 plain ADF, N = 2 Engle-Granger residual test).
/// ─────────────────────────────────────────────────────────────────────────
use ndarray::{Array1, Array2};
use statrs::distribution::{ContinuousCDF, Normal};

use super::ols;

/// Fewer observations than this make the test meaningless.
pub const MIN_OBSERVATIONS: usize = 10;

// ── MacKinnon tables, constant-only regression ("c") ────────────────────
//    index 0 → N = 1, index 1 → N = 2
const TAU_MAX:  [f64; 2] = [2.74, 0.92];
const TAU_MIN:  [f64; 2] = [-18.83, -18.86];
const TAU_STAR: [f64; 2] = [-1.61, -2.62];

const TAU_SMALLP: [[f64; 3]; 2] = [
    [2.1659, 1.4412, 0.038269],
    [2.92,   1.5012, 0.039796],
];
const TAU_LARGEP: [[f64; 4]; 2] = [
    [1.7339, 0.93202, -0.12745, -0.010368],
    [2.1945, 0.64695, -0.29198, -0.042377],
];

#[derive(Debug, Clone, PartialEq)]
pub struct AdfResult {
    /// τ statistic (more negative = stronger evidence of stationarity)
    pub statistic: f64,
    /// MacKinnon approximate p-value
    pub p_value:   f64,
    /// Lagged differences used
    pub lags:      usize,
    /// Observations in the final regression
    pub nobs:      usize,
}

/// Deterministic terms of the auxiliary regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regression {
    Constant,
    NoConstant,
}

/// Run the ADF test on `series`.
///
/// `n_vars` selects the MacKinnon surface (1 = raw series, 2 = residual of a
/// two-asset regression). Returns `None` when the series is too short or the
/// regression is degenerate (e.g. an exactly constant or linear series).
pub fn adf_test(series: &[f64], max_lags_cap: usize, n_vars: usize, regression: Regression) -> Option<AdfResult> {
    let n = series.len();
    if n < MIN_OBSERVATIONS {
        return None;
    }

    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
    let max_lag = schwert.min((n / 2).saturating_sub(2)).min(max_lags_cap);

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    let lags = if max_lag == 0 {
        0
    } else {
        (0..=max_lag)
            .filter_map(|p| fit_auxiliary(series, &diffs, p, max_lag, regression).map(|f| (p, f.aic())))
            .filter(|(_, aic)| aic.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)?
    };

    let fit = fit_auxiliary(series, &diffs, lags, lags, regression)?;
    let statistic = fit.t_stat(gamma_column(regression));
    if !statistic.is_finite() {
        return None;
    }

    Some(AdfResult {
        statistic,
        p_value: mackinnon_p_value(statistic, n_vars),
        lags,
        nobs: fit.nobs,
    })
}

/// Fit the auxiliary regression with `lags` lagged differences on the sample
/// that starts after `sample_lag` differences.
///
/// Columns: [1, y_{t−1}, Δy_{t−1}, …, Δy_{t−lags}], the leading 1 only
/// with a constant.
fn fit_auxiliary(
    series:     &[f64],
    diffs:      &[f64],
    lags:       usize,
    sample_lag: usize,
    regression: Regression,
) -> Option<ols::OlsFit> {
    if sample_lag >= diffs.len() {
        return None;
    }
    let gamma = gamma_column(regression);
    let rows = diffs.len() - sample_lag;
    let cols = gamma + 1 + lags;

    let x = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let j = r + sample_lag;
        if c < gamma {
            1.0
        } else if c == gamma {
            series[j]
        } else {
            diffs[j - (c - gamma)]
        }
    });
    let y = Array1::from_iter(diffs[sample_lag..].iter().copied());

    let fit = ols::fit(&x, &y)?;
    if fit.sse <= 0.0 || fit.std_errors[gamma] <= 0.0 {
        return None;
    }
    Some(fit)
}

fn gamma_column(regression: Regression) -> usize {
    match regression {
        Regression::Constant => 1,
        Regression::NoConstant => 0,
    }
}

/// MacKinnon approximate p-value for an ADF / Engle-Granger statistic.
///
/// `n_vars` outside 1..=2 is clamped.
pub fn mackinnon_p_value(stat: f64, n_vars: usize) -> f64 {
    let idx = n_vars.clamp(1, 2) - 1;

    if stat > TAU_MAX[idx] {
        return 1.0;
    }
    if stat < TAU_MIN[idx] {
        return 0.0;
    }

    let poly = if stat <= TAU_STAR[idx] {
        polyval(&TAU_SMALLP[idx], stat)
    } else {
        polyval(&TAU_LARGEP[idx], stat)
    };

    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(poly),
        Err(_) => 1.0,
    }
}

/// c_0 + c_1·x + c_2·x² + …
fn polyval(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}
