/// models/ou_process.rs — AR(1) / Ornstein-Uhlenbeck fit of a residual spread
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// The OU SDE (continuous time):
///
///   dX_t = θ(μ − X_t)dt + σ_OU · dW_t
///
/// AR(1) DISCRETISATION (Δt = 1 bar):
///
///   X_t = c + φ·X_{t-1} + ε_t,    ε_t ~ N(0, σ²_ε)
///
///   φ̂  = OLS slope        →  θ̂ = −ln(φ̂)
///   ĉ  = OLS intercept    →  μ̂ = ĉ / (1 − φ̂)
///   σ̂_ε = sample std of AR residuals (ddof = 1)
///
/// HALF-LIFE of mean reversion (bars):
///
///   t½ = −ln(2) / ln(φ̂)     defined only for 0 < φ̂ < 1
///
///   φ̂ ≥ 1 → random walk / explosive, no half-life.
///   φ̂ ≤ 0 → oscillating, no meaningful half-life.
///
/// ONE-STEP FORECAST:
///
///   X̂_{t+1} = ĉ + φ̂·X_t
///   buy-side  scenario: X̂_{t+1} − σ̂_ε
///   sell-side scenario: X̂_{t+1} + σ̂_ε
/// ─────────────────────────────────────────────────────────────────────────
use super::ols;

/// Minimum points for an AR(1) fit.
const MIN_POINTS: usize = 3;

/// Fitted AR(1) parameters of a spread.
#[derive(Debug, Clone, PartialEq)]
pub struct Ar1Fit {
    /// Intercept ĉ
    pub c: f64,
    /// AR coefficient φ̂
    pub phi: f64,
    /// Innovation std σ̂_ε (ddof = 1)
    pub sigma_eps: f64,
}

impl Ar1Fit {
    /// Estimate via OLS of X_t on X_{t-1}.
    ///
    /// Returns `None` for fewer than three points or a constant series.
    pub fn estimate(series: &[f64]) -> Option<Self> {
        if series.len() < MIN_POINTS {
            return None;
        }
        let fit = ols::simple_regression(&series[1..], &series[..series.len() - 1])?;
        Some(Self {
            c:         fit.alpha,
            phi:       fit.beta,
            sigma_eps: sample_std(&fit.residuals),
        })
    }

    pub fn is_mean_reverting(&self) -> bool {
        self.phi > 0.0 && self.phi < 1.0
    }

    /// t½ in bars, `None` when the spread is not mean-reverting.
    pub fn half_life(&self) -> Option<f64> {
        let hl = std::f64::consts::LN_2 / self.theta()?;
        hl.is_finite().then_some(hl)
    }

    /// Mean-reversion speed θ = −ln φ.
    pub fn theta(&self) -> Option<f64> {
        self.is_mean_reverting().then(|| -self.phi.ln())
    }

    /// X̂_{t+1} = c + φ·X_t
    pub fn forecast(&self, last: f64) -> f64 {
        self.c + self.phi * last
    }

    /// (buy-side, sell-side) one-step projections.
    pub fn forecast_band(&self, last: f64) -> (f64, f64) {
        let mid = self.forecast(last);
        (mid - self.sigma_eps, mid + self.sigma_eps)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

pub(crate) fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation (ddof = 1). Zero for fewer than two points.
pub(crate) fn sample_std(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let var = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    var.sqrt()
}
