/// models/ols.rs — Ordinary Least Squares
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// SIMPLE REGRESSION (hedge ratio):
///
///   y_t = α + β·x_t + e_t
///
///   β̂ = Σ(x − x̄)(y − ȳ) / Σ(x − x̄)²
///   α̂ = ȳ − β̂·x̄
///   R² = 1 − SSE / SST
///
/// MULTIPLE REGRESSION (ADF auxiliary regression):
///
///   y = X·b + e,   b̂ = (XᵀX)⁻¹ Xᵀy
///   σ̂² = SSE / (n − k)
///   se(b̂_j) = √(σ̂² · [(XᵀX)⁻¹]_jj)
///   log-likelihood (Gaussian): ℓ = −n/2 · (ln(2π) + ln(SSE/n) + 1)
/// ─────────────────────────────────────────────────────────────────────────
use ndarray::{Array1, Array2};

/// Below this Σ(x − x̄)² the regressor is treated as constant.
const MIN_REGRESSOR_VARIANCE: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct SimpleFit {
    pub alpha:     f64,
    pub beta:      f64,
    pub r_squared: f64,
    pub residuals: Vec<f64>,
}

/// Regress `y` on `x` with an intercept.
///
/// Returns `None` when the lengths differ, fewer than two points are given,
/// or `x` has no variance.
pub fn simple_regression(y: &[f64], x: &[f64]) -> Option<SimpleFit> {
    if y.len() != x.len() || y.len() < 2 {
        return None;
    }
    let n = y.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - x_mean;
        sxy += dx * (yi - y_mean);
        sxx += dx * dx;
    }

    if sxx < MIN_REGRESSOR_VARIANCE {
        return None;
    }

    let beta = sxy / sxx;
    let alpha = y_mean - beta * x_mean;

    let residuals: Vec<f64> = x.iter().zip(y.iter())
        .map(|(xi, yi)| yi - (alpha + beta * xi))
        .collect();

    let sse: f64 = residuals.iter().map(|e| e * e).sum();
    let sst: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();
    let r_squared = if sst > 0.0 { (1.0 - sse / sst).clamp(0.0, 1.0) } else { 0.0 };

    Some(SimpleFit { alpha, beta, r_squared, residuals })
}

/// Result of a multiple regression.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Array1<f64>,
    pub std_errors:   Array1<f64>,
    pub sse:          f64,
    pub nobs:         usize,
}

impl OlsFit {
    /// t-statistic of coefficient `j`.
    pub fn t_stat(&self, j: usize) -> f64 {
        self.coefficients[j] / self.std_errors[j]
    }

    /// Gaussian log-likelihood of the fit.
    pub fn log_likelihood(&self) -> f64 {
        let n = self.nobs as f64;
        -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.sse / n).ln() + 1.0)
    }

    /// Akaike information criterion: 2k − 2ℓ.
    pub fn aic(&self) -> f64 {
        2.0 * self.coefficients.len() as f64 - 2.0 * self.log_likelihood()
    }
}

/// Fit `y = X·b` by the normal equations.
///
/// Returns `None` for an under-determined system or a singular XᵀX.
pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> Option<OlsFit> {
    let (n, k) = x.dim();
    if n != y.len() || n <= k || k == 0 {
        return None;
    }

    let xt = x.t();
    let xtx = xt.dot(x);
    let xty = xt.dot(y);
    let xtx_inv = invert(&xtx)?;

    let coefficients = xtx_inv.dot(&xty);
    let fitted = x.dot(&coefficients);
    let sse: f64 = y.iter().zip(fitted.iter()).map(|(a, b)| (a - b).powi(2)).sum();
    let sigma2 = sse / (n - k) as f64;

    let std_errors = Array1::from_iter((0..k).map(|j| (sigma2 * xtx_inv[[j, j]]).max(0.0).sqrt()));

    Some(OlsFit { coefficients, std_errors, sse, nobs: n })
}

/// Gauss-Jordan inversion with partial pivoting.
fn invert(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return None;
    }
    let mut m = a.clone();
    let mut inv = Array2::<f64>::eye(n);

    // Pivot tolerance scaled to the matrix magnitude.
    let scale = a.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);
    let tol = scale * 1e-13;

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| m[[i, col]].abs().total_cmp(&m[[j, col]].abs()))?;
        if m[[pivot_row, col]].abs() < tol {
            return None;
        }
        if pivot_row != col {
            for c in 0..n {
                m.swap([pivot_row, c], [col, c]);
                inv.swap([pivot_row, c], [col, c]);
            }
        }

        let pivot = m[[col, col]];
        for c in 0..n {
            m[[col, c]] /= pivot;
            inv[[col, c]] /= pivot;
        }

        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = m[[r, col]];
            if factor == 0.0 {
                continue;
            }
            for c in 0..n {
                m[[r, c]] -= factor * m[[col, c]];
                inv[[r, c]] -= factor * inv[[col, c]];
            }
        }
    }
    Some(inv)
}
