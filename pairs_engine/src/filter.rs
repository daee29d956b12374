/// filter.rs — Quality gates between window selection and ranking
///
/// ─────────────────────────────────────────────────────────────────────────
/// GATES (each toggle-able except the entry band)
/// ─────────────────────────────────────────────────────────────────────────
///   p_value   ≤ p_value_max                       (cointegration significance)
///   R²        ≥ r_squared_min                     (hedge fit quality)
///   β         ∈ [beta_min, beta_max]              (tradeable hedge ratio)
///   |z|       ≥ entry                             (always on: neutral zone)
///   forecast  LONG:  z_buy  ≤ −exit               (spread expected to stay
///             SHORT: z_sell ≥ +exit                outside the exit band)
///
///   Direction:  z ≤ −entry → LONG    z ≥ +entry → SHORT
///
/// All enabled gates are evaluated even after one fails so the verdict lists
/// every reason a pair was rejected.
/// ─────────────────────────────────────────────────────────────────────────
use serde::Serialize;

use crate::config::FilterConfig;
use crate::models::{Direction, PairCandidate};
use crate::selector::SelectedWindow;

/// One failed gate, with the observed value and the limit it broke.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FilterReason {
    PValueAboveMax { observed: f64, limit: f64 },
    RSquaredBelowMin { observed: f64, limit: f64 },
    BetaOutOfRange { observed: f64, min: f64, max: f64 },
    ZScoreInsideEntryBand { observed: f64, limit: f64 },
    ForecastInsideExitBand { direction: Direction, observed: f64, limit: f64 },
}

impl FilterReason {
    pub fn name(&self) -> &'static str {
        match self {
            FilterReason::PValueAboveMax { .. }         => "p_value",
            FilterReason::RSquaredBelowMin { .. }       => "r_squared",
            FilterReason::BetaOutOfRange { .. }         => "beta",
            FilterReason::ZScoreInsideEntryBand { .. }  => "zscore_entry",
            FilterReason::ForecastInsideExitBand { .. } => "zscore_forecast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterVerdict {
    pub pair:      PairCandidate,
    pub selected:  SelectedWindow,
    pub accepted:  bool,
    /// Set whenever |z| clears the entry band, accepted or not
    pub direction: Option<Direction>,
    pub reasons:   Vec<FilterReason>,
}

impl FilterVerdict {
    pub fn strength_score(&self) -> f64 {
        self.selected.result.strength_score()
    }

    pub fn reason_names(&self) -> Vec<&'static str> {
        self.reasons.iter().map(FilterReason::name).collect()
    }
}

/// Direction implied by the z-score, or `None` inside the entry band.
pub fn direction_for(z_score: f64, entry_threshold: f64) -> Option<Direction> {
    if z_score <= -entry_threshold {
        Some(Direction::Long)
    } else if z_score >= entry_threshold {
        Some(Direction::Short)
    } else {
        None
    }
}

/// Run every gate against the selected window. Pure.
pub fn filter(selected: &SelectedWindow, config: &FilterConfig) -> FilterVerdict {
    let r = &selected.result;
    let mut reasons = Vec::new();

    if config.enable_pvalue_filter() && !(r.p_value <= config.p_value_max()) {
        reasons.push(FilterReason::PValueAboveMax {
            observed: r.p_value,
            limit:    config.p_value_max(),
        });
    }

    if config.enable_r2_filter() && !(r.r_squared >= config.r_squared_min()) {
        reasons.push(FilterReason::RSquaredBelowMin {
            observed: r.r_squared,
            limit:    config.r_squared_min(),
        });
    }

    if config.enable_beta_filter() && !(config.beta_min()..=config.beta_max()).contains(&r.beta) {
        reasons.push(FilterReason::BetaOutOfRange {
            observed: r.beta,
            min:      config.beta_min(),
            max:      config.beta_max(),
        });
    }

    let entry = config.zscore_entry_threshold();
    let exit = config.zscore_exit_threshold();
    let direction = direction_for(r.z_score, entry);

    match direction {
        None => reasons.push(FilterReason::ZScoreInsideEntryBand {
            observed: r.z_score,
            limit:    entry,
        }),
        Some(dir) if config.enable_zscore_filter() => {
            let (observed, confirmed) = match dir {
                Direction::Long  => (r.forecast_z_buy, r.forecast_z_buy <= -exit),
                Direction::Short => (r.forecast_z_sell, r.forecast_z_sell >= exit),
            };
            if !confirmed {
                reasons.push(FilterReason::ForecastInsideExitBand {
                    direction: dir,
                    observed,
                    limit: exit,
                });
            }
        }
        Some(_) => {}
    }

    FilterVerdict {
        pair:      selected.pair.clone(),
        selected:  selected.clone(),
        accepted:  reasons.is_empty(),
        direction,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cointegration::WindowResult;
    use crate::models::testutil::ts;

    fn selected(p_value: f64, r_squared: f64, beta: f64, z_score: f64) -> SelectedWindow {
        SelectedWindow {
            pair: PairCandidate::new("PETR4", "PETR3").unwrap(),
            result: WindowResult {
                window_length: 120,
                alpha: 0.3,
                beta,
                r_squared,
                residuals: vec![0.0; 120],
                residual_mean: 0.0,
                residual_std: 0.4,
                z_score,
                forecast_z_buy: z_score * 0.8 - 0.3,
                forecast_z_sell: z_score * 0.8 + 0.3,
                p_value,
                adf_statistic: Some(-3.9),
                adf_lags: 1,
                ar_coefficient: 0.8,
                half_life: Some(3.1),
                last_timestamp: ts(119),
                dependent_close: 38.5,
                independent_close: 36.2,
            },
            outcomes: Vec::new(),
        }
    }

    #[test]
    fn strong_short_setup_is_accepted() {
        let v = filter(&selected(0.01, 0.85, 1.02, 2.7), &FilterConfig::default());
        assert!(v.accepted, "{:?}", v.reasons);
        assert_eq!(v.direction, Some(Direction::Short));
    }

    #[test]
    fn strong_long_setup_is_accepted() {
        let v = filter(&selected(0.02, 0.7, 1.5, -2.4), &FilterConfig::default());
        assert!(v.accepted, "{:?}", v.reasons);
        assert_eq!(v.direction, Some(Direction::Long));
    }

    #[test]
    fn long_entry_with_good_fit_is_accepted() {
        let cfg = FilterConfig::builder()
            .r_squared_min(0.5)
            .zscore_thresholds(2.0, 0.5)
            .build()
            .unwrap();
        let v = filter(&selected(0.01, 0.8, 1.0, -2.3), &cfg);
        assert!(v.accepted, "{:?}", v.reasons);
        assert_eq!(v.direction, Some(Direction::Long));
    }

    #[test]
    fn inside_entry_band_is_rejected_with_every_gate_on() {
        let v = filter(&selected(0.01, 0.9, 1.0, 1.2), &FilterConfig::default());
        assert!(!v.accepted);
        assert_eq!(v.direction, None);
        assert_eq!(v.reason_names(), vec!["zscore_entry"]);
    }

    #[test]
    fn weak_cointegration_rejected_on_p_value() {
        let v = filter(&selected(0.40, 0.85, 1.02, 2.7), &FilterConfig::default());
        assert!(!v.accepted);
        assert_eq!(v.reason_names(), vec!["p_value"]);
        assert_eq!(v.reasons[0], FilterReason::PValueAboveMax { observed: 0.40, limit: 0.05 });
    }

    #[test]
    fn neutral_zone_yields_no_direction() {
        let cfg = FilterConfig::builder()
            .enable_pvalue_filter(false)
            .enable_r2_filter(false)
            .enable_beta_filter(false)
            .enable_zscore_filter(false)
            .build()
            .unwrap();
        let v = filter(&selected(0.01, 0.9, 1.0, 1.1), &cfg);
        assert!(!v.accepted);
        assert_eq!(v.direction, None);
        assert_eq!(v.reason_names(), vec!["zscore_entry"]);
    }

    #[test]
    fn every_failure_is_recorded() {
        let v = filter(&selected(0.3, 0.2, 25.0, 0.4), &FilterConfig::default());
        assert_eq!(v.reason_names(), vec!["p_value", "r_squared", "beta", "zscore_entry"]);
    }

    #[test]
    fn disabled_gates_are_skipped() {
        let cfg = FilterConfig::builder()
            .enable_pvalue_filter(false)
            .enable_r2_filter(false)
            .build()
            .unwrap();
        let v = filter(&selected(0.3, 0.2, 1.0, 2.5), &cfg);
        assert!(v.accepted, "{:?}", v.reasons);
    }

    #[test]
    fn negative_beta_fails_range() {
        let v = filter(&selected(0.01, 0.9, -1.2, 2.5), &FilterConfig::default());
        assert_eq!(v.reason_names(), vec!["beta"]);
    }

    #[test]
    fn forecast_reverting_into_exit_band_is_rejected() {
        let mut s = selected(0.01, 0.9, 1.0, -2.1);
        s.result.forecast_z_buy = -0.2;
        let v = filter(&s, &FilterConfig::default());
        assert_eq!(v.reason_names(), vec!["zscore_forecast"]);
        assert_eq!(v.direction, Some(Direction::Long));

        let relaxed = FilterConfig::builder().enable_zscore_filter(false).build().unwrap();
        assert!(filter(&s, &relaxed).accepted);
    }

    #[test]
    fn nan_statistics_never_pass() {
        let v = filter(&selected(f64::NAN, f64::NAN, 1.0, 3.0), &FilterConfig::default());
        assert_eq!(v.reason_names(), vec!["p_value", "r_squared"]);
    }

    #[test]
    fn thresholds_are_inclusive() {
        assert_eq!(direction_for(-2.0, 2.0), Some(Direction::Long));
        assert_eq!(direction_for(2.0, 2.0), Some(Direction::Short));
        assert_eq!(direction_for(1.999, 2.0), None);
    }
}
