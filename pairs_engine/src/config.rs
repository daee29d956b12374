/// config.rs — Centralised configuration loaded from .env
///
/// Every tunable of the scan engine is defined here. Values are validated
/// once at construction; the algorithms never fall back to an undocumented
/// default mid-run. `AppConfig::from_env` assembles the typed sections:
///
///   FilterConfig → quality gates of the signal filter pipeline
///   ScanConfig   → lookback windows, ADF lag cap, worker pool, timeouts
///   RiskConfig   → cooldown, position cap, protective levels, order volume
use std::env;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::error::ConfigError;
use crate::ports::Timeframe;

/// Default canonical lookback windows (bars), ascending.
pub const DEFAULT_WINDOWS: &[usize] = &[70, 100, 120, 140, 160, 180, 200, 220, 240, 250];

/// Default trading universe.
pub const DEFAULT_UNIVERSE: &[&str] = &[
    "PETR4", "PETR3", "VALE3", "ITUB4", "BBDC4", "BBAS3", "SANB11", "ABEV3",
];

// ── Filter configuration ─────────────────────────────────────────────────

/// Immutable, validated quality gates. Build with [`FilterConfig::builder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterConfig {
    p_value_max:            f64,
    r_squared_min:          f64,
    beta_min:               f64,
    beta_max:               f64,
    zscore_entry_threshold: f64,
    zscore_exit_threshold:  f64,
    enable_pvalue_filter:   bool,
    enable_r2_filter:       bool,
    enable_beta_filter:     bool,
    enable_zscore_filter:   bool,
}

impl FilterConfig {
    pub fn builder() -> FilterConfigBuilder {
        FilterConfigBuilder::default()
    }

    pub fn p_value_max(&self) -> f64 { self.p_value_max }
    pub fn r_squared_min(&self) -> f64 { self.r_squared_min }
    pub fn beta_min(&self) -> f64 { self.beta_min }
    pub fn beta_max(&self) -> f64 { self.beta_max }
    pub fn zscore_entry_threshold(&self) -> f64 { self.zscore_entry_threshold }
    pub fn zscore_exit_threshold(&self) -> f64 { self.zscore_exit_threshold }
    pub fn enable_pvalue_filter(&self) -> bool { self.enable_pvalue_filter }
    pub fn enable_r2_filter(&self) -> bool { self.enable_r2_filter }
    pub fn enable_beta_filter(&self) -> bool { self.enable_beta_filter }
    pub fn enable_zscore_filter(&self) -> bool { self.enable_zscore_filter }

    /// Copy of this config rebuilt through the builder, for variations.
    pub fn to_builder(&self) -> FilterConfigBuilder {
        FilterConfigBuilder { inner: self.clone() }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            p_value_max:            0.05,
            r_squared_min:          0.5,
            beta_min:               0.1,
            beta_max:               10.0,
            zscore_entry_threshold: 2.0,
            zscore_exit_threshold:  0.5,
            enable_pvalue_filter:   true,
            enable_r2_filter:       true,
            enable_beta_filter:     true,
            enable_zscore_filter:   true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterConfigBuilder {
    inner: FilterConfig,
}

impl FilterConfigBuilder {
    pub fn p_value_max(mut self, v: f64) -> Self {
        self.inner.p_value_max = v;
        self
    }

    pub fn r_squared_min(mut self, v: f64) -> Self {
        self.inner.r_squared_min = v;
        self
    }

    pub fn beta_range(mut self, min: f64, max: f64) -> Self {
        self.inner.beta_min = min;
        self.inner.beta_max = max;
        self
    }

    pub fn zscore_thresholds(mut self, entry: f64, exit: f64) -> Self {
        self.inner.zscore_entry_threshold = entry;
        self.inner.zscore_exit_threshold = exit;
        self
    }

    pub fn enable_pvalue_filter(mut self, on: bool) -> Self {
        self.inner.enable_pvalue_filter = on;
        self
    }

    pub fn enable_r2_filter(mut self, on: bool) -> Self {
        self.inner.enable_r2_filter = on;
        self
    }

    pub fn enable_beta_filter(mut self, on: bool) -> Self {
        self.inner.enable_beta_filter = on;
        self
    }

    pub fn enable_zscore_filter(mut self, on: bool) -> Self {
        self.inner.enable_zscore_filter = on;
        self
    }

    pub fn build(self) -> Result<FilterConfig, ConfigError> {
        let c = self.inner;
        if !(c.p_value_max > 0.0 && c.p_value_max <= 1.0) {
            return Err(ConfigError(format!("p_value_max must be in (0, 1], got {}", c.p_value_max)));
        }
        if !(0.0..=1.0).contains(&c.r_squared_min) {
            return Err(ConfigError(format!("r_squared_min must be in [0, 1], got {}", c.r_squared_min)));
        }
        if !c.beta_min.is_finite() || !c.beta_max.is_finite() || c.beta_min >= c.beta_max {
            return Err(ConfigError(format!(
                "beta range must be finite with min < max, got [{}, {}]",
                c.beta_min, c.beta_max
            )));
        }
        if !(c.zscore_exit_threshold >= 0.0 && c.zscore_entry_threshold > c.zscore_exit_threshold) {
            return Err(ConfigError(format!(
                "z-score thresholds need entry > exit >= 0, got entry={} exit={}",
                c.zscore_entry_threshold, c.zscore_exit_threshold
            )));
        }
        if !c.zscore_entry_threshold.is_finite() {
            return Err(ConfigError("zscore_entry_threshold must be finite".into()));
        }
        Ok(c)
    }
}

// ── Scan configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanConfig {
    /// Canonical lookback windows, strictly ascending
    pub canonical_windows: Vec<usize>,
    /// Windows shorter than this fail with InsufficientData
    pub min_window:        usize,
    /// Upper bound on ADF lagged differences
    pub adf_max_lags:      usize,
    /// Bar timeframe requested from the market-data port
    pub timeframe:         Timeframe,
    /// Concurrent pair evaluations
    pub max_concurrency:   usize,
    /// Budget for one pair's evaluation
    pub pair_timeout:      Duration,
    /// Budget for a whole cycle
    pub cycle_timeout:     Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            canonical_windows: DEFAULT_WINDOWS.to_vec(),
            min_window:        20,
            adf_max_lags:      12,
            timeframe:         Timeframe::M15,
            max_concurrency:   4,
            pair_timeout:      Duration::from_secs(5),
            cycle_timeout:     Duration::from_secs(120),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canonical_windows.is_empty() {
            return Err(ConfigError("canonical_windows cannot be empty".into()));
        }
        if self.canonical_windows.iter().any(|&w| w == 0) {
            return Err(ConfigError("canonical_windows must be positive".into()));
        }
        if self.canonical_windows.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError(format!(
                "canonical_windows must be strictly ascending, got {:?}",
                self.canonical_windows
            )));
        }
        if self.min_window < 3 {
            return Err(ConfigError(format!("min_window must be at least 3, got {}", self.min_window)));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError("max_concurrency must be at least 1".into()));
        }
        if self.pair_timeout.is_zero() || self.cycle_timeout.is_zero() {
            return Err(ConfigError("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Bars to request per symbol: enough for the longest window.
    pub fn history_bars(&self) -> usize {
        self.canonical_windows.iter().copied().max().unwrap_or(0)
    }
}

// ── Risk configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskConfig {
    /// Seconds a pair stays quiet after signalling
    pub cooldown_seconds:         u64,
    /// Cap on simultaneously open pair positions
    pub max_concurrent_positions: usize,
    /// Stop distance as a fraction of entry (e.g. 0.02 = 2%)
    pub stop_loss_pct:            f64,
    /// Target distance as a fraction of entry
    pub take_profit_pct:          f64,
    /// Volume sent with each order
    pub order_volume:             f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds:         300,
            max_concurrent_positions: 5,
            stop_loss_pct:            0.02,
            take_profit_pct:          0.04,
            order_volume:             100.0,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_positions == 0 {
            return Err(ConfigError("max_concurrent_positions must be at least 1".into()));
        }
        for (name, v) in [("stop_loss_pct", self.stop_loss_pct), ("take_profit_pct", self.take_profit_pct)] {
            if !(v > 0.0 && v < 1.0) {
                return Err(ConfigError(format!("{name} must be in (0, 1), got {v}")));
            }
        }
        if !(self.order_volume > 0.0 && self.order_volume.is_finite()) {
            return Err(ConfigError(format!("order_volume must be positive, got {}", self.order_volume)));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_seconds.min(i64::MAX as u64) as i64)
    }
}

// ── Application configuration ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Trading universe ─────────────────────────────────────────────
    pub universe: Vec<String>,

    // ── Engine sections ──────────────────────────────────────────────
    pub filter: FilterConfig,
    pub scan:   ScanConfig,
    pub risk:   RiskConfig,

    // ── Scheduling ───────────────────────────────────────────────────
    /// Seconds between scan cycles
    pub scan_interval: Duration,

    // ── Paper mode ───────────────────────────────────────────────────
    /// Seed of the synthetic market-data generator
    pub paper_seed:   u64,
    /// Cycles to run before exiting (0 = run forever)
    pub paper_cycles: u64,
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let universe: Vec<String> = env::var("UNIVERSE")
            .map(|v| v.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|_| DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect());

        let defaults = FilterConfig::default();
        let filter = FilterConfig::builder()
            .p_value_max(parse_env("P_VALUE_MAX", defaults.p_value_max())?)
            .r_squared_min(parse_env("R_SQUARED_MIN", defaults.r_squared_min())?)
            .beta_range(
                parse_env("BETA_MIN", defaults.beta_min())?,
                parse_env("BETA_MAX", defaults.beta_max())?,
            )
            .zscore_thresholds(
                parse_env("ZSCORE_ENTRY", defaults.zscore_entry_threshold())?,
                parse_env("ZSCORE_EXIT", defaults.zscore_exit_threshold())?,
            )
            .enable_pvalue_filter(parse_env("ENABLE_PVALUE_FILTER", true)?)
            .enable_r2_filter(parse_env("ENABLE_R2_FILTER", true)?)
            .enable_beta_filter(parse_env("ENABLE_BETA_FILTER", true)?)
            .enable_zscore_filter(parse_env("ENABLE_ZSCORE_FILTER", true)?)
            .build()?;

        let scan_defaults = ScanConfig::default();
        let canonical_windows = match env::var("CANONICAL_WINDOWS") {
            Ok(v) => v
                .split(',')
                .map(|s| s.trim().parse::<usize>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| anyhow::anyhow!("Config key CANONICAL_WINDOWS: {e}"))?,
            Err(_) => scan_defaults.canonical_windows.clone(),
        };
        let timeframe = match env::var("TIMEFRAME") {
            Ok(v) => v.parse::<Timeframe>().map_err(|e| anyhow::anyhow!("Config key TIMEFRAME: {e}"))?,
            Err(_) => scan_defaults.timeframe,
        };
        let scan = ScanConfig {
            canonical_windows,
            min_window:      parse_env("MIN_WINDOW", scan_defaults.min_window)?,
            adf_max_lags:    parse_env("ADF_MAX_LAGS", scan_defaults.adf_max_lags)?,
            timeframe,
            max_concurrency: parse_env("SCAN_CONCURRENCY", scan_defaults.max_concurrency)?,
            pair_timeout:    Duration::from_millis(parse_env("PAIR_TIMEOUT_MS", 5_000u64)?),
            cycle_timeout:   Duration::from_millis(parse_env("CYCLE_TIMEOUT_MS", 120_000u64)?),
        };
        scan.validate()?;

        let risk_defaults = RiskConfig::default();
        let risk = RiskConfig {
            cooldown_seconds:         parse_env("COOLDOWN_SECONDS", risk_defaults.cooldown_seconds)?,
            max_concurrent_positions: parse_env("MAX_CONCURRENT_POSITIONS", risk_defaults.max_concurrent_positions)?,
            stop_loss_pct:            parse_env("STOP_LOSS_PCT", risk_defaults.stop_loss_pct)?,
            take_profit_pct:          parse_env("TAKE_PROFIT_PCT", risk_defaults.take_profit_pct)?,
            order_volume:             parse_env("ORDER_VOLUME", risk_defaults.order_volume)?,
        };
        risk.validate()?;

        Ok(Self {
            universe,
            filter,
            scan,
            risk,
            scan_interval: Duration::from_secs(parse_env("SCAN_INTERVAL_SECS", 60u64)?),
            paper_seed:    parse_env("PAPER_SEED", 42u64)?,
            paper_cycles:  parse_env("PAPER_CYCLES", 3u64)?,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(FilterConfig::builder().build().is_ok());
        assert!(ScanConfig::default().validate().is_ok());
        assert!(RiskConfig::default().validate().is_ok());
    }

    #[test]
    fn entry_must_exceed_exit() {
        let err = FilterConfig::builder().zscore_thresholds(1.0, 1.5).build().unwrap_err();
        assert!(err.0.contains("entry > exit"));
    }

    #[test]
    fn inverted_beta_range_rejected() {
        assert!(FilterConfig::builder().beta_range(2.0, 1.0).build().is_err());
    }

    #[test]
    fn windows_must_ascend() {
        let cfg = ScanConfig { canonical_windows: vec![100, 70], ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = ScanConfig { canonical_windows: vec![], ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn protective_fractions_bounded() {
        let cfg = RiskConfig { stop_loss_pct: 1.0, ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = RiskConfig { take_profit_pct: 0.0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn history_bars_covers_longest_window() {
        assert_eq!(ScanConfig::default().history_bars(), 250);
    }

    #[test]
    fn to_builder_round_trips() {
        let base = FilterConfig::builder().r_squared_min(0.7).build().unwrap();
        let tighter = base.to_builder().r_squared_min(0.9).build().unwrap();
        assert_eq!(tighter.p_value_max(), base.p_value_max());
        assert_eq!(tighter.r_squared_min(), 0.9);
    }
}
