/// scan.rs — One scan cycle over the pair universe
///
/// FLOW:
///   1. Build the ordered cross product of the (sorted, deduplicated) universe
///   2. Drop pairs touching a symbol the store could not load
///   3. Per pair, on the blocking pool (bounded by a semaphore, each under
///      the per-pair timeout): select_best → filter → may_signal
///   4. Reassemble results in candidate order
///   5. Rank the eligible verdicts into the free position slots and claim state
///
/// A cycle either completes whole or fails whole: exceeding the cycle budget
/// aborts in-flight work and discards partial results. Individual pair
/// failures (timeout, panic) are recorded and skipped.
///
/// Blocking work cannot be interrupted, so a timed-out evaluation keeps its
/// semaphore permit until it actually returns. The semaphore lives on the
/// orchestrator, which keeps leftovers from an abandoned cycle inside the
/// same bound as the next cycle's work.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cointegration::CointegrationTester;
use crate::config::{FilterConfig, RiskConfig, ScanConfig};
use crate::error::ScanError;
use crate::executor::DispatchSummary;
use crate::filter::{filter, FilterVerdict};
use crate::models::{ExitAdvice, PairCandidate, Signal};
use crate::ranker::{self, Emitted};
use crate::risk;
use crate::selector::MultiWindowSelector;
use crate::state::{Claim, PairStateTracker};
use crate::store::SeriesStore;

// ── Report types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleCounters {
    pub pairs_total:          usize,
    /// Touching a symbol the store could not load
    pub pairs_unavailable:    usize,
    pub pairs_evaluated:      usize,
    /// No canonical window was evaluable
    pub pairs_without_window: usize,
    pub pairs_failed:         usize,
    pub pairs_accepted:       usize,
    /// Accepted but cooling down or holding a position
    pub pairs_in_cooldown:    usize,
    pub signals_emitted:      usize,
    pub exits_advised:        usize,
    /// Most pair evaluations seen running at once
    pub peak_in_flight:       usize,
}

/// A pair whose worker did not return a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairFailure {
    pub pair:   PairCandidate,
    pub reason: String,
}

/// Everything one cycle produced. Replaced whole each cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id:     u64,
    pub generated_at: DateTime<Utc>,
    pub signals:      Vec<Signal>,
    pub exits:        Vec<ExitAdvice>,
    /// Every judged pair in candidate order
    pub verdicts:     Vec<FilterVerdict>,
    pub failures:     Vec<PairFailure>,
    /// symbol → reason
    pub unavailable:  BTreeMap<String, String>,
    pub counters:     CycleCounters,
    pub elapsed_ms:   u64,
    /// Filled in once the signals have been sent to the broker
    pub dispatch:     DispatchSummary,
    /// State claims behind `signals`, same order. Consumed by the dispatcher.
    #[serde(skip)]
    pub claims:       Vec<Claim>,
}

// ── Per-pair work ─────────────────────────────────────────────────────────

#[derive(Debug)]
enum PairOutcome {
    NoWindow,
    Judged {
        verdict:  FilterVerdict,
        eligible: bool,
        exit:     Option<ExitAdvice>,
    },
}

fn evaluate_pair(
    selector: &MultiWindowSelector,
    tracker:  &PairStateTracker,
    store:    &SeriesStore,
    config:   &FilterConfig,
    pair:     &PairCandidate,
    now:      DateTime<Utc>,
) -> PairOutcome {
    let Some(selected) = selector.select_best(pair, store) else {
        return PairOutcome::NoWindow;
    };
    let verdict = filter(&selected, config);

    let eligible = match verdict.direction {
        Some(dir) if verdict.accepted => tracker.may_signal(pair, dir, now),
        _ => false,
    };

    let exit = tracker.linked_position(pair).and_then(|position_id| {
        let r = &verdict.selected.result;
        (r.z_score.abs() <= config.zscore_exit_threshold()).then(|| ExitAdvice {
            pair:          pair.clone(),
            position_id,
            z_score:       r.z_score,
            window_length: r.window_length,
            generated_at:  now,
        })
    });

    PairOutcome::Judged { verdict, eligible, exit }
}

// ── Orchestrator ──────────────────────────────────────────────────────────

pub struct ScanOrchestrator {
    selector:  Arc<MultiWindowSelector>,
    tracker:   Arc<PairStateTracker>,
    scan:      ScanConfig,
    risk:      RiskConfig,
    next_id:   AtomicU64,
    permits:   Arc<Semaphore>,
    in_flight: Arc<InFlight>,
}

/// Live count of running pair evaluations and its high-water mark.
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak:    AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    /// Restart the high-water mark from whatever is still running.
    fn reset_peak(&self) {
        self.peak.store(self.current.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

/// Decrements the live count on drop, panics included.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScanOrchestrator {
    pub fn new(scan: ScanConfig, risk: RiskConfig, tracker: Arc<PairStateTracker>) -> Self {
        let tester = CointegrationTester::new(scan.min_window, scan.adf_max_lags);
        let selector = MultiWindowSelector::new(tester, scan.canonical_windows.clone());
        let permits = Arc::new(Semaphore::new(scan.max_concurrency.max(1)));
        Self {
            selector: Arc::new(selector),
            tracker,
            scan,
            risk,
            next_id: AtomicU64::new(1),
            permits,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn tracker(&self) -> &Arc<PairStateTracker> {
        &self.tracker
    }

    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan
    }

    /// Run one full cycle against a populated store.
    pub async fn run_cycle(
        &self,
        universe: &[String],
        store:    Arc<SeriesStore>,
        config:   &FilterConfig,
        now:      DateTime<Utc>,
    ) -> Result<CycleReport, ScanError> {
        let started = Instant::now();
        let cycle_id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut symbols: Vec<String> = universe.to_vec();
        symbols.sort();
        symbols.dedup();
        if symbols.len() < 2 {
            return Err(ScanError::EmptyUniverse);
        }
        if symbols.iter().all(|s| !store.is_available(s)) {
            return Err(ScanError::UniverseUnavailable(symbols.len()));
        }

        let universe_pairs = PairCandidate::universe(&symbols);
        let mut counters = CycleCounters { pairs_total: universe_pairs.len(), ..Default::default() };
        let candidates: Vec<PairCandidate> = universe_pairs
            .into_iter()
            .filter(|p| store.is_available(&p.dependent) && store.is_available(&p.independent))
            .collect();
        counters.pairs_unavailable = counters.pairs_total - candidates.len();

        self.in_flight.reset_peak();
        let slots = self.evaluate_all(&candidates, &store, config, now);
        let slots = match tokio::time::timeout(self.scan.cycle_timeout, slots).await {
            Ok(slots) => slots,
            Err(_) => {
                warn!(cycle_id, budget = ?self.scan.cycle_timeout, "Cycle budget exceeded, discarding partial results");
                return Err(ScanError::CycleTimedOut(self.scan.cycle_timeout));
            }
        };

        let mut verdicts = Vec::new();
        let mut eligible = Vec::new();
        let mut exits = Vec::new();
        let mut failures = Vec::new();
        for (pair, slot) in candidates.iter().zip(slots) {
            match slot {
                Some(Ok(PairOutcome::NoWindow)) => counters.pairs_without_window += 1,
                Some(Ok(PairOutcome::Judged { verdict, eligible: ok, exit })) => {
                    counters.pairs_evaluated += 1;
                    if verdict.accepted {
                        counters.pairs_accepted += 1;
                        if ok {
                            eligible.push(verdict.clone());
                        } else {
                            counters.pairs_in_cooldown += 1;
                        }
                    }
                    exits.extend(exit);
                    verdicts.push(verdict);
                }
                Some(Err(reason)) => {
                    counters.pairs_failed += 1;
                    failures.push(PairFailure { pair: pair.clone(), reason });
                }
                None => {
                    counters.pairs_failed += 1;
                    failures.push(PairFailure { pair: pair.clone(), reason: "worker lost".into() });
                }
            }
        }

        let free = risk::remaining_slots(&self.risk, self.tracker.open_position_count());
        let emitted = ranker::rank_and_emit(eligible, free, &self.tracker, &self.risk, now);
        let (signals, claims): (Vec<Signal>, Vec<Claim>) =
            emitted.into_iter().map(|Emitted { signal, claim }| (signal, claim)).unzip();

        counters.signals_emitted = signals.len();
        counters.exits_advised = exits.len();
        counters.peak_in_flight = self.in_flight.peak.load(Ordering::SeqCst);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            "Cycle #{} complete: {} pairs | {} evaluated | {} accepted | {} signals | {} exits | {} failed | {}ms",
            cycle_id, counters.pairs_total, counters.pairs_evaluated, counters.pairs_accepted,
            counters.signals_emitted, counters.exits_advised, counters.pairs_failed, elapsed_ms
        );

        Ok(CycleReport {
            cycle_id,
            generated_at: now,
            signals,
            exits,
            verdicts,
            failures,
            unavailable: store.unavailable().clone(),
            counters,
            elapsed_ms,
            dispatch: DispatchSummary::default(),
            claims,
        })
    }

    /// Fan pairs out to the blocking pool and collect one slot per candidate.
    async fn evaluate_all(
        &self,
        candidates: &[PairCandidate],
        store:      &Arc<SeriesStore>,
        config:     &FilterConfig,
        now:        DateTime<Utc>,
    ) -> Vec<Option<Result<PairOutcome, String>>> {
        let config = Arc::new(config.clone());
        let pair_timeout = self.scan.pair_timeout;
        let mut set = JoinSet::new();

        for (idx, pair) in candidates.iter().cloned().enumerate() {
            let permits = Arc::clone(&self.permits);
            let in_flight = Arc::clone(&self.in_flight);
            let selector = Arc::clone(&self.selector);
            let tracker = Arc::clone(&self.tracker);
            let store = Arc::clone(store);
            let config = Arc::clone(&config);

            set.spawn(async move {
                let Ok(permit) = permits.acquire_owned().await else {
                    return (idx, Err("worker pool closed".to_owned()));
                };
                // The permit travels with the blocking work and is released
                // only when the evaluation returns, even after a timeout.
                let work = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    let _running = in_flight.enter();
                    evaluate_pair(&selector, &tracker, &store, &config, &pair, now)
                });
                let outcome = match tokio::time::timeout(pair_timeout, work).await {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(e)) => Err(format!("worker panicked: {e}")),
                    Err(_) => Err(format!("timed out after {pair_timeout:?}")),
                };
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<Result<PairOutcome, String>>> =
            std::iter::repeat_with(|| None).take(candidates.len()).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => {
                    if let Err(reason) = &outcome {
                        warn!(pair = %candidates[idx], reason = %reason, "Pair evaluation failed");
                    }
                    slots[idx] = Some(outcome);
                }
                Err(e) => debug!(error = %e, "Pair task did not complete"),
            }
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::data::{closes_to_bars, ou_path, random_walk, SyntheticMarketData};
    use crate::models::testutil::ts;
    use crate::models::AssetSeries;
    use crate::ports::Timeframe;

    fn universe(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    fn scan_config() -> ScanConfig {
        ScanConfig { canonical_windows: vec![70, 100, 140], ..ScanConfig::default() }
    }

    /// Accepts any pair outside a tiny neutral zone.
    fn permissive() -> FilterConfig {
        FilterConfig::builder()
            .enable_pvalue_filter(false)
            .enable_r2_filter(false)
            .enable_beta_filter(false)
            .enable_zscore_filter(false)
            .zscore_thresholds(1e-6, 0.0)
            .build()
            .unwrap()
    }

    async fn store_for(port: &SyntheticMarketData, symbols: &[String]) -> Arc<SeriesStore> {
        Arc::new(SeriesStore::populate(port, symbols, Timeframe::M15, 140).await)
    }

    fn orchestrator() -> ScanOrchestrator {
        orchestrator_with(scan_config())
    }

    fn orchestrator_with(scan: ScanConfig) -> ScanOrchestrator {
        let risk = RiskConfig::default();
        let tracker = Arc::new(PairStateTracker::new(risk.cooldown()));
        ScanOrchestrator::new(scan, risk, tracker)
    }

    /// `n` bars per symbol on a shared driver, all ending at the same bar as
    /// any other series built with the same `total`.
    fn linked_series(symbols: &[&str], total: usize, n: usize, seed: u64) -> Vec<AssetSeries> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let driver = random_walk(&mut rng, n, 40.0, 0.02);
        let start = ts(0) + Timeframe::M15.duration() * (total - n) as i32;
        symbols
            .iter()
            .enumerate()
            .map(|(k, symbol)| {
                let spread = ou_path(&mut rng, n, 0.6, 0.2);
                let closes: Vec<f64> = driver
                    .iter()
                    .zip(&spread)
                    .map(|(x, e)| (1.0 + 0.1 * k as f64) * x + e)
                    .collect();
                AssetSeries::new(*symbol, closes_to_bars(&closes, start, Timeframe::M15)).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_output() {
        let symbols = universe(&["PETR4", "PETR3", "VALE3", "ITUB4"]);
        let port = SyntheticMarketData::generate(&symbols, 200, 200, Timeframe::M15, 3, ts(1_000));
        let store = store_for(&port, &symbols).await;

        let orch = orchestrator();
        let a = orch.run_cycle(&symbols, Arc::clone(&store), &permissive(), ts(1_000)).await.unwrap();
        orch.tracker().reset();
        let b = orch.run_cycle(&symbols, store, &permissive(), ts(1_000)).await.unwrap();

        assert!(!a.signals.is_empty());
        assert_eq!(a.signals, b.signals);
        assert_eq!(a.verdicts, b.verdicts);
        assert_eq!(
            serde_json::to_string(&a.signals).unwrap(),
            serde_json::to_string(&b.signals).unwrap()
        );
        assert_eq!(a.counters.pairs_total, 12);
        assert_eq!(a.counters.pairs_evaluated, 12);
    }

    #[tokio::test]
    async fn signals_are_ranked_and_capped() {
        let symbols = universe(&["PETR4", "PETR3", "VALE3", "ITUB4"]);
        let port = SyntheticMarketData::generate(&symbols, 200, 200, Timeframe::M15, 4, ts(1_000));
        let store = store_for(&port, &symbols).await;

        let report = orchestrator().run_cycle(&symbols, store, &permissive(), ts(1_000)).await.unwrap();
        assert_eq!(report.signals.len(), RiskConfig::default().max_concurrent_positions);
        assert_eq!(report.claims.len(), report.signals.len());
        assert!(report
            .signals
            .windows(2)
            .all(|w| w[0].strength_score >= w[1].strength_score));
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_signals_until_expiry() {
        let symbols = universe(&["PETR4", "PETR3", "VALE3", "ITUB4"]);
        let port = SyntheticMarketData::generate(&symbols, 200, 200, Timeframe::M15, 5, ts(1_000));
        let store = store_for(&port, &symbols).await;
        let orch = orchestrator();
        let t0 = ts(1_000);

        let first = orch.run_cycle(&symbols, Arc::clone(&store), &permissive(), t0).await.unwrap();
        let first_pairs: BTreeSet<_> = first.signals.iter().map(|s| s.pair.clone()).collect();
        assert!(!first_pairs.is_empty());

        let second = orch
            .run_cycle(&symbols, Arc::clone(&store), &permissive(), t0 + Duration::seconds(1))
            .await
            .unwrap();
        assert!(second.signals.iter().all(|s| !first_pairs.contains(&s.pair)));
        assert!(second.counters.pairs_in_cooldown >= first_pairs.len());

        let expired = t0 + RiskConfig::default().cooldown() + Duration::seconds(1);
        let third = orch.run_cycle(&symbols, store, &permissive(), expired).await.unwrap();
        assert_eq!(third.signals.len(), RiskConfig::default().max_concurrent_positions);
    }

    #[tokio::test]
    async fn unavailable_symbol_skips_its_pairs() {
        let symbols = universe(&["PETR4", "PETR3", "VALE3", "ITUB4"]);
        let port = SyntheticMarketData::generate(&symbols, 200, 200, Timeframe::M15, 6, ts(1_000))
            .with_failure("VALE3");
        let store = store_for(&port, &symbols).await;

        let report = orchestrator().run_cycle(&symbols, store, &FilterConfig::default(), ts(1_000)).await.unwrap();
        assert_eq!(report.counters.pairs_unavailable, 6);
        assert_eq!(report.counters.pairs_evaluated, 6);
        assert!(report.verdicts.iter().all(|v| !v.pair.involves("VALE3")));
        assert!(report.unavailable.contains_key("VALE3"));
    }

    #[tokio::test]
    async fn whole_universe_down_is_a_cycle_error() {
        let symbols = universe(&["PETR4", "PETR3"]);
        let port = SyntheticMarketData::generate(&symbols, 100, 100, Timeframe::M15, 7, ts(500))
            .with_failure("PETR4")
            .with_failure("PETR3");
        let store = store_for(&port, &symbols).await;

        let err = orchestrator().run_cycle(&symbols, store, &FilterConfig::default(), ts(500)).await.unwrap_err();
        assert_eq!(err, ScanError::UniverseUnavailable(2));
    }

    #[tokio::test]
    async fn single_symbol_universe_is_rejected() {
        let store = Arc::new(SeriesStore::new());
        let err = orchestrator()
            .run_cycle(&universe(&["PETR4", "PETR4"]), store, &FilterConfig::default(), ts(0))
            .await
            .unwrap_err();
        assert_eq!(err, ScanError::EmptyUniverse);
    }

    #[tokio::test]
    async fn linked_pair_inside_exit_band_gets_exit_advice() {
        let symbols = universe(&["PETR4", "PETR3"]);
        let port = SyntheticMarketData::generate(&symbols, 200, 200, Timeframe::M15, 8, ts(1_000));
        let store = store_for(&port, &symbols).await;
        let orch = orchestrator();
        let pair = PairCandidate::new("PETR4", "PETR3").unwrap();
        orch.tracker().link_position(&pair, "77");

        let wide_exit = FilterConfig::builder().zscore_thresholds(50.0, 49.0).build().unwrap();
        let report = orch.run_cycle(&symbols, store, &wide_exit, ts(1_000)).await.unwrap();

        assert_eq!(report.exits.len(), 1);
        assert_eq!(report.exits[0].pair, pair);
        assert_eq!(report.exits[0].position_id, "77");
        assert!(report.signals.is_empty());
    }

    #[tokio::test]
    async fn timed_out_evaluations_keep_their_worker_slot() {
        const BARS: usize = 20_000;
        let symbols = universe(&["PETR4", "PETR3", "VALE3", "ITUB4"]);
        let store = Arc::new(SeriesStore::from_series(linked_series(
            &["PETR4", "PETR3", "VALE3", "ITUB4"], BARS, BARS, 11,
        )));
        let scan = ScanConfig {
            canonical_windows: vec![BARS],
            max_concurrency:   2,
            pair_timeout:      std::time::Duration::from_millis(1),
            ..ScanConfig::default()
        };

        let report = orchestrator_with(scan).run_cycle(&symbols, store, &permissive(), ts(BARS as i64)).await.unwrap();

        assert!(report.counters.pairs_failed > 0);
        assert!(report.failures.iter().all(|f| f.reason.starts_with("timed out")));
        assert!(report.counters.peak_in_flight >= 1);
        assert!(report.counters.peak_in_flight <= 2, "peak = {}", report.counters.peak_in_flight);
    }

    #[tokio::test]
    async fn cycle_over_budget_fails_whole_and_claims_nothing() {
        const BARS: usize = 20_000;
        let symbols = universe(&["PETR4", "PETR3", "VALE3", "ITUB4"]);
        let store = Arc::new(SeriesStore::from_series(linked_series(
            &["PETR4", "PETR3", "VALE3", "ITUB4"], BARS, BARS, 12,
        )));
        let budget = std::time::Duration::from_millis(1);
        let orch = orchestrator_with(ScanConfig {
            canonical_windows: vec![BARS],
            cycle_timeout:     budget,
            ..ScanConfig::default()
        });

        let err = orch.run_cycle(&symbols, store, &permissive(), ts(BARS as i64)).await.unwrap_err();

        assert_eq!(err, ScanError::CycleTimedOut(budget));
        assert!(orch.tracker().snapshot().is_empty());
    }

    #[tokio::test]
    async fn slow_pair_fails_alone_and_the_cycle_completes() {
        const LONG: usize = 300_000;
        let symbols = universe(&["PETR4", "PETR3", "VALE3", "ITUB4"]);
        let mut series = linked_series(&["PETR4", "PETR3"], LONG, LONG, 13);
        series.extend(linked_series(&["VALE3", "ITUB4"], LONG, 100, 14));
        let store = Arc::new(SeriesStore::from_series(series));
        // Only PETR4/PETR3 has history for the long window.
        let scan = ScanConfig {
            canonical_windows: vec![60, LONG],
            pair_timeout:      std::time::Duration::from_millis(40),
            ..ScanConfig::default()
        };

        let report = orchestrator_with(scan).run_cycle(&symbols, store, &permissive(), ts(LONG as i64)).await.unwrap();

        let failed: BTreeSet<String> = report.failures.iter().map(|f| f.pair.name()).collect();
        assert_eq!(failed, BTreeSet::from(["PETR3/PETR4".to_string(), "PETR4/PETR3".to_string()]));
        assert_eq!(report.counters.pairs_failed, 2);
        assert_eq!(report.counters.pairs_evaluated, 10);
        assert_eq!(report.verdicts.len(), 10);
        assert!(report.verdicts.iter().all(|v| v.selected.result.window_length == 60));
    }
}
