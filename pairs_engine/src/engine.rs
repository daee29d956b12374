/// engine.rs — Periodic scan driver
///
/// One cycle:
///   1. Account snapshot → reconcile pair state against open positions
///   2. Populate the series store (one fetch per symbol)
///   3. Run the scan cycle
///   4. Dispatch emitted signals to the order port
///   5. Publish the report on the watch channel
///
/// A failed cycle is logged and the loop carries on at the next tick.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::{AppConfig, FilterConfig};
use crate::error::{ConfigError, ScanError};
use crate::executor::SignalDispatcher;
use crate::ports::{MarketDataPort, OrderExecutionPort};
use crate::scan::{CycleReport, ScanOrchestrator};
use crate::state::PairStateTracker;
use crate::store::SeriesStore;

pub type ReportReceiver = watch::Receiver<Option<Arc<CycleReport>>>;

pub struct ScanEngine {
    market:       Arc<dyn MarketDataPort>,
    orchestrator: ScanOrchestrator,
    dispatcher:   SignalDispatcher,
    universe:     Vec<String>,
    filter:       FilterConfig,
    interval:     Duration,
    reports:      watch::Sender<Option<Arc<CycleReport>>>,
}

impl ScanEngine {
    pub fn new(
        config: &AppConfig,
        market: Arc<dyn MarketDataPort>,
        orders: Arc<dyn OrderExecutionPort>,
    ) -> Result<Self, ConfigError> {
        config.scan.validate()?;
        config.risk.validate()?;
        if config.scan_interval.is_zero() {
            return Err(ConfigError("scan_interval must be non-zero".into()));
        }

        let tracker = Arc::new(PairStateTracker::new(config.risk.cooldown()));
        let orchestrator = ScanOrchestrator::new(config.scan.clone(), config.risk.clone(), Arc::clone(&tracker));
        let dispatcher = SignalDispatcher::new(orders, tracker, config.risk.clone());
        let (reports, _) = watch::channel(None);

        Ok(Self {
            market,
            orchestrator,
            dispatcher,
            universe: config.universe.clone(),
            filter: config.filter.clone(),
            interval: config.scan_interval,
            reports,
        })
    }

    /// Latest report, replaced whole after each successful cycle.
    pub fn subscribe(&self) -> ReportReceiver {
        self.reports.subscribe()
    }

    pub fn tracker(&self) -> &Arc<PairStateTracker> {
        self.orchestrator.tracker()
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Arc<CycleReport>, ScanError> {
        match self.market.get_account_snapshot().await {
            Ok(snapshot) => {
                self.tracker()
                    .reconcile(snapshot.open_positions.iter().map(|p| p.position_id.as_str()));
            }
            Err(e) => warn!("Account snapshot unavailable, keeping pair state as is: {e}"),
        }

        let scan = self.orchestrator.scan_config();
        let store = SeriesStore::populate(
            self.market.as_ref(),
            &self.universe,
            scan.timeframe,
            scan.history_bars(),
        )
        .await;

        let mut report = self
            .orchestrator
            .run_cycle(&self.universe, Arc::new(store), &self.filter, now)
            .await?;

        let claims = std::mem::take(&mut report.claims);
        report.dispatch = self.dispatcher.dispatch(&report.signals, claims).await;

        let report = Arc::new(report);
        self.reports.send_replace(Some(Arc::clone(&report)));
        Ok(report)
    }

    /// Tick every `scan_interval` until `shutdown` flips to true or
    /// `max_cycles` cycles have been attempted. Returns cycles attempted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, max_cycles: Option<u64>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = 0u64;

        info!(
            "Scan loop started: {} symbols every {:?}{}",
            self.universe.len(),
            self.interval,
            max_cycles.map(|n| format!(" for {n} cycles")).unwrap_or_default()
        );

        loop {
            if max_cycles.is_some_and(|n| cycles >= n) {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, leaving scan loop");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    if let Err(e) = self.run_once(Utc::now()).await {
                        error!("Cycle {cycles} failed: {e}");
                    }
                }
            }
        }
        cycles
    }
}
