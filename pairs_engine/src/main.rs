/// main.rs — Paper Scan Entry Point
///
/// Runs the pairs scan against a seeded synthetic market and an in-memory
/// paper broker:
///   1. Load config from .env
///   2. Generate a cointegrated universe (PAPER_SEED)
///   3. Run PAPER_CYCLES scan cycles (0 = until Ctrl-C), revealing one new
///      bar per cycle
///   4. Print each published cycle report as JSON
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pairs_engine::config::AppConfig;
use pairs_engine::data::SyntheticMarketData;
use pairs_engine::engine::ScanEngine;
use pairs_engine::executor::PaperOrderPort;

const PAPER_BALANCE: f64 = 100_000.0;

/// Bars generated ahead when running until Ctrl-C.
const PAPER_FOREVER_BARS: usize = 10_000;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════╗");
    info!("║     PAIRS ENGINE  —  PAPER SCAN MODE        ║");
    info!("║  Engle-Granger + ADF · multi-window select  ║");
    info!("╚══════════════════════════════════════════════╝");

    // ── Config ───────────────────────────────────────────────────────────
    let cfg = AppConfig::from_env()?;
    info!(
        "Universe: {} symbols [{}]  timeframe={}",
        cfg.universe.len(), cfg.universe.join(","), cfg.scan.timeframe
    );
    info!(
        "Windows: {:?}  min={}  adf_max_lags={}",
        cfg.scan.canonical_windows, cfg.scan.min_window, cfg.scan.adf_max_lags
    );
    info!(
        "Filters: p≤{:.3} R²≥{:.2} β∈[{:.2},{:.2}] entry_z={:.1} exit_z={:.1}",
        cfg.filter.p_value_max(), cfg.filter.r_squared_min(),
        cfg.filter.beta_min(), cfg.filter.beta_max(),
        cfg.filter.zscore_entry_threshold(), cfg.filter.zscore_exit_threshold()
    );
    info!(
        "Risk:    cooldown={}s max_positions={} SL={:.1}% TP={:.1}%",
        cfg.risk.cooldown_seconds, cfg.risk.max_concurrent_positions,
        cfg.risk.stop_loss_pct * 100.0, cfg.risk.take_profit_pct * 100.0
    );

    // ── Paper market + broker ────────────────────────────────────────────
    let history = cfg.scan.history_bars();
    let reveal = if cfg.paper_cycles == 0 { PAPER_FOREVER_BARS } else { cfg.paper_cycles as usize };
    let broker = Arc::new(PaperOrderPort::new(PAPER_BALANCE));
    let market = Arc::new(
        SyntheticMarketData::generate(
            &cfg.universe,
            history + reveal,
            history,
            cfg.scan.timeframe,
            cfg.paper_seed,
            Utc::now(),
        )
        .with_account(Arc::clone(&broker)),
    );
    info!("Synthetic market ready: seed={} bars={} (+{} revealed over the run)", cfg.paper_seed, history, reveal);

    let engine = ScanEngine::new(&cfg, market.clone(), broker.clone())?;

    // ── Report printer ───────────────────────────────────────────────────
    let mut reports = engine.subscribe();
    let printer = tokio::spawn(async move {
        while reports.changed().await.is_ok() {
            let latest = reports.borrow_and_update().clone();
            if let Some(report) = latest {
                match serde_json::to_string_pretty(report.as_ref()) {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!("Could not serialise cycle report: {e}"),
                }
            }
        }
    });

    // ── Scan loop ────────────────────────────────────────────────────────
    let cycles = if cfg.paper_cycles == 0 {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = stop_tx.send(true);
            }
        });
        let ticker_market = Arc::clone(&market);
        let interval = cfg.scan_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                ticker_market.advance(1);
            }
        });
        engine.run(stop_rx, None).await
    } else {
        for cycle in 1..=cfg.paper_cycles {
            if let Err(e) = engine.run_once(Utc::now()).await {
                warn!("Cycle {cycle} failed: {e}");
            }
            market.advance(1);
            if cycle < cfg.paper_cycles {
                tokio::time::sleep(cfg.scan_interval).await;
            }
        }
        cfg.paper_cycles
    };

    drop(engine);
    if let Err(e) = printer.await {
        warn!("Report printer stopped abnormally: {e}");
    }

    let snapshot = broker.snapshot();
    info!(
        "Done: {} cycles, {} paper positions open, {} orders sent",
        cycles,
        snapshot.open_positions.len(),
        broker.orders().len()
    );

    Ok(())
}
