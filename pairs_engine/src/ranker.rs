/// ranker.rs — Rank accepted pairs and emit signals
///
/// strength = |z| · R²
///
/// Order: strength desc → R² desc → pair name asc. Walking the ranked list,
/// each pair must still win its state claim (another cycle may have
/// signalled it since the worker checked); emission stops once the free
/// position slots are filled.
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::RiskConfig;
use crate::filter::FilterVerdict;
use crate::models::Signal;
use crate::risk;
use crate::state::{Claim, PairStateTracker};

/// A signal plus the state claim backing it.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub signal: Signal,
    pub claim:  Claim,
}

/// Ordering of accepted verdicts, best first.
pub fn compare_verdicts(a: &FilterVerdict, b: &FilterVerdict) -> Ordering {
    b.strength_score()
        .total_cmp(&a.strength_score())
        .then_with(|| b.selected.result.r_squared.total_cmp(&a.selected.result.r_squared))
        .then_with(|| a.pair.cmp(&b.pair))
}

/// Rank accepted verdicts, claim state, and build at most `max_positions`
/// signals. Rejected verdicts are ignored.
pub fn rank_and_emit(
    candidates:    Vec<FilterVerdict>,
    max_positions: usize,
    tracker:       &PairStateTracker,
    config:        &RiskConfig,
    now:           DateTime<Utc>,
) -> Vec<Emitted> {
    let mut ranked: Vec<FilterVerdict> = candidates
        .into_iter()
        .filter(|v| v.accepted && v.direction.is_some())
        .collect();
    ranked.sort_by(compare_verdicts);

    let total = ranked.len();
    let mut emitted = Vec::with_capacity(total.min(max_positions));
    for v in ranked {
        if emitted.len() >= max_positions {
            break;
        }
        let Some(direction) = v.direction else { continue };
        let Some(claim) = tracker.try_claim(&v.pair, direction, now) else {
            debug!(pair = %v.pair, "Pair claimed elsewhere, not emitted");
            continue;
        };
        let r = &v.selected.result;
        let entry_price = r.dependent_close;
        let levels = risk::protective_levels(entry_price, direction, config);
        let signal = Signal {
            pair:           v.pair.clone(),
            direction,
            entry_price,
            stop_loss:      levels.stop_loss,
            take_profit:    levels.take_profit,
            z_score:        r.z_score,
            r_squared:      r.r_squared,
            strength_score: v.strength_score(),
            window_length:  r.window_length,
            generated_at:   now,
        };
        info!(
            "📈 {} {} | z={:+.2} R²={:.3} strength={:.3} window={} entry={:.2}",
            signal.direction, signal.pair, signal.z_score, signal.r_squared,
            signal.strength_score, signal.window_length, signal.entry_price
        );
        emitted.push(Emitted { signal, claim });
    }
    if total > emitted.len() {
        debug!(not_emitted = total - emitted.len(), "Accepted pairs left without a slot or claim");
    }
    emitted
}
