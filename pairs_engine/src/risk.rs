/// risk.rs — Protective levels and order sizing
///
/// ─────────────────────────────────────────────────────────────────────────
/// LEVELS (percentage offsets from entry, direction aware)
/// ─────────────────────────────────────────────────────────────────────────
///   LONG:   stop = entry · (1 − sl%)     target = entry · (1 + tp%)
///   SHORT:  stop = entry · (1 + sl%)     target = entry · (1 − tp%)
///
///   Levels are quoted on the dependent leg, the one the order is sent for.
/// ─────────────────────────────────────────────────────────────────────────
use serde::Serialize;

use crate::config::RiskConfig;
use crate::models::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProtectiveLevels {
    pub stop_loss:   f64,
    pub take_profit: f64,
}

pub fn protective_levels(entry_price: f64, direction: Direction, config: &RiskConfig) -> ProtectiveLevels {
    let s = direction.sign();
    ProtectiveLevels {
        stop_loss:   entry_price * (1.0 - s * config.stop_loss_pct),
        take_profit: entry_price * (1.0 + s * config.take_profit_pct),
    }
}

/// Fixed volume per order.
pub fn order_volume(config: &RiskConfig) -> f64 {
    config.order_volume
}

/// Slots left under the position cap.
pub fn remaining_slots(config: &RiskConfig, open_positions: usize) -> usize {
    config.max_concurrent_positions.saturating_sub(open_positions)
}
