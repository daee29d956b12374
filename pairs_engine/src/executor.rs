/// executor.rs — Order dispatch and the paper broker
///
/// SignalDispatcher turns emitted signals into `OrderRequest`s. State only
/// advances to a linked position on a confirmed submission; a rejection
/// releases the pair's claim so the setup can be retried next cycle.
///
/// PaperOrderPort is an in-memory `OrderExecutionPort` that fills every
/// order immediately (or rejects configured pairs) and keeps an account
/// ledger for snapshots.
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info};

use crate::config::RiskConfig;
use crate::error::OrderSubmissionFailure;
use crate::models::{AccountSnapshot, OpenPosition, Signal};
use crate::ports::{OrderExecutionPort, OrderId, OrderRequest};
use crate::risk;
use crate::state::{Claim, PairStateTracker};

// ── Dispatcher ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSummary {
    /// (pair name, order id)
    pub submitted: Vec<(String, OrderId)>,
    /// (pair name, reason)
    pub rejected:  Vec<(String, String)>,
}

pub struct SignalDispatcher {
    port:    Arc<dyn OrderExecutionPort>,
    tracker: Arc<PairStateTracker>,
    risk:    RiskConfig,
}

impl SignalDispatcher {
    pub fn new(port: Arc<dyn OrderExecutionPort>, tracker: Arc<PairStateTracker>, risk: RiskConfig) -> Self {
        Self { port, tracker, risk }
    }

    pub fn order_for(&self, signal: &Signal) -> OrderRequest {
        OrderRequest {
            pair:        signal.pair.clone(),
            direction:   signal.direction,
            volume:      risk::order_volume(&self.risk),
            stop_loss:   signal.stop_loss,
            take_profit: signal.take_profit,
        }
    }

    /// Submit each signal in rank order. `claims` pairs with `signals` by index.
    pub async fn dispatch(&self, signals: &[Signal], claims: Vec<Claim>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for (signal, claim) in signals.iter().zip(claims) {
            let order = self.order_for(signal);
            match self.port.submit_order(&order).await {
                Ok(id) => {
                    info!(
                        "✔ Order {} placed: {} {} vol={} SL={:.2} TP={:.2}",
                        id, order.direction, order.pair, order.volume, order.stop_loss, order.take_profit
                    );
                    self.tracker.link_position(&signal.pair, id.clone());
                    summary.submitted.push((signal.pair.name(), id));
                }
                Err(e) => {
                    error!("✘ Order failed: {e}; cooldown rolled back for {}", signal.pair);
                    self.tracker.release(claim);
                    summary.rejected.push((signal.pair.name(), e.reason));
                }
            }
        }
        summary
    }
}

// ── Paper broker ──────────────────────────────────────────────────────────

pub struct PaperOrderPort {
    balance:   f64,
    next_id:   AtomicU64,
    positions: Mutex<Vec<OpenPosition>>,
    orders:    Mutex<Vec<OrderRequest>>,
    rejecting: RwLock<BTreeSet<String>>,
}

impl PaperOrderPort {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            next_id:   AtomicU64::new(1),
            positions: Mutex::new(Vec::new()),
            orders:    Mutex::new(Vec::new()),
            rejecting: RwLock::new(BTreeSet::new()),
        }
    }

    /// Reject every order for `pair_name` ("DEP/INDEP") until cleared.
    pub fn reject_pair(&self, pair_name: impl Into<String>) {
        self.rejecting.write().insert(pair_name.into());
    }

    pub fn clear_rejections(&self) {
        self.rejecting.write().clear();
    }

    /// Close a position; false if it was not open.
    pub fn close_position(&self, position_id: &str) -> bool {
        let mut positions = self.positions.lock();
        let before = positions.len();
        positions.retain(|p| p.position_id != position_id);
        positions.len() != before
    }

    /// Orders accepted so far, in submission order.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            balance:        self.balance,
            equity:         self.balance,
            open_positions: self.positions.lock().clone(),
        }
    }
}

#[async_trait]
impl OrderExecutionPort for PaperOrderPort {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderId, OrderSubmissionFailure> {
        let name = order.pair.name();
        if self.rejecting.read().contains(&name) {
            return Err(OrderSubmissionFailure {
                pair:   name,
                reason: "rejected by paper broker".into(),
            });
        }
        if !(order.volume > 0.0) {
            return Err(OrderSubmissionFailure {
                pair:   name,
                reason: format!("invalid volume {}", order.volume),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.positions.lock().push(OpenPosition {
            position_id: id.clone(),
            symbol:      order.pair.dependent.clone(),
            volume:      order.volume * order.direction.sign(),
        });
        self.orders.lock().push(order.clone());
        Ok(id)
    }
}
