/// state.rs — Per-pair cooldown and position bookkeeping
///
/// The only mutable state shared across cycles. Readers (pair workers calling
/// `may_signal`) take the read lock concurrently; claims, links and closes
/// take the write lock. Keys are ordered pairs: (A,B) and (B,A) cool down
/// independently.
use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::models::{Direction, PairCandidate};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairState {
    pub pair:                  PairCandidate,
    pub last_signal_timestamp: Option<DateTime<Utc>>,
    pub last_signal_direction: Option<Direction>,
    pub cooldown_until:        Option<DateTime<Utc>>,
    pub linked_position_id:    Option<String>,
}

impl PairState {
    fn fresh(pair: &PairCandidate) -> Self {
        Self {
            pair:                  pair.clone(),
            last_signal_timestamp: None,
            last_signal_direction: None,
            cooldown_until:        None,
            linked_position_id:    None,
        }
    }

    fn allows_signal(&self, now: DateTime<Utc>) -> bool {
        if self.linked_position_id.is_some() {
            return false;
        }
        match self.cooldown_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Proof of a successful [`PairStateTracker::try_claim`], carrying the state
/// to roll back to.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub pair: PairCandidate,
    prior:    Option<PairState>,
}

impl Claim {
    pub fn prior(&self) -> Option<&PairState> {
        self.prior.as_ref()
    }
}

pub struct PairStateTracker {
    cooldown: Duration,
    states:   RwLock<AHashMap<PairCandidate, PairState>>,
}

impl PairStateTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            states: RwLock::new(AHashMap::new()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// False while the pair is cooling down or holds a linked position.
    /// Direction does not shorten the cooldown.
    pub fn may_signal(&self, pair: &PairCandidate, _direction: Direction, now: DateTime<Utc>) -> bool {
        self.states
            .read()
            .get(pair)
            .map_or(true, |s| s.allows_signal(now))
    }

    /// Stamp a signal unconditionally and start the cooldown.
    /// Returns the state before the update, for [`restore`](Self::restore).
    pub fn record_signal(&self, pair: &PairCandidate, direction: Direction, now: DateTime<Utc>) -> Option<PairState> {
        let mut states = self.states.write();
        let prior = states.get(pair).cloned();
        let entry = states.entry(pair.clone()).or_insert_with(|| PairState::fresh(pair));
        entry.last_signal_timestamp = Some(now);
        entry.last_signal_direction = Some(direction);
        entry.cooldown_until = Some(now + self.cooldown);
        prior
    }

    /// `may_signal` + `record_signal` under one write lock.
    /// `None` when the pair is not eligible.
    pub fn try_claim(&self, pair: &PairCandidate, direction: Direction, now: DateTime<Utc>) -> Option<Claim> {
        let mut states = self.states.write();
        let prior = states.get(pair).cloned();
        if prior.as_ref().is_some_and(|s| !s.allows_signal(now)) {
            return None;
        }
        let entry = states.entry(pair.clone()).or_insert_with(|| PairState::fresh(pair));
        entry.last_signal_timestamp = Some(now);
        entry.last_signal_direction = Some(direction);
        entry.cooldown_until = Some(now + self.cooldown);
        Some(Claim { pair: pair.clone(), prior })
    }

    /// Undo a claim whose order never reached the broker.
    pub fn release(&self, claim: Claim) {
        self.restore(&claim.pair, claim.prior);
    }

    /// Roll a pair back to the state returned by a claim.
    pub fn restore(&self, pair: &PairCandidate, prior: Option<PairState>) {
        let mut states = self.states.write();
        match prior {
            Some(s) => {
                states.insert(pair.clone(), s);
            }
            None => {
                states.remove(pair);
            }
        }
        debug!(pair = %pair, "Pair state rolled back");
    }

    /// Attach the broker position opened for the pair's last signal.
    pub fn link_position(&self, pair: &PairCandidate, position_id: impl Into<String>) {
        let mut states = self.states.write();
        let entry = states.entry(pair.clone()).or_insert_with(|| PairState::fresh(pair));
        entry.linked_position_id = Some(position_id.into());
    }

    /// The position was closed; the cooldown keeps running.
    pub fn record_close(&self, pair: &PairCandidate) {
        if let Some(s) = self.states.write().get_mut(pair) {
            s.linked_position_id = None;
        }
    }

    pub fn linked_position(&self, pair: &PairCandidate) -> Option<String> {
        self.states.read().get(pair).and_then(|s| s.linked_position_id.clone())
    }

    pub fn open_position_count(&self) -> usize {
        self.states
            .read()
            .values()
            .filter(|s| s.linked_position_id.is_some())
            .count()
    }

    /// Close every pair whose linked position is no longer open at the broker.
    /// Returns the pairs closed, sorted.
    pub fn reconcile<'a>(&self, open_ids: impl IntoIterator<Item = &'a str>) -> Vec<PairCandidate> {
        let open: ahash::AHashSet<&str> = open_ids.into_iter().collect();
        let mut closed = Vec::new();
        for s in self.states.write().values_mut() {
            let gone = matches!(&s.linked_position_id, Some(id) if !open.contains(id.as_str()));
            if gone {
                s.linked_position_id = None;
                closed.push(s.pair.clone());
            }
        }
        closed.sort();
        if !closed.is_empty() {
            info!("Reconciled {} pair(s) whose positions closed at the broker", closed.len());
        }
        closed
    }

    /// Copy of every tracked pair, sorted by pair.
    pub fn snapshot(&self) -> Vec<PairState> {
        let mut out: Vec<PairState> = self.states.read().values().cloned().collect();
        out.sort_by(|a, b| a.pair.cmp(&b.pair));
        out
    }

    pub fn reset(&self) {
        self.states.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::testutil::ts;

    fn pair(a: &str, b: &str) -> PairCandidate {
        PairCandidate::new(a, b).unwrap()
    }

    fn tracker() -> PairStateTracker {
        PairStateTracker::new(Duration::seconds(300))
    }

    #[test]
    fn cooldown_blocks_both_directions_until_expiry() {
        let t = tracker();
        let p = pair("PETR4", "PETR3");
        let now = ts(0);

        assert!(t.may_signal(&p, Direction::Long, now));
        t.record_signal(&p, Direction::Long, now);

        let later = now + Duration::seconds(120);
        assert!(!t.may_signal(&p, Direction::Long, later));
        assert!(!t.may_signal(&p, Direction::Short, later));
        assert!(t.may_signal(&p, Direction::Short, now + Duration::seconds(300)));
    }

    #[test]
    fn reversed_pair_is_an_independent_key() {
        let t = tracker();
        t.record_signal(&pair("PETR4", "PETR3"), Direction::Short, ts(0));
        assert!(t.may_signal(&pair("PETR3", "PETR4"), Direction::Short, ts(1)));
    }

    #[test]
    fn linked_position_blocks_until_closed() {
        let t = tracker();
        let p = pair("VALE3", "BBAS3");
        t.record_signal(&p, Direction::Long, ts(0));
        t.link_position(&p, "42");
        assert_eq!(t.open_position_count(), 1);

        let after_cooldown = ts(0) + Duration::seconds(600);
        assert!(!t.may_signal(&p, Direction::Long, after_cooldown));

        t.record_close(&p);
        assert!(t.may_signal(&p, Direction::Long, after_cooldown));
        assert_eq!(t.open_position_count(), 0);
    }

    #[test]
    fn try_claim_then_restore_rolls_back() {
        let t = tracker();
        let p = pair("ITUB4", "BBDC4");

        let claim = t.try_claim(&p, Direction::Short, ts(0)).unwrap();
        assert!(claim.prior().is_none());
        assert!(t.try_claim(&p, Direction::Short, ts(1)).is_none());

        t.release(claim);
        assert!(t.snapshot().is_empty());
        assert!(t.may_signal(&p, Direction::Short, ts(1)));
    }

    #[test]
    fn restore_reinstates_previous_cooldown() {
        let t = tracker();
        let p = pair("ITUB4", "BBDC4");
        t.record_signal(&p, Direction::Long, ts(0));
        let first = t.snapshot()[0].clone();

        let retry_at = ts(0) + Duration::seconds(400);
        let claim = t.try_claim(&p, Direction::Short, retry_at).unwrap();
        assert_eq!(claim.prior(), Some(&first));
        t.release(claim);
        assert_eq!(t.snapshot()[0], first);
    }

    #[test]
    fn reconcile_closes_missing_positions() {
        let t = tracker();
        let a = pair("PETR4", "PETR3");
        let b = pair("VALE3", "ABEV3");
        t.link_position(&a, "1");
        t.link_position(&b, "2");

        let closed = t.reconcile(["2"]);
        assert_eq!(closed, vec![a.clone()]);
        assert_eq!(t.linked_position(&a), None);
        assert_eq!(t.linked_position(&b).as_deref(), Some("2"));
    }

    #[test]
    fn concurrent_claims_grant_exactly_one() {
        let t = Arc::new(tracker());
        let p = pair("SANB11", "ITUB4");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                let p = p.clone();
                std::thread::spawn(move || t.try_claim(&p, Direction::Long, ts(0)).is_some())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(granted, 1);
    }
}
