//! Ladder State Engine (§4.2).
//!
//! Holds the worker's own view of its resting orders: two fixed-length
//! arrays of slots, one per side, indexed by level. All reads and writes go
//! through one mutex — the engine has no async surface and no I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::warn;

use crate::model::{ContractSide, LadderLevel, LadderReplacement, OrderId, PriceBase, QtyBase};

struct Sides {
    bid: Vec<LadderLevel>,
    ask: Vec<LadderLevel>,
}

impl Sides {
    fn side(&self, side: ContractSide) -> &Vec<LadderLevel> {
        match side {
            ContractSide::Bid => &self.bid,
            ContractSide::Ask => &self.ask,
        }
    }

    fn side_mut(&mut self, side: ContractSide) -> &mut Vec<LadderLevel> {
        match side {
            ContractSide::Bid => &mut self.bid,
            ContractSide::Ask => &mut self.ask,
        }
    }
}

/// The worker's in-memory model of its own resting orders.
pub struct LadderStateEngine {
    sides: Mutex<Sides>,
    out_of_range_logged: AtomicBool,
}

impl LadderStateEngine {
    pub fn new() -> Self {
        Self {
            sides: Mutex::new(Sides { bid: Vec::new(), ask: Vec::new() }),
            out_of_range_logged: AtomicBool::new(false),
        }
    }

    /// Allocates `n` empty slots per side. Safe to call again after `clear_all`
    /// or on a cold start; re-sizes the ladder if `n` changed.
    pub fn initialize(&self, n: usize) {
        let mut guard = self.sides.lock();
        guard.bid = (0..n as u32).map(LadderLevel::empty).collect();
        guard.ask = (0..n as u32).map(LadderLevel::empty).collect();
    }

    pub fn num_levels(&self) -> usize {
        self.sides.lock().bid.len()
    }

    /// Records a resting order at `(side, i)`. An out-of-range index is
    /// dropped rather than panicking; logged once per process lifetime.
    pub fn update_level(
        &self,
        side: ContractSide,
        i: usize,
        order_id: OrderId,
        price: PriceBase,
        qty: QtyBase,
    ) {
        let mut guard = self.sides.lock();
        let len = guard.side(side).len();
        match guard.side_mut(side).get_mut(i) {
            Some(level) => {
                level.current_order_id = Some(order_id);
                level.current_price = price;
                level.current_quantity = qty;
                level.last_updated = SystemTime::now();
            }
            None => self.log_out_of_range(side, i, len),
        }
    }

    /// Clears a slot back to empty. Out-of-range index: see `update_level`.
    pub fn clear_level(&self, side: ContractSide, i: usize) {
        let mut guard = self.sides.lock();
        let len = guard.side(side).len();
        match guard.side_mut(side).get_mut(i) {
            Some(level) => {
                level.current_order_id = None;
                level.current_price = 0;
                level.current_quantity = 0;
                level.last_updated = SystemTime::now();
            }
            None => self.log_out_of_range(side, i, len),
        }
    }

    fn log_out_of_range(&self, side: ContractSide, i: usize, len: usize) {
        if !self.out_of_range_logged.swap(true, Ordering::Relaxed) {
            warn!(
                side = side.as_tag(),
                index = i,
                num_levels = len,
                "ignoring out-of-range ladder level index (logged once)"
            );
        }
    }

    pub fn get_level(&self, side: ContractSide, i: usize) -> Option<LadderLevel> {
        self.sides.lock().side(side).get(i).cloned()
    }

    pub fn all_levels(&self, side: ContractSide) -> Vec<LadderLevel> {
        self.sides.lock().side(side).clone()
    }

    pub fn all_active_order_ids(&self) -> Vec<OrderId> {
        let guard = self.sides.lock();
        guard
            .bid
            .iter()
            .chain(guard.ask.iter())
            .filter_map(|l| l.current_order_id.clone())
            .collect()
    }

    pub fn find_order_level(&self, id: &OrderId) -> Option<(ContractSide, usize)> {
        let guard = self.sides.lock();
        for (side, levels) in [(ContractSide::Bid, &guard.bid), (ContractSide::Ask, &guard.ask)] {
            if let Some(idx) = levels.iter().position(|l| l.current_order_id.as_ref() == Some(id)) {
                return Some((side, idx));
            }
        }
        None
    }

    /// Count of non-empty slots per side, `(bid, ask)`.
    pub fn active_counts(&self) -> (usize, usize) {
        let guard = self.sides.lock();
        (
            guard.bid.iter().filter(|l| !l.is_empty()).count(),
            guard.ask.iter().filter(|l| !l.is_empty()).count(),
        )
    }

    pub fn clear_all(&self) {
        let mut guard = self.sides.lock();
        for level in guard.bid.iter_mut().chain(guard.ask.iter_mut()) {
            level.current_order_id = None;
            level.current_price = 0;
            level.current_quantity = 0;
        }
    }

    /// Diffs the current ladder against a target price/quantity set, one
    /// replacement per slot. `new_quantities` is shared by both sides —
    /// level shape doesn't depend on side.
    pub fn calculate_replacements(
        &self,
        new_bid_prices: &[PriceBase],
        new_ask_prices: &[PriceBase],
        new_quantities: &[QtyBase],
    ) -> Vec<LadderReplacement> {
        let guard = self.sides.lock();
        let mut out = Vec::with_capacity(new_bid_prices.len() + new_ask_prices.len());

        for (i, &price) in new_bid_prices.iter().enumerate() {
            out.push(LadderReplacement {
                side: ContractSide::Bid,
                level_index: i as u32,
                old_order_id: guard.bid.get(i).and_then(|l| l.current_order_id.clone()),
                new_price: price,
                new_quantity: new_quantities.get(i).copied().unwrap_or(0),
            });
        }
        for (i, &price) in new_ask_prices.iter().enumerate() {
            out.push(LadderReplacement {
                side: ContractSide::Ask,
                level_index: i as u32,
                old_order_id: guard.ask.get(i).and_then(|l| l.current_order_id.clone()),
                new_price: price,
                new_quantity: new_quantities.get(i).copied().unwrap_or(0),
            });
        }
        out
    }
}

impl Default for LadderStateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_allocates_empty_slots_both_sides() {
        let engine = LadderStateEngine::new();
        engine.initialize(3);
        assert_eq!(engine.all_levels(ContractSide::Bid).len(), 3);
        assert_eq!(engine.all_levels(ContractSide::Ask).len(), 3);
        assert_eq!(engine.active_counts(), (0, 0));
    }

    #[test]
    fn update_then_clear_round_trips() {
        let engine = LadderStateEngine::new();
        engine.initialize(2);
        engine.update_level(ContractSide::Bid, 0, OrderId("a".into()), 100, 5);
        assert_eq!(engine.active_counts(), (1, 0));
        let level = engine.get_level(ContractSide::Bid, 0).unwrap();
        assert_eq!(level.current_price, 100);
        assert_eq!(level.current_quantity, 5);

        engine.clear_level(ContractSide::Bid, 0);
        assert_eq!(engine.active_counts(), (0, 0));
        assert!(engine.get_level(ContractSide::Bid, 0).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_index_is_ignored_not_panicking() {
        let engine = LadderStateEngine::new();
        engine.initialize(2);
        engine.update_level(ContractSide::Bid, 5, OrderId("x".into()), 1, 1);
        assert_eq!(engine.active_counts(), (0, 0));
    }

    #[test]
    fn find_order_level_locates_by_id() {
        let engine = LadderStateEngine::new();
        engine.initialize(2);
        engine.update_level(ContractSide::Ask, 1, OrderId("o1".into()), 10, 1);
        assert_eq!(
            engine.find_order_level(&OrderId("o1".into())),
            Some((ContractSide::Ask, 1))
        );
        assert_eq!(engine.find_order_level(&OrderId("missing".into())), None);
    }

    #[test]
    fn calculate_replacements_carries_old_order_ids() {
        let engine = LadderStateEngine::new();
        engine.initialize(2);
        engine.update_level(ContractSide::Bid, 0, OrderId("old-bid".into()), 90, 1);

        let plan = engine.calculate_replacements(&[91, 89], &[95, 97], &[2, 2]);
        assert_eq!(plan.len(), 4);
        let bid0 = plan.iter().find(|r| r.side == ContractSide::Bid && r.level_index == 0).unwrap();
        assert_eq!(bid0.old_order_id, Some(OrderId("old-bid".into())));
        let ask0 = plan.iter().find(|r| r.side == ContractSide::Ask && r.level_index == 0).unwrap();
        assert!(ask0.old_order_id.is_none());
    }

    #[test]
    fn all_active_order_ids_spans_both_sides() {
        let engine = LadderStateEngine::new();
        engine.initialize(2);
        engine.update_level(ContractSide::Bid, 0, OrderId("b0".into()), 1, 1);
        engine.update_level(ContractSide::Ask, 1, OrderId("a1".into()), 1, 1);
        let mut ids: Vec<_> = engine.all_active_order_ids().into_iter().map(|o| o.0).collect();
        ids.sort();
        assert_eq!(ids, vec!["a1".to_string(), "b0".to_string()]);
    }
}
