//! Core data model: ladder levels, replacement plans, and account positions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

pub type PriceBase = u64;
pub type QtyBase = u64;

/// An order identifier, externally assigned by the venue and opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractSide {
    Bid,
    Ask,
}

impl ContractSide {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            ContractSide::Bid => "buy",
            ContractSide::Ask => "sell",
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            ContractSide::Bid => "Bid",
            ContractSide::Ask => "Ask",
        }
    }
}

/// One (side, level-index) slot in the ladder.
///
/// Invariant: `current_order_id.is_some()` iff `current_price > 0 && current_quantity > 0`.
#[derive(Debug, Clone)]
pub struct LadderLevel {
    pub level_index: u32,
    pub current_order_id: Option<OrderId>,
    pub current_price: PriceBase,
    pub current_quantity: QtyBase,
    pub last_updated: SystemTime,
}

impl LadderLevel {
    pub fn empty(level_index: u32) -> Self {
        Self {
            level_index,
            current_order_id: None,
            current_price: 0,
            current_quantity: 0,
            last_updated: SystemTime::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current_order_id.is_none()
    }
}

/// Per-level target sizes. `size_for_level` maps a level index to a quantity.
#[derive(Debug, Clone, Copy)]
pub struct LiquidityShape {
    pub size_level_0: QtyBase,
    pub size_level_1_2: QtyBase,
    pub size_level_3_plus: QtyBase,
}

impl LiquidityShape {
    pub fn size_for_level(&self, i: u32) -> QtyBase {
        match i {
            0 => self.size_level_0,
            1 | 2 => self.size_level_1_2,
            _ => self.size_level_3_plus,
        }
    }
}

/// A planned mutation of one ladder slot.
#[derive(Debug, Clone)]
pub struct LadderReplacement {
    pub side: ContractSide,
    pub level_index: u32,
    pub old_order_id: Option<OrderId>,
    pub new_price: PriceBase,
    pub new_quantity: QtyBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone)]
pub struct AccountPosition {
    pub position_id: String,
    pub side: PositionSide,
    pub quantity: QtyBase,
    pub entry_price: PriceBase,
}

#[derive(Debug, Clone)]
pub struct SettlementEntry {
    pub position_id: String,
    pub quantity: QtyBase,
}

/// A quantity-conserving pairing of long and short positions to be netted
/// at the venue. Empty with a `reason` when nothing is settleable.
#[derive(Debug, Clone, Default)]
pub struct SettlementPlan {
    pub entries: Vec<SettlementEntry>,
    pub reason: Option<String>,
}

impl SettlementPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
