//! Settlement Planner (§4.4).
//!
//! Nets matched long and short positions into a quantity-conserving plan.
//! The planner itself is pure — `build_plan` takes no I/O — while `run`
//! drives the round trip against [`AccountApi`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{ApiError, InvariantViolation, VenueLogicalErrorKind};
use crate::interfaces::AccountApi;
use crate::model::{AccountPosition, PositionSide, QtyBase, SettlementEntry, SettlementPlan};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Empty { reason: String },
    Submitted { settlement_id: String },
    SoftFailure(VenueLogicalErrorKind),
}

pub struct SettlementPlanner {
    account: Arc<dyn AccountApi>,
}

impl SettlementPlanner {
    pub fn new(account: Arc<dyn AccountApi>) -> Self {
        Self { account }
    }

    /// Pairs shorts against longs up to `min(sum_longs, sum_shorts)`, walking
    /// each side in its given order and taking `min(remaining, position.qty)`
    /// from each. Raises [`InvariantViolation`] if the two sides' entries
    /// don't carry equal total quantity — this should never happen by
    /// construction, and indicates a bug rather than bad input.
    pub fn build_plan(positions: &[AccountPosition]) -> Result<SettlementPlan, InvariantViolation> {
        let longs: Vec<&AccountPosition> = positions.iter().filter(|p| p.side == PositionSide::Long).collect();
        let shorts: Vec<&AccountPosition> = positions.iter().filter(|p| p.side == PositionSide::Short).collect();

        let sum_longs: u128 = longs.iter().map(|p| p.quantity as u128).sum();
        let sum_shorts: u128 = shorts.iter().map(|p| p.quantity as u128).sum();
        let max_settleable = sum_longs.min(sum_shorts);

        if max_settleable == 0 {
            return Ok(SettlementPlan {
                entries: Vec::new(),
                reason: Some(format!("no settleable (L={sum_longs}, S={sum_shorts})")),
            });
        }

        let short_entries = Self::walk(&shorts, max_settleable);
        let long_entries = Self::walk(&longs, max_settleable);

        let sum_short_entries: u128 = short_entries.iter().map(|e| e.quantity as u128).sum();
        let sum_long_entries: u128 = long_entries.iter().map(|e| e.quantity as u128).sum();
        if sum_short_entries != sum_long_entries {
            return Err(InvariantViolation(format!(
                "settlement plan unbalanced: shorts={sum_short_entries} longs={sum_long_entries}"
            )));
        }

        let mut entries = short_entries;
        entries.extend(long_entries);
        Ok(SettlementPlan { entries, reason: None })
    }

    fn walk(positions: &[&AccountPosition], max_settleable: u128) -> Vec<SettlementEntry> {
        let mut remaining = max_settleable;
        let mut out = Vec::new();
        for p in positions {
            if remaining == 0 {
                break;
            }
            let take = (p.quantity as u128).min(remaining);
            if take == 0 {
                continue;
            }
            out.push(SettlementEntry { position_id: p.position_id.clone(), quantity: take as QtyBase });
            remaining -= take;
        }
        out
    }

    /// Reads the account, builds a plan, and submits it if non-empty.
    pub async fn run(&self, token: &str) -> Result<SettlementOutcome, SettlementError> {
        let account = self.account.get_account(token).await?;
        let positions: Vec<AccountPosition> = account.positions.into_iter().map(Into::into).collect();
        let plan = Self::build_plan(&positions)?;

        if plan.is_empty() {
            let reason = plan.reason.unwrap_or_default();
            info!(reason = %reason, "settlement: nothing to settle");
            return Ok(SettlementOutcome::Empty { reason });
        }

        let idempotency_key = Uuid::new_v4().to_string();
        match self.account.settle(&plan, token, &idempotency_key).await {
            Ok(settlement_id) => {
                info!(settlement_id = %settlement_id, entries = plan.entries.len(), "settlement submitted");
                Ok(SettlementOutcome::Submitted { settlement_id })
            }
            Err(ApiError::Logical(logical)) => {
                warn!(kind = ?logical.kind, "settlement submission reported a soft logical error");
                Ok(SettlementOutcome::SoftFailure(logical.kind))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(id: &str, side: PositionSide, qty: QtyBase) -> AccountPosition {
        AccountPosition { position_id: id.to_string(), side, quantity: qty, entry_price: 0 }
    }

    #[test]
    fn s5_equal_book_settles_everything() {
        let positions = vec![
            pos("long-1", PositionSide::Long, 10),
            pos("short-1", PositionSide::Short, 10),
        ];
        let plan = SettlementPlanner::build_plan(&positions).unwrap();
        assert!(!plan.is_empty());
        let total: u64 = plan.entries.iter().map(|e| e.quantity).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn s6_imbalanced_book_settles_only_the_matched_portion() {
        let positions = vec![
            pos("long-1", PositionSide::Long, 30),
            pos("short-1", PositionSide::Short, 10),
            pos("short-2", PositionSide::Short, 5),
        ];
        let plan = SettlementPlanner::build_plan(&positions).unwrap();
        let short_total: u64 = plan
            .entries
            .iter()
            .filter(|e| e.position_id.starts_with("short"))
            .map(|e| e.quantity)
            .sum();
        let long_total: u64 = plan
            .entries
            .iter()
            .filter(|e| e.position_id.starts_with("long"))
            .map(|e| e.quantity)
            .sum();
        assert_eq!(short_total, 15);
        assert_eq!(long_total, 15);
    }

    #[test]
    fn no_opposing_side_settles_nothing() {
        let positions = vec![pos("long-1", PositionSide::Long, 10)];
        let plan = SettlementPlanner::build_plan(&positions).unwrap();
        assert!(plan.is_empty());
        assert!(plan.reason.is_some());
    }

    #[test]
    fn quantity_is_always_conserved_across_entries() {
        let positions = vec![
            pos("long-1", PositionSide::Long, 7),
            pos("long-2", PositionSide::Long, 3),
            pos("short-1", PositionSide::Short, 4),
            pos("short-2", PositionSide::Short, 4),
            pos("short-3", PositionSide::Short, 4),
        ];
        let plan = SettlementPlanner::build_plan(&positions).unwrap();
        let short_total: u64 = plan.entries.iter().filter(|e| e.position_id.starts_with("short")).map(|e| e.quantity).sum();
        let long_total: u64 = plan.entries.iter().filter(|e| e.position_id.starts_with("long")).map(|e| e.quantity).sum();
        assert_eq!(short_total, long_total);
        assert_eq!(short_total, 10);
    }
}
