//! Replacement Executor (§4.3).
//!
//! Applies a ladder replacement plan to the venue: cancels stale orders,
//! submits fresh ones, and — when enabled — runs self-trade-prevention
//! peeling ahead of a replacement that would cross the worker's own book.
//! One `strategy_lock` semaphore serializes whole replacement cycles so a
//! slow cycle can't overlap a faster one and race the ladder state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::LadderStateEngine;
use crate::errors::ApiError;
use crate::interfaces::OrderApi;
use crate::metrics::LadderMetrics;
use crate::model::{ContractSide, LadderReplacement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateBehavior {
    /// Cancel, then submit. Opens a liquidity gap between the two steps.
    Sequential,
    /// Submit, then cancel after a configurable delay. No liquidity gap, but
    /// briefly doubles margin usage on the replaced slots.
    Atomic,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub behavior: UpdateBehavior,
    pub atomic_replacement_delay: Duration,
    pub enable_stp: bool,
    pub sequential_peel_delay: Duration,
    pub cancel_retry_delay: Duration,
    pub margin_factor_ppm: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub submitted: usize,
    pub submit_failed: usize,
    pub cancelled: usize,
    pub cancel_failed: usize,
}

impl BatchOutcome {
    fn merge(&mut self, other: BatchOutcome) {
        self.submitted += other.submitted;
        self.submit_failed += other.submit_failed;
        self.cancelled += other.cancelled;
        self.cancel_failed += other.cancel_failed;
    }
}

pub struct ReplacementExecutor {
    api: Arc<dyn OrderApi>,
    engine: Arc<LadderStateEngine>,
    config: ExecutorConfig,
    metrics: Arc<LadderMetrics>,
    strategy_lock: Semaphore,
    tag: AtomicU64,
}

impl ReplacementExecutor {
    pub fn new(
        api: Arc<dyn OrderApi>,
        engine: Arc<LadderStateEngine>,
        config: ExecutorConfig,
        metrics: Arc<LadderMetrics>,
    ) -> Self {
        Self {
            api,
            engine,
            config,
            metrics,
            strategy_lock: Semaphore::new(1),
            tag: AtomicU64::new(0),
        }
    }

    fn client_order_id(&self, side: ContractSide, level_index: u32) -> String {
        let tag = self.tag.fetch_add(1, Ordering::Relaxed);
        format!("MM-{}-L{}-{}", side.as_tag(), level_index, tag)
    }

    /// Applies `plan` under the strategy lock. Blocks until any in-flight
    /// replacement cycle finishes, so the ladder never sees two pipelines
    /// racing each other.
    #[instrument(skip(self, plan, cancel), fields(slots = plan.len()))]
    pub async fn apply(
        &self,
        plan: Vec<LadderReplacement>,
        token: &str,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let _permit = match self.strategy_lock.acquire().await {
            Ok(permit) => permit,
            Err(_) => return BatchOutcome::default(),
        };

        if cancel.is_cancelled() {
            debug!("replacement cycle cancelled before start");
            return BatchOutcome::default();
        }

        if self.config.enable_stp {
            self.apply_with_stp(plan, token, cancel).await
        } else {
            match self.config.behavior {
                UpdateBehavior::Sequential => self.apply_sequential(plan, token, cancel).await,
                UpdateBehavior::Atomic => self.apply_atomic(plan, token, cancel).await,
            }
        }
    }

    /// Best-effort cancel of every order the ladder currently believes is
    /// live, bypassing the strategy lock. Used during shutdown (§4.5).
    pub async fn emergency_cancel_all(&self, token: &str) {
        let ids = self.engine.all_active_order_ids();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "emergency stop: cancelling all known orders");
        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let api = self.api.clone();
                let token = token.to_string();
                tokio::spawn(async move {
                    let _ = api.cancel(&id, &token, CancellationToken::new()).await;
                })
            })
            .collect();
        let _ = join_all(handles).await;
    }

    async fn apply_sequential(
        &self,
        plan: Vec<LadderReplacement>,
        token: &str,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let to_cancel: Vec<_> = plan.iter().filter(|r| r.old_order_id.is_some()).cloned().collect();
        outcome.merge(self.cancel_batch(&to_cancel, token, cancel.clone(), true).await);
        outcome.merge(self.submit_batch(&plan, token, cancel).await);
        outcome
    }

    async fn apply_atomic(
        &self,
        plan: Vec<LadderReplacement>,
        token: &str,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        outcome.merge(self.submit_batch(&plan, token, cancel.clone()).await);

        tokio::select! {
            _ = tokio::time::sleep(self.config.atomic_replacement_delay) => {}
            _ = cancel.cancelled() => {
                debug!("atomic replacement delay interrupted by shutdown; skipping old-order cancel");
                return outcome;
            }
        }

        // The submit phase above already overwrote these slots with the new
        // order (§4.3.2 step 1); a successful cancel of the old order must
        // not clear the slot out from under it.
        let to_cancel: Vec<_> = plan.iter().filter(|r| r.old_order_id.is_some()).cloned().collect();
        outcome.merge(self.cancel_batch(&to_cancel, token, cancel, false).await);
        outcome
    }

    /// Self-trade-prevention decision (§4.3.3): a side that would cross the
    /// opposing side's resting book is peeled (cancel, pause, submit, pause)
    /// level-by-level before any atomic replacement happens.
    async fn apply_with_stp(
        &self,
        plan: Vec<LadderReplacement>,
        token: &str,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let bids: Vec<_> = plan.iter().filter(|r| r.side == ContractSide::Bid).cloned().collect();
        let asks: Vec<_> = plan.iter().filter(|r| r.side == ContractSide::Ask).cloned().collect();

        let best_new_bid = bids.iter().map(|r| r.new_price).max();
        let best_new_ask = asks.iter().map(|r| r.new_price).min();

        let current_bids = self.engine.all_levels(ContractSide::Bid);
        let current_asks = self.engine.all_levels(ContractSide::Ask);

        let bids_cross = best_new_bid
            .is_some_and(|b| current_asks.iter().any(|l| !l.is_empty() && b >= l.current_price));
        let asks_cross = best_new_ask
            .is_some_and(|a| current_bids.iter().any(|l| !l.is_empty() && a <= l.current_price));

        if !bids_cross && !asks_cross {
            return self.apply_atomic(plan, token, cancel).await;
        }

        let mut outcome = BatchOutcome::default();

        if bids_cross {
            info!("self-trade prevention: peeling asks before replacing bids");
            self.metrics.stp_triggers_total.with_label_values(&["ask"]).inc();
            outcome.merge(self.peel_side(&asks, token, cancel.clone()).await);
        }
        if asks_cross {
            info!("self-trade prevention: peeling bids before replacing asks");
            self.metrics.stp_triggers_total.with_label_values(&["bid"]).inc();
            outcome.merge(self.peel_side(&bids, token, cancel.clone()).await);
        }

        // When only one side crosses, the other side still needs its atomic
        // replacement; when both cross, both sides were just peeled and
        // there is nothing left to atomically replace.
        let remaining = match (bids_cross, asks_cross) {
            (true, false) => bids,
            (false, true) => asks,
            _ => Vec::new(),
        };

        if !remaining.is_empty() {
            outcome.merge(self.apply_atomic(remaining, token, cancel).await);
        }
        outcome
    }

    /// Cancels, pauses, submits, pauses — one level group at a time, inside
    /// out (lowest level index first, closest to the mid).
    async fn peel_side(
        &self,
        replacements: &[LadderReplacement],
        token: &str,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut by_level: BTreeMap<u32, Vec<LadderReplacement>> = BTreeMap::new();
        for r in replacements {
            by_level.entry(r.level_index).or_default().push(r.clone());
        }

        for (_, group) in by_level {
            if cancel.is_cancelled() {
                break;
            }
            let to_cancel: Vec<_> = group.iter().filter(|r| r.old_order_id.is_some()).cloned().collect();
            outcome.merge(self.cancel_batch(&to_cancel, token, cancel.clone(), true).await);

            tokio::select! {
                _ = tokio::time::sleep(self.config.sequential_peel_delay) => {}
                _ = cancel.cancelled() => break,
            }

            outcome.merge(self.submit_batch(&group, token, cancel.clone()).await);

            tokio::select! {
                _ = tokio::time::sleep(self.config.sequential_peel_delay) => {}
                _ = cancel.cancelled() => break,
            }
        }
        outcome
    }

    /// Submits every entry in `batch` as an independent task. A submit
    /// failure is isolated to its own slot — it never aborts its siblings.
    async fn submit_batch(
        &self,
        batch: &[LadderReplacement],
        token: &str,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut handles = Vec::with_capacity(batch.len());
        for r in batch {
            let api = self.api.clone();
            let token = token.to_string();
            let cancel = cancel.clone();
            let margin_factor_ppm = self.config.margin_factor_ppm;
            let client_order_id = self.client_order_id(r.side, r.level_index);
            let r = r.clone();
            handles.push(tokio::spawn(async move {
                let result = api
                    .submit_limit(r.side, r.new_price, r.new_quantity, margin_factor_ppm, &client_order_id, &token, cancel)
                    .await;
                (r, result)
            }));
        }

        for joined in join_all(handles).await {
            let Ok((r, result)) = joined else { continue };
            match result {
                Ok(submit) => {
                    self.engine.update_level(r.side, r.level_index as usize, submit.order_id, r.new_price, r.new_quantity);
                    outcome.submitted += 1;
                }
                Err(ApiError::Cancelled) => {
                    debug!(side = r.side.as_tag(), level = r.level_index, "submit cancelled");
                }
                Err(err) => {
                    warn!(side = r.side.as_tag(), level = r.level_index, error = %err, "submit failed; slot left empty for next cycle to retry");
                    outcome.submit_failed += 1;
                }
            }
        }
        outcome
    }

    /// Cancels every entry in `batch` with `old_order_id`, retrying failures
    /// once after `cancel_retry_delay` (§4.3.4). A logical error that is
    /// benign on cancel is only folded into success on that retry — this
    /// matches the documented seed scenario for cancel-retry bookkeeping.
    async fn cancel_batch(
        &self,
        batch: &[LadderReplacement],
        token: &str,
        cancel: CancellationToken,
        clear_on_success: bool,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let failures = self.cancel_once(batch, token, cancel.clone(), clear_on_success, false, &mut outcome).await;

        if failures.is_empty() || cancel.is_cancelled() {
            return outcome;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.config.cancel_retry_delay) => {}
            _ = cancel.cancelled() => return outcome,
        }

        let retried = failures.len();
        let still_failing = self.cancel_once(&failures, token, cancel, clear_on_success, true, &mut outcome).await;
        let recovered = retried - still_failing.len();
        if recovered > 0 {
            self.metrics.cancel_retries_total.with_label_values(&["recovered"]).inc_by(recovered as u64);
        }
        if !still_failing.is_empty() {
            self.metrics.cancel_retries_total.with_label_values(&["still_failed"]).inc_by(still_failing.len() as u64);
        }
        for r in &still_failing {
            warn!(
                side = r.side.as_tag(),
                level = r.level_index,
                "cancel failed after retry; order may remain live at venue (non-fatal)"
            );
        }
        outcome
    }

    async fn cancel_once(
        &self,
        batch: &[LadderReplacement],
        token: &str,
        cancel: CancellationToken,
        clear_on_success: bool,
        is_retry: bool,
        outcome: &mut BatchOutcome,
    ) -> Vec<LadderReplacement> {
        let mut handles = Vec::with_capacity(batch.len());
        for r in batch {
            let Some(old_id) = r.old_order_id.clone() else { continue };
            let api = self.api.clone();
            let token = token.to_string();
            let cancel = cancel.clone();
            let r = r.clone();
            handles.push(tokio::spawn(async move {
                let result = api.cancel(&old_id, &token, cancel).await;
                (r, result)
            }));
        }

        let mut failures = Vec::new();
        for joined in join_all(handles).await {
            let Ok((r, result)) = joined else { continue };
            match result {
                Ok(_) => {
                    if clear_on_success {
                        self.engine.clear_level(r.side, r.level_index as usize);
                    }
                    outcome.cancelled += 1;
                }
                Err(ApiError::Logical(logical)) if is_retry && logical.is_benign_on_cancel() => {
                    debug!(side = r.side.as_tag(), level = r.level_index, kind = ?logical.kind, "cancel target already gone at venue; treated as success");
                    if clear_on_success {
                        self.engine.clear_level(r.side, r.level_index as usize);
                    }
                    outcome.cancelled += 1;
                }
                Err(ApiError::Cancelled) => {
                    debug!(side = r.side.as_tag(), level = r.level_index, "cancel cancelled");
                }
                Err(_) => {
                    outcome.cancel_failed += 1;
                    failures.push(r);
                }
            }
        }
        failures
    }
}
