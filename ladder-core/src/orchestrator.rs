//! Orchestrator (§4.5).
//!
//! Wires a `PriceSource`, `OrderApi`, `AccountApi`, and `AuthApi` into the
//! three core subsystems and drives the process-lifetime sequencing:
//! startup validation, the price-event loop, background token refresh, and
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::TokenManager;
use crate::config::{UpdateBehaviorConfig, WorkerConfig};
use crate::engine::LadderStateEngine;
use crate::errors::ConfigError;
use crate::executor::{ExecutorConfig, ReplacementExecutor, UpdateBehavior};
use crate::fixed_point;
use crate::interfaces::{AccountApi, AuthApi, IndexPriceTick, OrderApi, PriceSource};
use crate::metrics::LadderMetrics;
use crate::model::QtyBase;
use crate::settlement::{SettlementOutcome, SettlementPlanner};

/// Failures that abort the process (§7: only `ConfigError` and
/// `InvariantViolation` are fatal; the latter surfaces as a panic from
/// within [`SettlementPlanner`], not through this type).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("fatal startup failure: {0}")]
    Startup(String),
}

pub struct Orchestrator {
    config: WorkerConfig,
    engine: Arc<LadderStateEngine>,
    executor: Arc<ReplacementExecutor>,
    settlement: SettlementPlanner,
    price_source: Arc<dyn PriceSource>,
    account: Arc<dyn AccountApi>,
    tokens: Arc<TokenManager>,
    metrics: Arc<LadderMetrics>,
}

impl Orchestrator {
    pub fn new(
        config: WorkerConfig,
        price_source: Arc<dyn PriceSource>,
        order_api: Arc<dyn OrderApi>,
        account_api: Arc<dyn AccountApi>,
        auth_api: Arc<dyn AuthApi>,
        metrics: Arc<LadderMetrics>,
    ) -> Self {
        let engine = Arc::new(LadderStateEngine::new());

        let behavior = match config.update_behavior {
            UpdateBehaviorConfig::Sequential => UpdateBehavior::Sequential,
            UpdateBehaviorConfig::Atomic => UpdateBehavior::Atomic,
        };
        let executor_config = ExecutorConfig {
            behavior,
            atomic_replacement_delay: Duration::from_millis(config.atomic_replacement_delay_ms),
            enable_stp: config.enable_self_trade_prevention,
            sequential_peel_delay: Duration::from_millis(config.sequential_peel_delay_ms),
            cancel_retry_delay: Duration::from_millis(50),
            margin_factor_ppm: config.margin_factor_ppm(),
        };
        let executor = Arc::new(ReplacementExecutor::new(order_api, engine.clone(), executor_config, metrics.clone()));
        let settlement = SettlementPlanner::new(account_api.clone());
        let tokens = Arc::new(TokenManager::new(auth_api));

        Self { config, engine, executor, settlement, price_source, account: account_api, tokens, metrics }
    }

    /// Runs until `shutdown` fires or the price stream closes on its own.
    /// Startup validation failures return `Err` and the binary should exit
    /// non-zero without ever subscribing to prices (§4.5 step 1).
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        let token = self
            .tokens
            .get_token()
            .await
            .map_err(|e| OrchestratorError::Startup(format!("initial authentication failed: {e}")))?;

        let market = self
            .account
            .get_market_info(&token)
            .await
            .map_err(|e| OrchestratorError::Startup(format!("failed to fetch market info: {e}")))?;
        self.config.check_decimals(market.trading_decimals, market.settlement_decimals)?;

        info!(
            account_id = %self.config.account_id,
            num_levels = self.config.num_levels,
            base_spread_usd = %self.config.base_spread_usd,
            level_spacing_usd = %self.config.level_spacing_usd,
            update_behavior = ?self.config.update_behavior,
            enable_stp = self.config.enable_self_trade_prevention,
            level_0_quantity = self.config.level_0_quantity,
            levels_1_to_2_quantity = self.config.levels_1_to_2_quantity,
            levels_3_plus_quantity = self.config.levels_3_plus_quantity,
            "starting ladder market maker"
        );

        self.engine.initialize(self.config.num_levels as usize);

        if self.config.settle_on_startup {
            self.run_settlement(&token).await;
        }

        let refresh_handle = tokio::spawn(self.clone().token_refresh_loop(shutdown.clone()));

        let mut rx: mpsc::Receiver<IndexPriceTick> = self
            .price_source
            .subscribe(
                &self.config.redis_index_key,
                Duration::from_millis(self.config.redis_poll_interval_ms),
                shutdown.clone(),
            )
            .await
            .map_err(|e| OrchestratorError::Startup(format!("failed to subscribe to price source: {e}")))?;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown signal received; leaving the price loop");
                    break;
                }
                maybe_tick = rx.recv() => {
                    match maybe_tick {
                        Some(tick) => self.handle_price_tick(tick, shutdown.clone()).await,
                        None => {
                            warn!("price source stream closed unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown_sequence().await;
        refresh_handle.abort();
        Ok(())
    }

    /// One replacement cycle (§4.5 step 3): compute target prices/quantities,
    /// diff against the engine, and apply the plan. Ticks are processed one
    /// at a time off a single channel, so there is never more than one cycle
    /// in flight — the executor's own `strategy_lock` is defense in depth,
    /// not the only thing preventing interleaving.
    #[instrument(skip(self, shutdown), fields(price = %tick.price))]
    async fn handle_price_tick(&self, tick: IndexPriceTick, shutdown: CancellationToken) {
        let token = match self.tokens.get_token().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "could not obtain a token for this replacement cycle; skipping tick");
                return;
            }
        };

        let trading_decimals = self.config.trading_decimals;
        let mid_base = match fixed_point::to_base(tick.price, trading_decimals) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "index price tick was negative; ignoring");
                return;
            }
        };

        let n = self.config.num_levels as usize;
        let shape = self.config.liquidity_shape();
        let bids = fixed_point::bid_levels_usd(mid_base, self.config.base_spread_usd, self.config.level_spacing_usd, n, trading_decimals);
        let asks = fixed_point::ask_levels_usd(mid_base, self.config.base_spread_usd, self.config.level_spacing_usd, n, trading_decimals);
        let quantities: Vec<QtyBase> = (0..n as u32).map(|i| shape.size_for_level(i)).collect();

        let plan = self.engine.calculate_replacements(&bids, &asks, &quantities);
        debug!(slots = plan.len(), "computed replacement plan for new index price");

        let timer = self.metrics.replacement_cycle_seconds.start_timer();
        let outcome = self.executor.apply(plan, &token, shutdown).await;
        timer.observe_duration();

        self.metrics.submits_total.with_label_values(&["success"]).inc_by(outcome.submitted as u64);
        self.metrics.submits_total.with_label_values(&["failed"]).inc_by(outcome.submit_failed as u64);
        self.metrics.cancels_total.with_label_values(&["success"]).inc_by(outcome.cancelled as u64);
        self.metrics.cancels_total.with_label_values(&["failed"]).inc_by(outcome.cancel_failed as u64);
        self.metrics.price_ticks_total.inc();

        let (bid_count, ask_count) = self.engine.active_counts();
        self.metrics.set_live_orders(bid_count as i64, ask_count as i64);
    }

    /// Background refresh loop (§4.5 step 4): re-authenticates on a fixed
    /// interval and, when `continuous_settlement` is enabled, runs the
    /// settlement planner after each successful refresh.
    async fn token_refresh_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.config.token_refresh_interval_seconds);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => return,
            }

            match self.tokens.refresh().await {
                Ok(token) => {
                    debug!("background token refresh succeeded");
                    if self.config.continuous_settlement {
                        self.run_settlement(&token).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "background token refresh failed; next cycle will retry");
                }
            }
        }
    }

    async fn run_settlement(&self, token: &str) {
        match self.settlement.run(token).await {
            Ok(SettlementOutcome::Empty { reason }) => {
                info!(reason = %reason, "settlement: nothing settleable");
                self.metrics.settlement_outcomes_total.with_label_values(&["empty"]).inc();
            }
            Ok(SettlementOutcome::Submitted { settlement_id }) => {
                info!(settlement_id = %settlement_id, "settlement submitted");
                self.metrics.settlement_outcomes_total.with_label_values(&["submitted"]).inc();
            }
            Ok(SettlementOutcome::SoftFailure(kind)) => {
                warn!(kind = ?kind, "settlement submission reported a soft logical error");
                self.metrics.settlement_outcomes_total.with_label_values(&["soft_failure"]).inc();
            }
            Err(crate::settlement::SettlementError::Api(e)) => {
                warn!(error = %e, "settlement round trip failed; will retry on next trigger");
                self.metrics.settlement_outcomes_total.with_label_values(&["transport_error"]).inc();
            }
            Err(crate::settlement::SettlementError::Invariant(e)) => {
                // Should never happen by construction (§8 planner properties).
                // Treated the same as any other InvariantViolation: fatal.
                error!(error = %e, "settlement plan failed its balance invariant");
                panic!("settlement invariant violated: {e}");
            }
        }
    }

    /// Shutdown sequence (§4.5 step 5): a short grace delay for any
    /// in-flight handler, a best-effort cancel of every order the engine
    /// still believes is live, then a final settlement under its own
    /// 30-second deadline independent of the global shutdown signal.
    async fn shutdown_sequence(&self) {
        tokio::time::sleep(Duration::from_millis(200)).await;

        let token = match self.tokens.get_token().await {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "could not obtain a token during shutdown; skipping emergency cancel and final settlement");
                return;
            }
        };

        self.executor.emergency_cancel_all(&token).await;

        let deadline = Duration::from_secs(30);
        if tokio::time::timeout(deadline, self.run_settlement(&token)).await.is_err() {
            warn!("final settlement did not complete within the shutdown deadline");
        }
    }
}
