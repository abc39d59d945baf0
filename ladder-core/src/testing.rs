//! In-memory fake adapters for `PriceSource`/`OrderApi`/`AccountApi`/`AuthApi`
//! (§10.7). Exercised by the unit tests in this crate and available to
//! downstream integration tests behind the `testing` feature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{ApiError, VenueLogicalError, VenueLogicalErrorKind};
use crate::interfaces::{
    AccountApi, AccountPositionDto, AccountSnapshot, AuthApi, AuthToken, CancelOutcome, IndexPriceTick,
    MarketInfo, OrderApi, OrderSubmitStatus, PriceSource, SubmitOutcome,
};
use crate::model::{AccountPosition, ContractSide, OrderId, PriceBase, QtyBase, SettlementPlan};

/// One recorded call into [`FakeOrderApi`], in call order.
#[derive(Debug, Clone)]
pub enum LoggedCall {
    Submit { side: ContractSide, price: PriceBase, qty: QtyBase },
    Cancel { order_id: OrderId },
}

impl LoggedCall {
    pub fn is_submit(&self) -> bool {
        matches!(self, LoggedCall::Submit { .. })
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, LoggedCall::Cancel { .. })
    }
}

#[derive(Default)]
struct CallLog {
    events: Mutex<Vec<LoggedCall>>,
}

/// A handle to a [`FakeOrderApi`]'s call history, cheap to clone and hold
/// onto after the api itself has been moved into an `Arc<dyn OrderApi>`.
#[derive(Clone)]
pub struct CallLogHandle(Arc<CallLog>);

impl CallLogHandle {
    pub fn events(&self) -> Vec<LoggedCall> {
        self.0.events.lock().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.0.events.lock().iter().filter(|e| e.is_submit()).count()
    }

    pub fn cancel_count(&self) -> usize {
        self.0.events.lock().iter().filter(|e| e.is_cancel()).count()
    }
}

pub struct FakeOrderApi {
    next_id: AtomicU64,
    log: Arc<CallLog>,
    /// Order ids that fail every cancel attempt with the given logical kind.
    pub always_fail_cancel: DashMap<OrderId, VenueLogicalErrorKind>,
}

impl FakeOrderApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            log: Arc::new(CallLog::default()),
            always_fail_cancel: DashMap::new(),
        }
    }

    pub fn log(&self) -> CallLogHandle {
        CallLogHandle(self.log.clone())
    }
}

impl Default for FakeOrderApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderApi for FakeOrderApi {
    async fn submit_limit(
        &self,
        side: ContractSide,
        price_base: PriceBase,
        qty_base: QtyBase,
        _margin_factor_ppm: u64,
        _client_order_id: &str,
        _token: &str,
        _cancel: CancellationToken,
    ) -> Result<SubmitOutcome, ApiError> {
        self.log.events.lock().push(LoggedCall::Submit { side, price: price_base, qty: qty_base });
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(SubmitOutcome {
            order_id: OrderId(format!("fake-{id}")),
            status: OrderSubmitStatus::Accepted,
            filled_qty: 0,
        })
    }

    async fn cancel(&self, order_id: &OrderId, _token: &str, _cancel: CancellationToken) -> Result<CancelOutcome, ApiError> {
        self.log.events.lock().push(LoggedCall::Cancel { order_id: order_id.clone() });

        if let Some(kind) = self.always_fail_cancel.get(order_id) {
            return Err(ApiError::Logical(VenueLogicalError::new(*kind)));
        }

        Ok(CancelOutcome { order_id: order_id.clone(), unfilled_qty: 0 })
    }
}

/// Replays a fixed sequence of ticks, then closes the stream.
pub struct FakePriceSource {
    ticks: Mutex<Vec<Decimal>>,
}

impl FakePriceSource {
    pub fn new(ticks: Vec<Decimal>) -> Self {
        Self { ticks: Mutex::new(ticks) }
    }
}

#[async_trait]
impl PriceSource for FakePriceSource {
    async fn subscribe(
        &self,
        _key: &str,
        _poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<IndexPriceTick>, ApiError> {
        let (tx, rx) = mpsc::channel(16);
        let ticks = std::mem::take(&mut *self.ticks.lock());
        tokio::spawn(async move {
            for price in ticks {
                if cancel.is_cancelled() {
                    break;
                }
                let tick = IndexPriceTick { price, timestamp: std::time::SystemTime::now() };
                if tx.send(tick).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

pub struct FakeAccountApi {
    positions: Mutex<Vec<AccountPosition>>,
    pub settlements: Mutex<Vec<SettlementPlan>>,
    pub market_info: MarketInfo,
}

impl FakeAccountApi {
    pub fn new(positions: Vec<AccountPosition>) -> Self {
        Self {
            positions: Mutex::new(positions),
            settlements: Mutex::new(Vec::new()),
            market_info: MarketInfo { trading_decimals: 8, settlement_decimals: 6 },
        }
    }

    pub fn with_market_info(mut self, info: MarketInfo) -> Self {
        self.market_info = info;
        self
    }
}

#[async_trait]
impl AccountApi for FakeAccountApi {
    async fn get_market_info(&self, _token: &str) -> Result<MarketInfo, ApiError> {
        Ok(self.market_info)
    }

    async fn get_account(&self, _token: &str) -> Result<AccountSnapshot, ApiError> {
        let positions = self.positions.lock().clone();
        Ok(AccountSnapshot {
            balance: 0,
            open_order_ids: Vec::new(),
            positions: positions
                .into_iter()
                .map(|p| AccountPositionDto {
                    position_id: p.position_id,
                    side: p.side,
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                })
                .collect(),
        })
    }

    async fn settle(&self, plan: &SettlementPlan, _token: &str, _idempotency_key: &str) -> Result<String, ApiError> {
        self.settlements.lock().push(plan.clone());
        Ok("fake-settlement".to_string())
    }
}

pub struct FakeAuthApi;

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn authenticate(&self) -> Result<AuthToken, ApiError> {
        Ok(AuthToken { token: "fake-token".to_string(), expires_in: Duration::from_secs(900) })
    }
}
