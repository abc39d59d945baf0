//! External-collaborator contracts (§6).
//!
//! The worker never talks to a price feed, an order book, or an auth server
//! directly — it talks to these traits. Concrete adapters live in
//! [`crate::adapters`]; in-memory fakes for tests live in [`crate::testing`].

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::ApiError;
use crate::model::{
    AccountPosition, ContractSide, OrderId, PositionSide, PriceBase, QtyBase, SettlementPlan,
};

/// One observation of the venue's index price.
#[derive(Debug, Clone, Copy)]
pub struct IndexPriceTick {
    pub price: Decimal,
    pub timestamp: SystemTime,
}

/// A live feed of index-price ticks, deduplicated at the source: a value is
/// only delivered when it differs from the previous one.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn subscribe(
        &self,
        key: &str,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<IndexPriceTick>, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSubmitStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub order_id: OrderId,
    pub status: OrderSubmitStatus,
    pub filled_qty: QtyBase,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub order_id: OrderId,
    pub unfilled_qty: QtyBase,
}

/// Order placement and cancellation against the venue.
#[async_trait]
pub trait OrderApi: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn submit_limit(
        &self,
        side: ContractSide,
        price_base: PriceBase,
        qty_base: QtyBase,
        margin_factor_ppm: u64,
        client_order_id: &str,
        token: &str,
        cancel: CancellationToken,
    ) -> Result<SubmitOutcome, ApiError>;

    async fn cancel(
        &self,
        order_id: &OrderId,
        token: &str,
        cancel: CancellationToken,
    ) -> Result<CancelOutcome, ApiError>;
}

/// A position as reported by the venue's account endpoint.
#[derive(Debug, Clone)]
pub struct AccountPositionDto {
    pub position_id: String,
    pub side: PositionSide,
    pub quantity: QtyBase,
    pub entry_price: PriceBase,
}

impl From<AccountPositionDto> for AccountPosition {
    fn from(dto: AccountPositionDto) -> Self {
        AccountPosition {
            position_id: dto.position_id,
            side: dto.side,
            quantity: dto.quantity,
            entry_price: dto.entry_price,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub balance: u64,
    pub open_order_ids: Vec<OrderId>,
    pub positions: Vec<AccountPositionDto>,
}

/// The venue's reported decimal precision for this trading pair. Checked
/// against configuration at startup (§4.5 step 1); a mismatch is fatal.
#[derive(Debug, Clone, Copy)]
pub struct MarketInfo {
    pub trading_decimals: u32,
    pub settlement_decimals: u32,
}

/// Account reads and settlement submission.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn get_account(&self, token: &str) -> Result<AccountSnapshot, ApiError>;

    async fn get_market_info(&self, token: &str) -> Result<MarketInfo, ApiError>;

    async fn settle(
        &self,
        plan: &SettlementPlan,
        token: &str,
        idempotency_key: &str,
    ) -> Result<String, ApiError>;
}

#[derive(Debug, Clone)]
pub struct AuthToken {
    pub token: String,
    pub expires_in: Duration,
}

/// Bearer-token acquisition. The challenge/signature exchange itself is an
/// external concern (§1 Non-goals); this contract only exposes the result.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn authenticate(&self) -> Result<AuthToken, ApiError>;
}
