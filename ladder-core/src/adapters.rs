//! Concrete adapters for the external-collaborator traits in [`crate::interfaces`]
//! (§10.1). These are reference implementations appropriate to an HTTP/JSON
//! venue and a Redis-backed price feed; the wire shapes here are not a spec
//! invariant and are expected to be swapped for a venue's actual API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{ApiError, TransportError, VenueLogicalError, VenueLogicalErrorKind};
use crate::interfaces::{
    AccountApi, AccountPositionDto, AccountSnapshot, AuthApi, AuthToken, CancelOutcome,
    IndexPriceTick, MarketInfo, OrderApi, OrderSubmitStatus, PriceSource, SubmitOutcome,
};
use crate::model::{ContractSide, OrderId, PositionSide, PriceBase, QtyBase, SettlementPlan};

/// A venue-reported logical error, carried as a JSON body on 4xx responses.
#[derive(Debug, Deserialize)]
struct VenueErrorBody {
    kind: String,
    #[serde(default)]
    #[allow(dead_code)]
    message: String,
}

fn logical_kind_from_wire(kind: &str) -> Option<VenueLogicalErrorKind> {
    match kind {
        "already_filled_or_closed" => Some(VenueLogicalErrorKind::AlreadyFilledOrClosed),
        "order_unknown" => Some(VenueLogicalErrorKind::OrderUnknown),
        "challenge_expired" => Some(VenueLogicalErrorKind::ChallengeExpired),
        "invalid_signature" => Some(VenueLogicalErrorKind::InvalidSignature),
        "already_settled" => Some(VenueLogicalErrorKind::AlreadySettled),
        _ => None,
    }
}

/// Turns a finished `reqwest` response into a typed success or [`ApiError`],
/// classifying 401 as `TokenExpired`, 4xx-with-known-`kind` as
/// `VenueLogicalError`, and everything else transport-layer (§7).
async fn classify_response<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| ApiError::Transport(TransportError(format!("decode response body: {e}"))));
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::TokenExpired);
    }

    if status.is_client_error() {
        if let Ok(body) = resp.json::<VenueErrorBody>().await {
            if let Some(kind) = logical_kind_from_wire(&body.kind) {
                return Err(ApiError::Logical(VenueLogicalError::new(kind)));
            }
        }
        return Err(ApiError::Transport(TransportError(format!("unclassified client error: {status}"))));
    }

    Err(ApiError::Transport(TransportError(format!("venue returned {status}"))))
}

fn map_transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() || err.is_connect() {
        ApiError::Transport(TransportError(format!("connection/timeout: {err}")))
    } else {
        ApiError::Transport(TransportError(err.to_string()))
    }
}

/// Shared HTTP client for `OrderApi`/`AccountApi`/`AuthApi`. One instance is
/// wired into the orchestrator per process; all three traits share the same
/// connection pool.
pub struct HttpVenueClient {
    client: Client,
    base_url: String,
    account_id: String,
    ledger_id: String,
    key_type: String,
    private_key_hex: String,
}

impl HttpVenueClient {
    pub fn new(
        base_url: String,
        account_id: String,
        ledger_id: String,
        key_type: String,
        private_key_hex: String,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Transport(TransportError(format!("build http client: {e}"))))?;
        Ok(Self { client, base_url, account_id, ledger_id, key_type, private_key_hex })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Serialize)]
struct SubmitLimitRequest<'a> {
    account_id: &'a str,
    side: &'a str,
    price_base: PriceBase,
    qty_base: QtyBase,
    margin_factor_ppm: u64,
    client_order_id: &'a str,
    idempotency_key: String,
}

#[derive(Debug, Deserialize)]
struct SubmitLimitResponse {
    order_id: String,
    status: String,
    filled_qty: QtyBase,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    account_id: &'a str,
    order_id: &'a str,
    idempotency_key: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    order_id: String,
    unfilled_qty: QtyBase,
}

#[async_trait]
impl OrderApi for HttpVenueClient {
    async fn submit_limit(
        &self,
        side: ContractSide,
        price_base: PriceBase,
        qty_base: QtyBase,
        margin_factor_ppm: u64,
        client_order_id: &str,
        token: &str,
        cancel: CancellationToken,
    ) -> Result<SubmitOutcome, ApiError> {
        let req = SubmitLimitRequest {
            account_id: &self.account_id,
            side: side.as_wire_str(),
            price_base,
            qty_base,
            margin_factor_ppm,
            client_order_id,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        };

        let call = self
            .client
            .post(self.url("/v1/orders"))
            .bearer_auth(token)
            .json(&req)
            .send();

        let resp = tokio::select! {
            result = call => result.map_err(map_transport)?,
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
        };

        let body: SubmitLimitResponse = classify_response(resp).await?;
        Ok(SubmitOutcome {
            order_id: OrderId(body.order_id),
            status: if body.status == "rejected" { OrderSubmitStatus::Rejected } else { OrderSubmitStatus::Accepted },
            filled_qty: body.filled_qty,
        })
    }

    async fn cancel(&self, order_id: &OrderId, token: &str, cancel: CancellationToken) -> Result<CancelOutcome, ApiError> {
        let req = CancelRequest {
            account_id: &self.account_id,
            order_id: &order_id.0,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        };

        let call = self
            .client
            .post(self.url("/v1/orders/cancel"))
            .bearer_auth(token)
            .json(&req)
            .send();

        let resp = tokio::select! {
            result = call => result.map_err(map_transport)?,
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
        };

        let body: CancelResponse = classify_response(resp).await?;
        Ok(CancelOutcome { order_id: OrderId(body.order_id), unfilled_qty: body.unfilled_qty })
    }
}

#[derive(Debug, Deserialize)]
struct AccountResponseWire {
    balance: u64,
    orders: Vec<String>,
    positions: Vec<PositionWire>,
}

#[derive(Debug, Deserialize)]
struct PositionWire {
    id: String,
    side: String,
    qty: QtyBase,
    entry_price: PriceBase,
}

#[derive(Debug, Serialize)]
struct SettleRequest<'a> {
    account_id: &'a str,
    entries: Vec<SettleEntryWire<'a>>,
    idempotency_key: &'a str,
}

#[derive(Debug, Serialize)]
struct SettleEntryWire<'a> {
    position_id: &'a str,
    quantity: QtyBase,
}

#[derive(Debug, Deserialize)]
struct SettleResponse {
    settlement_id: String,
}

#[derive(Debug, Deserialize)]
struct MarketInfoWire {
    trading_decimals: u32,
    settlement_decimals: u32,
}

#[async_trait]
impl AccountApi for HttpVenueClient {
    async fn get_market_info(&self, token: &str) -> Result<MarketInfo, ApiError> {
        let resp = self
            .client
            .get(self.url("/v1/market"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_transport)?;

        let body: MarketInfoWire = classify_response(resp).await?;
        Ok(MarketInfo { trading_decimals: body.trading_decimals, settlement_decimals: body.settlement_decimals })
    }

    async fn get_account(&self, token: &str) -> Result<AccountSnapshot, ApiError> {
        let resp = self
            .client
            .get(self.url("/v1/account"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_transport)?;

        let body: AccountResponseWire = classify_response(resp).await?;
        let positions = body
            .positions
            .into_iter()
            .filter_map(|p| {
                let side = match p.side.as_str() {
                    "long" => PositionSide::Long,
                    "short" => PositionSide::Short,
                    other => {
                        warn!(side = other, "unknown position side from venue; dropping position");
                        return None;
                    }
                };
                Some(AccountPositionDto { position_id: p.id, side, quantity: p.qty, entry_price: p.entry_price })
            })
            .collect();

        Ok(AccountSnapshot {
            balance: body.balance,
            open_order_ids: body.orders.into_iter().map(OrderId).collect(),
            positions,
        })
    }

    async fn settle(&self, plan: &SettlementPlan, token: &str, idempotency_key: &str) -> Result<String, ApiError> {
        let req = SettleRequest {
            account_id: &self.account_id,
            entries: plan
                .entries
                .iter()
                .map(|e| SettleEntryWire { position_id: &e.position_id, quantity: e.quantity })
                .collect(),
            idempotency_key,
        };

        let resp = self
            .client
            .post(self.url("/v1/settlements"))
            .bearer_auth(token)
            .json(&req)
            .send()
            .await
            .map_err(map_transport)?;

        let body: SettleResponse = classify_response(resp).await?;
        Ok(body.settlement_id)
    }
}

#[derive(Debug, Serialize)]
struct AuthenticateRequest<'a> {
    account_id: &'a str,
    ledger_id: &'a str,
    key_type: &'a str,
    /// Placeholder for a real challenge/signature exchange, which is
    /// explicitly out of the algorithmic core's scope (§1). A real venue
    /// integration replaces this with the actual signed-challenge flow.
    signature_hint: String,
}

#[derive(Debug, Deserialize)]
struct AuthenticateResponse {
    token: String,
    expires_in_seconds: u64,
}

#[async_trait]
impl AuthApi for HttpVenueClient {
    async fn authenticate(&self) -> Result<AuthToken, ApiError> {
        let req = AuthenticateRequest {
            account_id: &self.account_id,
            ledger_id: &self.ledger_id,
            key_type: &self.key_type,
            signature_hint: self.private_key_hex.clone(),
        };

        let resp = self
            .client
            .post(self.url("/v1/auth"))
            .json(&req)
            .send()
            .await
            .map_err(map_transport)?;

        let body: AuthenticateResponse = classify_response(resp).await?;
        Ok(AuthToken { token: body.token, expires_in: Duration::from_secs(body.expires_in_seconds) })
    }
}

/// Redis-backed index price feed (§6 `PriceSource`). Polls a single key
/// holding a JSON object with an `IndexPrice` numeric field and emits a tick
/// only when the parsed value differs from the last one delivered.
pub struct RedisPriceSource {
    client: redis::Client,
}

#[derive(Debug, Deserialize)]
struct IndexPriceWire {
    #[serde(rename = "IndexPrice")]
    index_price: Decimal,
}

impl RedisPriceSource {
    pub fn new(connection_string: &str) -> Result<Self, ApiError> {
        let client = redis::Client::open(connection_string)
            .map_err(|e| ApiError::Transport(TransportError(format!("open redis client: {e}"))))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PriceSource for RedisPriceSource {
    async fn subscribe(
        &self,
        key: &str,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<IndexPriceTick>, ApiError> {
        let mut conn = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| ApiError::Transport(TransportError(format!("connect to redis: {e}"))))?;

        let (tx, rx) = mpsc::channel(64);
        let key = key.to_string();

        tokio::spawn(async move {
            let mut last: Option<Decimal> = None;
            loop {
                if cancel.is_cancelled() {
                    debug!("price source subscription cancelled");
                    break;
                }

                match redis::cmd("GET").arg(&key).query_async::<_, Option<String>>(&mut conn).await {
                    Ok(Some(raw)) => match serde_json::from_str::<IndexPriceWire>(&raw) {
                        Ok(parsed) => {
                            if last != Some(parsed.index_price) {
                                last = Some(parsed.index_price);
                                let tick = IndexPriceTick {
                                    price: parsed.index_price,
                                    timestamp: std::time::SystemTime::now(),
                                };
                                if tx.send(tick).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "price source: failed to parse index price json; suppressing this tick");
                        }
                    },
                    Ok(None) => {
                        warn!(key = %key, "price source: key not present in redis");
                    }
                    Err(e) => {
                        warn!(error = %e, "price source: transient redis read error");
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        });

        Ok(rx)
    }
}

/// Caches the current bearer token and serializes refresh races behind
/// `token_lock` (§5). Readers with a token that still has at least a
/// 60-second safety margin before expiry take a fast path with no lock wait
/// beyond the initial read.
pub struct TokenManager {
    auth: Arc<dyn AuthApi>,
    state: Mutex<Option<(String, std::time::Instant)>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(60);

impl TokenManager {
    pub fn new(auth: Arc<dyn AuthApi>) -> Self {
        Self { auth, state: Mutex::new(None), refresh_lock: tokio::sync::Mutex::new(()) }
    }

    /// Returns a still-valid token, refreshing it if necessary.
    pub async fn get_token(&self) -> Result<String, ApiError> {
        if let Some((token, expires_at)) = self.state.lock().clone() {
            if expires_at.saturating_duration_since(std::time::Instant::now()) > TOKEN_SAFETY_MARGIN {
                return Ok(token);
            }
        }
        self.refresh().await
    }

    /// Unconditionally authenticates and replaces the cached token.
    pub async fn refresh(&self) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        // Another waiter may have refreshed while we queued for the lock.
        if let Some((token, expires_at)) = self.state.lock().clone() {
            if expires_at.saturating_duration_since(std::time::Instant::now()) > TOKEN_SAFETY_MARGIN {
                return Ok(token);
            }
        }

        let auth = self.auth.authenticate().await?;
        let expires_at = std::time::Instant::now() + auth.expires_in;
        *self.state.lock() = Some((auth.token.clone(), expires_at));
        Ok(auth.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAuthApi;

    #[tokio::test]
    async fn token_manager_caches_until_near_expiry() {
        let mgr = TokenManager::new(Arc::new(FakeAuthApi));
        let t1 = mgr.get_token().await.unwrap();
        let t2 = mgr.get_token().await.unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn logical_kind_maps_known_wire_strings() {
        assert_eq!(logical_kind_from_wire("order_unknown"), Some(VenueLogicalErrorKind::OrderUnknown));
        assert_eq!(logical_kind_from_wire("already_settled"), Some(VenueLogicalErrorKind::AlreadySettled));
        assert_eq!(logical_kind_from_wire("something_else"), None);
    }
}
