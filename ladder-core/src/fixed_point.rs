//! Base-unit fixed-point arithmetic.
//!
//! Prices and quantities are non-negative integers scaled by `10^decimals`.
//! `to_base` truncates toward zero; overflow is treated as a programming
//! error (the domain is bounded by the venue) and saturates rather than
//! panicking.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

/// `to_base` was called with a negative decimal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("negative value cannot be converted to a base-unit quantity: {0}")]
pub struct InvalidInput(pub Decimal);

fn pow10(exp: u32) -> Decimal {
    Decimal::from(10u64.pow(exp))
}

/// Converts a non-negative decimal into base units, truncating toward zero.
pub fn to_base(d: Decimal, exp: u32) -> Result<u64, InvalidInput> {
    if d.is_sign_negative() {
        return Err(InvalidInput(d));
    }
    let scaled = (d * pow10(exp)).trunc();
    Ok(scaled.to_u64().unwrap_or(u64::MAX))
}

/// Converts base units back into an exact decimal.
pub fn from_base(b: u64, exp: u32) -> Decimal {
    Decimal::from(b) / pow10(exp)
}

/// Bid prices around `mid_base`, closest-to-mid first, strictly decreasing.
pub fn bid_levels_usd(
    mid_base: u64,
    spread_usd: Decimal,
    spacing_usd: Decimal,
    n: usize,
    trading_decimals: u32,
) -> Vec<u64> {
    let mid = from_base(mid_base, trading_decimals);
    let best_bid = mid - spread_usd / Decimal::TWO;
    (0..n)
        .map(|i| {
            let price = best_bid - spacing_usd * Decimal::from(i as u64);
            to_base(price, trading_decimals).unwrap_or(0)
        })
        .collect()
}

/// Ask prices around `mid_base`, closest-to-mid first, strictly increasing.
pub fn ask_levels_usd(
    mid_base: u64,
    spread_usd: Decimal,
    spacing_usd: Decimal,
    n: usize,
    trading_decimals: u32,
) -> Vec<u64> {
    let mid = from_base(mid_base, trading_decimals);
    let best_ask = mid + spread_usd / Decimal::TWO;
    (0..n)
        .map(|i| {
            let price = best_ask + spacing_usd * Decimal::from(i as u64);
            to_base(price, trading_decimals).unwrap_or(0)
        })
        .collect()
}

/// Required margin for one level, in settlement base units.
///
/// `margin_factor_ppm` is parts-per-million (200_000 == 0.2 == 20%).
pub fn margin(
    price_base: u64,
    qty_base: u64,
    margin_factor_ppm: u64,
    trading_decimals: u32,
    settlement_decimals: u32,
) -> u64 {
    let price = from_base(price_base, trading_decimals);
    let qty = from_base(qty_base, trading_decimals);
    let factor = Decimal::from(margin_factor_ppm) / Decimal::from(1_000_000u64);
    to_base(price * qty * factor, settlement_decimals).unwrap_or(0)
}
