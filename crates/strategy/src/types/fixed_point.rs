//! Conversions between raw on-chain integers and off-chain `Decimal`.
//!
//! Token balances travel as `U256` native units (the asset's own decimals)
//! and oracle answers as signed integers with the feed's decimals. The
//! engine does all of its math in `Decimal` whole-token units and converts
//! only at these boundaries.

use alloy::primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::constants::MAX_DECIMALS;
use crate::errors::StrategyError;

/// `10^decimals` as a `Decimal`. Callers validate `decimals <= 28`.
pub fn pow10(decimals: u8) -> Decimal {
    (0..decimals.min(MAX_DECIMALS)).fold(Decimal::ONE, |acc, _| acc * Decimal::TEN)
}

/// Convert raw native units (e.g. wei) to whole-token `Decimal`.
pub fn units_to_decimal(raw: U256, decimals: u8) -> Result<Decimal, StrategyError> {
    let whole = Decimal::from_str(&raw.to_string())
        .map_err(|_| StrategyError::numeric(format!("raw amount {raw} exceeds decimal range")))?;
    Ok(whole / pow10(decimals))
}

/// Convert a whole-token `Decimal` to raw native units.
///
/// Truncates anything below one native unit; token amounts are integers
/// on-chain. Negative amounts are rejected.
pub fn decimal_to_units(amount: Decimal, decimals: u8) -> Result<U256, StrategyError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(StrategyError::numeric(format!(
            "negative token amount {amount}"
        )));
    }
    let scaled = amount
        .checked_mul(pow10(decimals))
        .ok_or_else(|| StrategyError::numeric(format!("amount {amount} overflows at {decimals} decimals")))?
        .trunc();
    let raw = scaled
        .to_u128()
        .ok_or_else(|| StrategyError::numeric(format!("amount {scaled} not representable")))?;
    Ok(U256::from(raw))
}

/// Convert a signed oracle answer to a price. `None` for non-positive answers.
pub fn answer_to_price(answer: i128, decimals: u8) -> Option<Decimal> {
    if answer <= 0 {
        return None;
    }
    Decimal::try_from_i128_with_scale(answer, u32::from(decimals)).ok()
}

/// Convert a price to a signed oracle answer at the given decimals (truncating).
pub fn price_to_answer(price: Decimal, decimals: u8) -> Option<i128> {
    price.checked_mul(pow10(decimals))?.trunc().to_i128()
}

/// Convert basis points to a fraction.
pub fn bps_to_decimal(bps: u32) -> Decimal {
    Decimal::from(bps) / Decimal::from(10_000u32)
}
