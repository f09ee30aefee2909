//! Position accountant: balances + prices → leverage ratio.
//!
//! Pure functions only. Leverage ratio is
//! `collateral_value / (collateral_value - debt_value)`, both values in the
//! oracles' common quote unit.

use rust_decimal::Decimal;

use crate::core::oracle::PricePair;
use crate::errors::StrategyError;
use crate::types::fixed_point::units_to_decimal;
use crate::types::{PositionBalances, PositionState, StrategyConfig};

/// Leverage ratio from collateral and debt values.
///
/// Fails with `EmptyPosition` when there is neither collateral nor debt and
/// with `Undercollateralized` when debt value reaches collateral value.
pub fn leverage_ratio(
    collateral_value: Decimal,
    debt_value: Decimal,
) -> Result<Decimal, StrategyError> {
    if collateral_value.is_zero() && debt_value.is_zero() {
        return Err(StrategyError::EmptyPosition);
    }
    if debt_value >= collateral_value {
        return Err(StrategyError::Undercollateralized {
            collateral_value,
            debt_value,
        });
    }
    collateral_value
        .checked_div(collateral_value - debt_value)
        .ok_or_else(|| StrategyError::numeric("leverage ratio overflow"))
}

/// Build a full position snapshot from raw balances and fresh prices.
pub fn position_state(
    balances: &PositionBalances,
    prices: &PricePair,
    config: &StrategyConfig,
) -> Result<PositionState, StrategyError> {
    let collateral_units = units_to_decimal(balances.collateral, config.collateral_decimals)?;
    let debt_units = units_to_decimal(balances.debt, config.borrow_decimals)?;

    let collateral_value = collateral_units
        .checked_mul(prices.collateral)
        .ok_or_else(|| StrategyError::numeric("collateral value overflow"))?;
    let debt_value = debt_units
        .checked_mul(prices.borrow)
        .ok_or_else(|| StrategyError::numeric("debt value overflow"))?;

    let current_leverage_ratio = leverage_ratio(collateral_value, debt_value)?;

    Ok(PositionState {
        collateral_units,
        debt_units,
        collateral_price: prices.collateral,
        borrow_price: prices.borrow,
        collateral_value,
        debt_value,
        current_leverage_ratio,
    })
}
