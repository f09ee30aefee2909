//! Trade sizing: how many collateral units to move toward a new target.
//!
//! All amounts are in whole collateral units unless the name says
//! otherwise. Swapping `x` collateral against `x·pc/pb` debt leaves equity
//! unchanged at current prices, so moving from ratio `L` to `L'` needs
//! exactly `x = |L' - L| / L · C` collateral units.

use rust_decimal::Decimal;

use crate::constants::{LEVERAGE_EPSILON, UNLEVERED_RATIO};
use crate::errors::StrategyError;
use crate::types::{
    ChunkSize, ExecutionSettings, LendingLimits, MethodologySettings, PositionState,
    TradeDirection,
};

/// New target after one recentering step, clamped to the leverage band.
///
/// `target·speed + current·(1 - speed)`: with speed 1 it jumps straight to
/// target, with smaller speeds it closes that fraction of the gap.
pub fn recentered_leverage_ratio(current: Decimal, methodology: &MethodologySettings) -> Decimal {
    let speed = methodology.recentering_speed;
    let raw = methodology.target_leverage_ratio * speed + current * (Decimal::ONE - speed);
    raw.clamp(
        methodology.min_leverage_ratio,
        methodology.max_leverage_ratio,
    )
}

/// Trade direction from `current` to `target`, or `None` when they are
/// within `LEVERAGE_EPSILON` of each other.
pub fn direction_for(target: Decimal, current: Decimal) -> Option<TradeDirection> {
    let gap = target - current;
    if gap.abs() <= LEVERAGE_EPSILON {
        None
    } else if gap.is_sign_positive() {
        Some(TradeDirection::Lever)
    } else {
        Some(TradeDirection::Delever)
    }
}

/// Whether `current` has reached or passed `target` going in `direction`.
pub fn target_reached(target: Decimal, current: Decimal, direction: TradeDirection) -> bool {
    match direction {
        TradeDirection::Lever => current >= target - LEVERAGE_EPSILON,
        TradeDirection::Delever => current <= target + LEVERAGE_EPSILON,
    }
}

/// Collateral units to trade to go from `current` to `target` in one go.
pub fn total_rebalance_notional(
    target: Decimal,
    current: Decimal,
    collateral_units: Decimal,
) -> Result<Decimal, StrategyError> {
    if current < UNLEVERED_RATIO {
        return Err(StrategyError::numeric(format!(
            "leverage ratio {current} below 1"
        )));
    }
    (target - current)
        .abs()
        .checked_div(current)
        .and_then(|fraction| fraction.checked_mul(collateral_units))
        .ok_or_else(|| StrategyError::numeric("rebalance notional overflow"))
}

/// Collateral units the lending venue lets one chunk move, net of the
/// unutilized safety margin. Never negative.
///
/// Lever: borrowing power left at `max_ltv`, converted to collateral.
/// Delever: share of collateral withdrawable while staying under the
/// liquidation threshold.
pub fn max_borrow_collateral(
    state: &PositionState,
    limits: &LendingLimits,
    execution: &ExecutionSettings,
    direction: TradeDirection,
) -> Decimal {
    let utilization = Decimal::ONE - execution.unutilized_leverage_percentage;
    let headroom = match direction {
        TradeDirection::Lever => {
            let borrowable = state.collateral_value * limits.max_ltv * utilization;
            (borrowable - state.debt_value)
                .checked_div(state.collateral_price)
                .unwrap_or(Decimal::ZERO)
        }
        TradeDirection::Delever => {
            let net_repay_limit =
                state.collateral_value * limits.liquidation_threshold * utilization;
            if net_repay_limit.is_zero() {
                Decimal::ZERO
            } else {
                state.collateral_units * (net_repay_limit - state.debt_value) / net_repay_limit
            }
        }
    };
    headroom.max(Decimal::ZERO)
}

/// Clip `total` to the venue cap and the lending headroom.
///
/// A chunk that would be zero fails with `NoRebalanceNeeded` instead of
/// sending an empty trade.
pub fn size_chunk(
    total: Decimal,
    max_trade_size: Decimal,
    headroom: Decimal,
) -> Result<ChunkSize, StrategyError> {
    let notional = total.min(max_trade_size).min(headroom);
    if notional <= Decimal::ZERO {
        return Err(StrategyError::no_rebalance(format!(
            "chunk size is zero (total {total}, venue cap {max_trade_size}, headroom {headroom})"
        )));
    }
    Ok(ChunkSize {
        notional,
        total_notional: total,
        is_chunked: notional < total,
    })
}

/// Borrow-asset amount matching `collateral_units` at current prices.
pub fn collateral_to_borrow(
    collateral_units: Decimal,
    collateral_price: Decimal,
    borrow_price: Decimal,
) -> Result<Decimal, StrategyError> {
    collateral_units
        .checked_mul(collateral_price)
        .and_then(|value| value.checked_div(borrow_price))
        .ok_or_else(|| StrategyError::numeric("collateral/borrow conversion overflow"))
}

/// Collateral amount matching `borrow_units` at current prices.
pub fn borrow_to_collateral(
    borrow_units: Decimal,
    collateral_price: Decimal,
    borrow_price: Decimal,
) -> Result<Decimal, StrategyError> {
    borrow_units
        .checked_mul(borrow_price)
        .and_then(|value| value.checked_div(collateral_price))
        .ok_or_else(|| StrategyError::numeric("borrow/collateral conversion overflow"))
}

/// `amount · (1 - slippage)`.
pub fn min_out(amount: Decimal, slippage: Decimal) -> Decimal {
    amount * (Decimal::ONE - slippage)
}

/// `amount · (1 + slippage)`.
pub fn max_in(amount: Decimal, slippage: Decimal) -> Decimal {
    amount * (Decimal::ONE + slippage)
}
