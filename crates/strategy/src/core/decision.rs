//! Rebalance decision state machine.
//!
//! Evaluated fresh on every call from the current ratio, the TWAP progress
//! and the timestamps. Nothing here mutates; the strategy acts on the
//! result.

use rust_decimal::Decimal;

use crate::core::guard::{cooldown_elapsed, cooldown_remaining};
use crate::types::{
    ExchangeSettings, ExecutionSettings, IncentiveSettings, MethodologySettings, RebalanceAction,
    RebalanceState, TwapState,
};

/// Inputs that do not depend on the venue.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub methodology: &'a MethodologySettings,
    pub execution: &'a ExecutionSettings,
    pub incentive: &'a IncentiveSettings,
    pub twap: &'a TwapState,
    pub last_rebalance_timestamp: u64,
    pub now: u64,
}

pub fn is_outside_bounds(current: Decimal, methodology: &MethodologySettings) -> bool {
    current < methodology.min_leverage_ratio || current > methodology.max_leverage_ratio
}

/// Seconds until the rebalance interval has elapsed.
pub fn rebalance_interval_remaining(ctx: &DecisionContext<'_>) -> u64 {
    cooldown_remaining(
        ctx.last_rebalance_timestamp,
        ctx.methodology.rebalance_interval,
        ctx.now,
    )
}

/// Classify the position. Ripcord beats everything. An unfinished TWAP
/// keeps its target until it completes, even once the ratio has left the
/// band and the rebalance interval has passed.
pub fn classify(current: Decimal, ctx: &DecisionContext<'_>) -> RebalanceState {
    if current >= ctx.incentive.incentivized_leverage_ratio {
        RebalanceState::RipcordEligible
    } else if ctx.twap.is_active() {
        RebalanceState::TwapInProgress
    } else if is_outside_bounds(current, ctx.methodology) && rebalance_interval_remaining(ctx) == 0
    {
        RebalanceState::RebalanceDue
    } else {
        RebalanceState::Idle
    }
}

/// What a keeper should call on `exchange`, honouring the venue cooldown
/// that applies to that action.
pub fn venue_action(
    state: RebalanceState,
    exchange: &ExchangeSettings,
    ctx: &DecisionContext<'_>,
) -> RebalanceAction {
    let last = exchange.last_trade_timestamp;
    match state {
        RebalanceState::RipcordEligible => {
            if cooldown_elapsed(last, ctx.incentive.incentivized_twap_cooldown_period, ctx.now) {
                RebalanceAction::Ripcord
            } else {
                RebalanceAction::None
            }
        }
        RebalanceState::RebalanceDue | RebalanceState::TwapInProgress => {
            if !cooldown_elapsed(last, ctx.execution.twap_cooldown_period, ctx.now) {
                RebalanceAction::None
            } else if state == RebalanceState::RebalanceDue {
                RebalanceAction::Rebalance
            } else {
                RebalanceAction::Iterate
            }
        }
        RebalanceState::Idle => RebalanceAction::None,
    }
}
