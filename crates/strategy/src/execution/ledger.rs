use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;

use crate::errors::StrategyError;
use crate::types::{LendingLimits, PositionBalances};

/// The lending position the strategy manages.
///
/// Amounts are raw native units of the respective asset. Every mutating
/// method is all-or-nothing: on `Err` the balances are unchanged.
pub trait PositionLedger: Send + Sync {
    fn balances(&self) -> Result<PositionBalances, StrategyError>;

    fn lending_limits(&self) -> Result<LendingLimits, StrategyError>;

    /// Record a lever chunk: `borrowed` added to debt, `received` added to
    /// collateral.
    fn commit_lever(&self, borrowed: U256, received: U256) -> Result<(), StrategyError>;

    /// Record a delever chunk: `sold` removed from collateral, `received`
    /// used to repay debt. Returns the amount actually repaid; any excess
    /// over outstanding debt stays with the position as idle borrow asset.
    fn commit_delever(&self, sold: U256, received: U256) -> Result<U256, StrategyError>;

    /// Transfer a ripcord bounty (native asset, whole units) to `to`.
    fn pay_reward(&self, to: Address, amount: Decimal) -> Result<(), StrategyError>;
}
