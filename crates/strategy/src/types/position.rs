use alloy::primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Raw balances as the lending venue reports them, in native units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionBalances {
    pub collateral: U256,
    pub debt: U256,
}

/// Borrowing limits of the lending venue for the collateral asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingLimits {
    /// Maximum loan-to-value for new borrowing, in (0, 1).
    #[serde(with = "rust_decimal::serde::str")]
    pub max_ltv: Decimal,
    /// Debt/collateral value at which the position becomes liquidatable.
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidation_threshold: Decimal,
}

/// Snapshot of the position derived from fresh balances and prices.
///
/// Never cached: every engine call rebuilds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    /// Collateral held, in whole collateral tokens.
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_units: Decimal,
    /// Debt owed, in whole borrow tokens.
    #[serde(with = "rust_decimal::serde::str")]
    pub debt_units: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub borrow_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_value: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub debt_value: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub current_leverage_ratio: Decimal,
}

impl PositionState {
    pub fn is_engaged(&self) -> bool {
        !self.debt_units.is_zero()
    }

    /// Net equity in oracle units.
    pub fn equity(&self) -> Decimal {
        self.collateral_value - self.debt_value
    }
}
