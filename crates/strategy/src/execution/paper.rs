//! Dry-run collaborators: an in-memory lending position and venues that
//! fill at oracle prices less a flat fee.
//!
//! Used by the keeper binary when no live position is configured, and by
//! the integration tests.

use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::core::oracle::PriceOracle;
use crate::errors::StrategyError;
use crate::execution::ledger::PositionLedger;
use crate::execution::venue::TradeVenue;
use crate::types::fixed_point::{answer_to_price, bps_to_decimal, decimal_to_units, units_to_decimal};
use crate::types::{LendingLimits, PositionBalances, StrategyConfig};

// ═══════════════════════════════════════════════════════════════════════════
// Paper Ledger
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct PaperBook {
    collateral: U256,
    debt: U256,
    /// Borrow asset received beyond what was owed.
    idle_borrow: U256,
    rewards: Vec<(Address, Decimal)>,
}

/// In-memory lending position.
#[derive(Debug)]
pub struct PaperLedger {
    book: Mutex<PaperBook>,
    limits: LendingLimits,
}

impl PaperLedger {
    pub fn new(collateral: U256, limits: LendingLimits) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                collateral,
                ..PaperBook::default()
            }),
            limits,
        }
    }

    fn book(&self) -> Result<std::sync::MutexGuard<'_, PaperBook>, StrategyError> {
        self.book
            .lock()
            .map_err(|_| StrategyError::LockPoisoned("paper ledger"))
    }

    /// Add collateral from outside (holder deposit).
    pub fn deposit_collateral(&self, amount: U256) -> Result<(), StrategyError> {
        let mut book = self.book()?;
        book.collateral = book
            .collateral
            .checked_add(amount)
            .ok_or_else(|| ledger_err("collateral overflow"))?;
        Ok(())
    }

    pub fn idle_borrow(&self) -> Result<U256, StrategyError> {
        Ok(self.book()?.idle_borrow)
    }

    /// Every bounty paid so far, in order.
    pub fn rewards_paid(&self) -> Result<Vec<(Address, Decimal)>, StrategyError> {
        Ok(self.book()?.rewards.clone())
    }
}

impl PositionLedger for PaperLedger {
    fn balances(&self) -> Result<PositionBalances, StrategyError> {
        let book = self.book()?;
        Ok(PositionBalances {
            collateral: book.collateral,
            debt: book.debt,
        })
    }

    fn lending_limits(&self) -> Result<LendingLimits, StrategyError> {
        Ok(self.limits)
    }

    fn commit_lever(&self, borrowed: U256, received: U256) -> Result<(), StrategyError> {
        let mut book = self.book()?;
        let debt = book
            .debt
            .checked_add(borrowed)
            .ok_or_else(|| ledger_err("debt overflow"))?;
        let collateral = book
            .collateral
            .checked_add(received)
            .ok_or_else(|| ledger_err("collateral overflow"))?;
        book.debt = debt;
        book.collateral = collateral;
        debug!(%borrowed, %received, "paper lever committed");
        Ok(())
    }

    fn commit_delever(&self, sold: U256, received: U256) -> Result<U256, StrategyError> {
        let mut book = self.book()?;
        let collateral = book
            .collateral
            .checked_sub(sold)
            .ok_or_else(|| ledger_err(format!("cannot withdraw {sold}, only {} held", book.collateral)))?;
        let repaid = received.min(book.debt);
        let idle = book
            .idle_borrow
            .checked_add(received - repaid)
            .ok_or_else(|| ledger_err("idle balance overflow"))?;
        book.collateral = collateral;
        book.debt -= repaid;
        book.idle_borrow = idle;
        debug!(%sold, %received, %repaid, "paper delever committed");
        Ok(repaid)
    }

    fn pay_reward(&self, to: Address, amount: Decimal) -> Result<(), StrategyError> {
        let mut book = self.book()?;
        book.rewards.push((to, amount));
        info!(%to, %amount, "paper reward paid");
        Ok(())
    }
}

fn ledger_err(reason: impl Into<String>) -> StrategyError {
    StrategyError::Ledger {
        reason: reason.into(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Paper Venue
// ═══════════════════════════════════════════════════════════════════════════

/// Venue that fills at the current oracle price minus `fee_bps`.
pub struct PaperVenue {
    name: String,
    oracle: Arc<dyn PriceOracle>,
    config: StrategyConfig,
    fee: Decimal,
}

impl PaperVenue {
    pub fn new(
        name: impl Into<String>,
        oracle: Arc<dyn PriceOracle>,
        config: StrategyConfig,
        fee_bps: u32,
    ) -> Self {
        Self {
            name: name.into(),
            oracle,
            config,
            fee: bps_to_decimal(fee_bps),
        }
    }

    fn price(&self, feed: Address) -> Result<Decimal, StrategyError> {
        let reading = self.oracle.latest_reading(feed)?;
        answer_to_price(reading.answer, reading.decimals).ok_or_else(|| {
            StrategyError::VenueFailure {
                venue: self.name.clone(),
                reason: format!("no usable price for {feed}"),
            }
        })
    }

    /// Convert `amount_in` of one asset to the other at oracle prices less
    /// fee, enforcing `min_out`.
    fn fill(
        &self,
        amount_in: U256,
        decimals_in: u8,
        price_in: Decimal,
        min_out: U256,
        decimals_out: u8,
        price_out: Decimal,
    ) -> Result<U256, StrategyError> {
        let amount = units_to_decimal(amount_in, decimals_in)?;
        let out = amount
            .checked_mul(price_in)
            .and_then(|v| v.checked_div(price_out))
            .map(|v| v * (Decimal::ONE - self.fee))
            .ok_or_else(|| StrategyError::VenueFailure {
                venue: self.name.clone(),
                reason: "fill amount overflow".into(),
            })?;
        let out_raw = decimal_to_units(out, decimals_out)?;
        if out_raw < min_out {
            return Err(StrategyError::SlippageExceeded {
                venue: self.name.clone(),
                minimum: units_to_decimal(min_out, decimals_out)?,
                received: out,
            });
        }
        Ok(out_raw)
    }
}

impl TradeVenue for PaperVenue {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_lever_trade(
        &self,
        borrow_in: U256,
        min_collateral_out: U256,
        _route: &[u8],
    ) -> Result<U256, StrategyError> {
        let pb = self.price(self.config.borrow_price_oracle)?;
        let pc = self.price(self.config.collateral_price_oracle)?;
        self.fill(
            borrow_in,
            self.config.borrow_decimals,
            pb,
            min_collateral_out,
            self.config.collateral_decimals,
            pc,
        )
    }

    fn execute_delever_trade(
        &self,
        collateral_in: U256,
        min_borrow_out: U256,
        _route: &[u8],
    ) -> Result<U256, StrategyError> {
        let pc = self.price(self.config.collateral_price_oracle)?;
        let pb = self.price(self.config.borrow_price_oracle)?;
        self.fill(
            collateral_in,
            self.config.collateral_decimals,
            pc,
            min_borrow_out,
            self.config.borrow_decimals,
            pb,
        )
    }
}
