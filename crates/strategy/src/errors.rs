use alloy::primitives::Address;
use rust_decimal::Decimal;
use thiserror::Error;

/// Typed error hierarchy for the leverage strategy engine.
///
/// Every variant is terminal for the call that produced it: the engine
/// mutates nothing before returning one. Application code (config loading,
/// the keeper binary) wraps these with `anyhow::Context`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    // -- Oracle -------------------------------------------------------------
    #[error("oracle stale: feed {feed} is {age_seconds}s old (max {max_seconds}s)")]
    OracleStale {
        feed: Address,
        age_seconds: u64,
        max_seconds: u64,
    },

    #[error("invalid price from feed {feed}: {reason}")]
    InvalidPrice { feed: Address, reason: String },

    // -- Position -----------------------------------------------------------
    #[error("position undercollateralized: debt value {debt_value} >= collateral value {collateral_value}")]
    Undercollateralized {
        collateral_value: Decimal,
        debt_value: Decimal,
    },

    #[error("position has no collateral")]
    EmptyPosition,

    #[error("position is not engaged")]
    NotEngaged,

    #[error("position already engaged: {reason}")]
    AlreadyEngaged { reason: String },

    // -- Decision -----------------------------------------------------------
    #[error("cooldown active on {venue}: {remaining_seconds}s remaining")]
    CooldownActive {
        venue: String,
        remaining_seconds: u64,
    },

    #[error("no rebalance needed: {reason}")]
    NoRebalanceNeeded { reason: String },

    // -- Execution ----------------------------------------------------------
    #[error("slippage exceeded on {venue}: received {received}, minimum {minimum}")]
    SlippageExceeded {
        venue: String,
        minimum: Decimal,
        received: Decimal,
    },

    #[error("venue {venue} failed: {reason}")]
    VenueFailure { venue: String, reason: String },

    #[error("unknown venue: {venue}")]
    InvalidVenue { venue: String },

    #[error("ledger error: {reason}")]
    Ledger { reason: String },

    // -- Access -------------------------------------------------------------
    #[error("caller {caller} is not authorized to {action}")]
    Unauthorized {
        caller: Address,
        action: &'static str,
    },

    // -- Settings -----------------------------------------------------------
    #[error("invalid settings: {reason}")]
    InvalidSettings { reason: String },

    // -- Internal -----------------------------------------------------------
    #[error("numeric error: {reason}")]
    Numeric { reason: String },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl StrategyError {
    /// Whether a keeper should simply poll again later.
    ///
    /// Cooldowns and stale oracles clear with time; everything else needs
    /// a state change (price move, operator action) first.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CooldownActive { .. } | Self::OracleStale { .. } | Self::NoRebalanceNeeded { .. }
        )
    }

    pub(crate) fn no_rebalance(reason: impl Into<String>) -> Self {
        Self::NoRebalanceNeeded {
            reason: reason.into(),
        }
    }

    pub(crate) fn numeric(reason: impl Into<String>) -> Self {
        Self::Numeric {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_display_carries_context() {
        let err = StrategyError::CooldownActive {
            venue: "uniswap".into(),
            remaining_seconds: 12,
        };
        assert_eq!(err.to_string(), "cooldown active on uniswap: 12s remaining");

        let err = StrategyError::Undercollateralized {
            collateral_value: dec!(100),
            debt_value: dec!(120),
        };
        assert!(err.to_string().contains("undercollateralized"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(StrategyError::no_rebalance("idle").is_transient());
        assert!(StrategyError::OracleStale {
            feed: Address::ZERO,
            age_seconds: 10,
            max_seconds: 5,
        }
        .is_transient());
        assert!(!StrategyError::InvalidVenue {
            venue: "x".into()
        }
        .is_transient());
        assert!(!StrategyError::Unauthorized {
            caller: Address::ZERO,
            action: "rebalance",
        }
        .is_transient());
    }
}
