use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which way a trade moves the leverage ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    /// Borrow more, buy collateral.
    Lever,
    /// Sell collateral, repay debt.
    Delever,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lever => "lever",
            Self::Delever => "delever",
        }
    }
}

/// Evaluated state of the decision machine for one venue at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceState {
    Idle,
    RebalanceDue,
    TwapInProgress,
    RipcordEligible,
}

/// Entry point a keeper should call next on a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceAction {
    None,
    Rebalance,
    Iterate,
    Ripcord,
}

impl RebalanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rebalance => "rebalance",
            Self::Iterate => "iterate",
            Self::Ripcord => "ripcord",
        }
    }
}

/// Progress of a multi-chunk rebalance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TwapState {
    #[default]
    Idle,
    RebalanceTarget {
        #[serde(with = "rust_decimal::serde::str")]
        leverage_ratio: Decimal,
        direction: TradeDirection,
        /// Collateral units still to trade, as estimated after the last chunk.
        #[serde(with = "rust_decimal::serde::str")]
        remaining_notional: Decimal,
    },
}

impl TwapState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::RebalanceTarget { .. })
    }

    pub fn target(&self) -> Option<Decimal> {
        match self {
            Self::Idle => None,
            Self::RebalanceTarget { leverage_ratio, .. } => Some(*leverage_ratio),
        }
    }
}

/// Result of sizing one chunk, in collateral units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSize {
    /// Collateral units to trade in this chunk.
    pub notional: Decimal,
    /// Collateral units needed to reach the target in one go.
    pub total_notional: Decimal,
    /// True when more chunks are needed after this one, normally because
    /// `notional` is smaller than `total_notional`.
    pub is_chunked: bool,
}

/// Entry point that produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Engage,
    Rebalance,
    Iterate,
    Ripcord,
    Disengage,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engage => "engage",
            Self::Rebalance => "rebalance",
            Self::Iterate => "iterate",
            Self::Ripcord => "ripcord",
            Self::Disengage => "disengage",
        }
    }
}

/// Record of one executed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub kind: TradeKind,
    pub venue: String,
    pub direction: TradeDirection,
    #[serde(with = "rust_decimal::serde::str")]
    pub target_leverage_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub leverage_before: Decimal,
    /// `None` when the post-trade position could not be priced.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub leverage_after: Option<Decimal>,
    /// Collateral bought (lever) or sold (delever), whole tokens.
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_amount: Decimal,
    /// Borrow asset borrowed (lever) or received (delever), whole tokens.
    #[serde(with = "rust_decimal::serde::str")]
    pub borrow_amount: Decimal,
    pub is_chunked: bool,
    pub timestamp: u64,
}

/// Result of `iterate_rebalance`.
#[derive(Debug, Clone, PartialEq)]
pub enum IterateOutcome {
    /// Another chunk executed toward the stored target.
    Executed(ChunkReport),
    /// The position already reached (or crossed) the target; the TWAP was
    /// cleared without trading.
    TwapCleared {
        target_leverage_ratio: Decimal,
        current_leverage_ratio: Decimal,
    },
}

/// Result of a successful ripcord.
#[derive(Debug, Clone, PartialEq)]
pub struct RipcordOutcome {
    pub report: ChunkReport,
    pub recipient: Address,
    /// Reward actually paid; zero when the reserve was empty.
    pub reward_paid: Decimal,
}
