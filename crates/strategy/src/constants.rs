use alloy::primitives::{address, Address};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Numeric Constants
// ---------------------------------------------------------------------------

/// A leverage ratio of exactly 1.0: an unlevered position.
pub const UNLEVERED_RATIO: Decimal = dec!(1);

/// Leverage gaps below this are treated as "already at target".
pub const LEVERAGE_EPSILON: Decimal = dec!(0.000000001);

/// Largest decimals count representable by `Decimal` scale.
pub const MAX_DECIMALS: u8 = 28;

/// Chainlink USD feeds report 8 decimals.
pub const CHAINLINK_USD_DECIMALS: u8 = 8;

// ---------------------------------------------------------------------------
// Ethereum Mainnet Chainlink Feeds
// ---------------------------------------------------------------------------

pub const CHAINLINK_ETH_USD: Address = address!("5f4eC3Df9cbd43714FE2740f5E3616155c5b8419");
pub const CHAINLINK_USDC_USD: Address = address!("8fFfFfd4AfB6115b954Bd326cbe7B4BA576818f6");

// ---------------------------------------------------------------------------
// Ethereum Mainnet Tokens
// ---------------------------------------------------------------------------

pub const TOKEN_WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
pub const TOKEN_USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

// ---------------------------------------------------------------------------
// Keeper Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_CONFIG_DIR: &str = "config";
pub const DEFAULT_LOG_FILTER: &str = "fli_strategy=info,fli_keeper=info,warn";
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 15;
pub const DEFAULT_FEED_POLL_INTERVAL_SECONDS: u64 = 10;

/// Consecutive failed keeper ticks before the poll interval backs off.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Poll interval multiplier applied while the failure breaker is open.
pub const FAILURE_BACKOFF_MULTIPLIER: u32 = 4;
