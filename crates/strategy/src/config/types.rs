use std::path::PathBuf;
use std::str::FromStr;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::constants::{
    CHAINLINK_USD_DECIMALS, DEFAULT_FEED_POLL_INTERVAL_SECONDS, DEFAULT_POLL_INTERVAL_SECONDS,
};
use crate::types::{
    ExchangeSettings, ExecutionSettings, IncentiveSettings, LendingLimits, MethodologySettings,
    StrategyConfig, StrategySettings,
};

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FliConfig {
    pub app: AppConfig,
    pub strategy: StrategyFileConfig,
    pub methodology: MethodologySettings,
    pub execution: ExecutionSettings,
    pub incentive: IncentiveSettings,
    pub exchanges: Vec<ExchangeEntry>,
    pub keeper: KeeperConfig,
}

impl FliConfig {
    /// The three tunable settings blocks as the engine consumes them.
    pub fn settings(&self) -> StrategySettings {
        StrategySettings {
            methodology: self.methodology.clone(),
            execution: self.execution.clone(),
            incentive: self.incentive.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_file_prefix() -> String {
    "fli-keeper.log".into()
}

// ---------------------------------------------------------------------------
// strategy.json
// ---------------------------------------------------------------------------

/// Asset and feed identity as written on disk. Addresses stay strings here
/// so validation can report every malformed one at once.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyFileConfig {
    pub collateral_asset: String,
    pub borrow_asset: String,
    pub collateral_price_oracle: String,
    pub borrow_price_oracle: String,
    pub collateral_decimals: u8,
    pub borrow_decimals: u8,
    #[serde(default = "default_oracle_decimals")]
    pub oracle_decimals: u8,
    pub oracle_max_staleness_seconds: u64,
}

fn default_oracle_decimals() -> u8 {
    CHAINLINK_USD_DECIMALS
}

impl StrategyFileConfig {
    /// Parse into the engine's immutable strategy identity.
    pub fn to_strategy_config(&self) -> Result<StrategyConfig> {
        Ok(StrategyConfig {
            collateral_asset: parse_address("collateral_asset", &self.collateral_asset)?,
            borrow_asset: parse_address("borrow_asset", &self.borrow_asset)?,
            collateral_price_oracle: parse_address(
                "collateral_price_oracle",
                &self.collateral_price_oracle,
            )?,
            borrow_price_oracle: parse_address("borrow_price_oracle", &self.borrow_price_oracle)?,
            collateral_decimals: self.collateral_decimals,
            borrow_decimals: self.borrow_decimals,
            oracle_decimals: self.oracle_decimals,
            oracle_max_staleness_seconds: self.oracle_max_staleness_seconds,
        })
    }
}

// ---------------------------------------------------------------------------
// exchanges.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeEntry {
    pub name: String,
    #[serde(flatten)]
    pub settings: ExchangeSettings,
    /// Fee charged by the dry-run venue standing in for this exchange.
    #[serde(default)]
    pub paper_fee_bps: u32,
}

// ---------------------------------------------------------------------------
// keeper.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    pub keeper_address: String,
    pub operator_address: String,
    #[serde(default)]
    pub allowed_callers: Vec<String>,
    #[serde(default)]
    pub anyone_callable: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_feed_poll_interval")]
    pub feed_poll_interval_seconds: u64,
    /// Live Chainlink reads when set; paper prices otherwise.
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub engage_on_start: bool,
    pub paper: PaperConfig,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

fn default_feed_poll_interval() -> u64 {
    DEFAULT_FEED_POLL_INTERVAL_SECONDS
}

impl KeeperConfig {
    pub fn keeper(&self) -> Result<Address> {
        parse_address("keeper_address", &self.keeper_address)
    }

    pub fn operator(&self) -> Result<Address> {
        parse_address("operator_address", &self.operator_address)
    }

    pub fn allowed(&self) -> Result<Vec<Address>> {
        self.allowed_callers
            .iter()
            .map(|a| parse_address("allowed_callers", a))
            .collect()
    }
}

/// Seed state for the in-memory position and feeds.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    /// Whole collateral tokens held before engaging.
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_collateral: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_ltv: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub liquidation_threshold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub borrow_price: Decimal,
    /// Deposited into the ripcord reward reserve at startup.
    #[serde(default, with = "rust_decimal::serde::str")]
    pub reward_deposit: Decimal,
}

impl PaperConfig {
    pub fn lending_limits(&self) -> LendingLimits {
        LendingLimits {
            max_ltv: self.max_ltv,
            liquidation_threshold: self.liquidation_threshold,
        }
    }
}

fn parse_address(field: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw).with_context(|| format!("{field}: invalid address '{raw}'"))
}
