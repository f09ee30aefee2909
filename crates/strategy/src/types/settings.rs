use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_DECIMALS, UNLEVERED_RATIO};
use crate::errors::StrategyError;

use super::fixed_point::pow10;

/// Immutable identity of the managed position: which assets, which feeds,
/// and how to normalize their native precision.
///
/// There is no setter: asset identifiers cannot change once the strategy
/// exists, so they cannot change once the position is engaged either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyConfig {
    pub collateral_asset: Address,
    pub borrow_asset: Address,
    pub collateral_price_oracle: Address,
    pub borrow_price_oracle: Address,
    pub collateral_decimals: u8,
    pub borrow_decimals: u8,
    /// Fixed output precision of both price feeds.
    pub oracle_decimals: u8,
    pub oracle_max_staleness_seconds: u64,
}

impl StrategyConfig {
    /// Scale from one whole collateral token to native units.
    pub fn collateral_decimal_adjustment(&self) -> Decimal {
        pow10(self.collateral_decimals)
    }

    /// Scale from one whole borrow token to native units.
    pub fn borrow_decimal_adjustment(&self) -> Decimal {
        pow10(self.borrow_decimals)
    }

    pub fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.collateral_asset == self.borrow_asset {
            errors.push("strategy: collateral and borrow asset must differ".into());
        }
        if self.collateral_asset.is_zero() || self.borrow_asset.is_zero() {
            errors.push("strategy: asset addresses must be non-zero".into());
        }
        if self.collateral_price_oracle.is_zero() || self.borrow_price_oracle.is_zero() {
            errors.push("strategy: oracle addresses must be non-zero".into());
        }
        for (name, decimals) in [
            ("collateral_decimals", self.collateral_decimals),
            ("borrow_decimals", self.borrow_decimals),
            ("oracle_decimals", self.oracle_decimals),
        ] {
            if decimals > MAX_DECIMALS {
                errors.push(format!("strategy: {name} ({decimals}) exceeds {MAX_DECIMALS}"));
            }
        }
        if self.oracle_max_staleness_seconds == 0 {
            errors.push("strategy: oracle_max_staleness_seconds must be > 0".into());
        }
    }
}

/// Leverage band and recentering behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodologySettings {
    #[serde(with = "rust_decimal::serde::str")]
    pub target_leverage_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_leverage_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_leverage_ratio: Decimal,
    /// Fraction of the gap to target closed per rebalance, in (0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub recentering_speed: Decimal,
    /// Minimum seconds between unforced rebalance cycles.
    pub rebalance_interval: u64,
}

/// Trade execution parameters for ordinary (non-emergency) chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Safety margin subtracted from max borrowing power, in [0, 1).
    #[serde(with = "rust_decimal::serde::str")]
    pub unutilized_leverage_percentage: Decimal,
    pub twap_cooldown_period: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub slippage_tolerance: Decimal,
}

/// Emergency (ripcord) parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncentiveSettings {
    #[serde(with = "rust_decimal::serde::str")]
    pub incentivized_leverage_ratio: Decimal,
    pub incentivized_twap_cooldown_period: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub incentivized_slippage_tolerance: Decimal,
    /// Bounty paid to the first successful ripcord caller.
    #[serde(with = "rust_decimal::serde::str")]
    pub ether_reward: Decimal,
}

/// Per-venue trade budget and bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// Largest ordinary chunk, in collateral units.
    #[serde(with = "rust_decimal::serde::str")]
    pub twap_max_trade_size: Decimal,
    /// Largest ripcord chunk, in collateral units.
    #[serde(with = "rust_decimal::serde::str")]
    pub incentivized_twap_max_trade_size: Decimal,
    /// Unix seconds of the last chunk executed on this venue.
    #[serde(default)]
    pub last_trade_timestamp: u64,
    /// Opaque venue payload for borrow → collateral trades.
    #[serde(default, with = "hex_bytes")]
    pub lever_route: Vec<u8>,
    /// Opaque venue payload for collateral → borrow trades.
    #[serde(default, with = "hex_bytes")]
    pub delever_route: Vec<u8>,
}

impl ExchangeSettings {
    pub fn collect_errors(&self, name: &str, errors: &mut Vec<String>) {
        if name.trim().is_empty() {
            errors.push("exchange: venue name is empty".into());
        }
        if self.twap_max_trade_size <= Decimal::ZERO {
            errors.push(format!("exchange.{name}: twap_max_trade_size must be > 0"));
        }
        if self.incentivized_twap_max_trade_size < self.twap_max_trade_size {
            errors.push(format!(
                "exchange.{name}: incentivized_twap_max_trade_size ({}) must be >= twap_max_trade_size ({})",
                self.incentivized_twap_max_trade_size, self.twap_max_trade_size
            ));
        }
    }
}

/// The three operator-tunable settings blocks, validated together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySettings {
    pub methodology: MethodologySettings,
    pub execution: ExecutionSettings,
    pub incentive: IncentiveSettings,
}

impl StrategySettings {
    /// Validate cross-block invariants, reporting every violation at once.
    pub fn validate(&self) -> Result<(), StrategyError> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StrategyError::InvalidSettings {
                reason: errors.join("; "),
            })
        }
    }

    pub fn collect_errors(&self, errors: &mut Vec<String>) {
        let m = &self.methodology;
        let e = &self.execution;
        let i = &self.incentive;

        if m.min_leverage_ratio <= UNLEVERED_RATIO {
            errors.push(format!(
                "methodology: min_leverage_ratio ({}) must be > 1",
                m.min_leverage_ratio
            ));
        }
        if m.min_leverage_ratio > m.target_leverage_ratio {
            errors.push(format!(
                "methodology: min_leverage_ratio ({}) must be <= target_leverage_ratio ({})",
                m.min_leverage_ratio, m.target_leverage_ratio
            ));
        }
        if m.target_leverage_ratio > m.max_leverage_ratio {
            errors.push(format!(
                "methodology: target_leverage_ratio ({}) must be <= max_leverage_ratio ({})",
                m.target_leverage_ratio, m.max_leverage_ratio
            ));
        }
        if m.recentering_speed <= Decimal::ZERO || m.recentering_speed > Decimal::ONE {
            errors.push(format!(
                "methodology: recentering_speed ({}) must be in (0, 1]",
                m.recentering_speed
            ));
        }
        if m.rebalance_interval == 0 {
            errors.push("methodology: rebalance_interval must be > 0".into());
        }

        if !is_fraction(e.unutilized_leverage_percentage) {
            errors.push(format!(
                "execution: unutilized_leverage_percentage ({}) must be in [0, 1)",
                e.unutilized_leverage_percentage
            ));
        }
        if !is_fraction(e.slippage_tolerance) {
            errors.push(format!(
                "execution: slippage_tolerance ({}) must be in [0, 1)",
                e.slippage_tolerance
            ));
        }

        if i.incentivized_leverage_ratio <= m.max_leverage_ratio {
            errors.push(format!(
                "incentive: incentivized_leverage_ratio ({}) must be > max_leverage_ratio ({})",
                i.incentivized_leverage_ratio, m.max_leverage_ratio
            ));
        }
        if i.incentivized_twap_cooldown_period > e.twap_cooldown_period {
            errors.push(format!(
                "incentive: incentivized_twap_cooldown_period ({}) must be <= twap_cooldown_period ({})",
                i.incentivized_twap_cooldown_period, e.twap_cooldown_period
            ));
        }
        if !is_fraction(i.incentivized_slippage_tolerance) {
            errors.push(format!(
                "incentive: incentivized_slippage_tolerance ({}) must be in [0, 1)",
                i.incentivized_slippage_tolerance
            ));
        } else if i.incentivized_slippage_tolerance < e.slippage_tolerance {
            errors.push(format!(
                "incentive: incentivized_slippage_tolerance ({}) must be >= slippage_tolerance ({})",
                i.incentivized_slippage_tolerance, e.slippage_tolerance
            ));
        }
        if i.ether_reward.is_sign_negative() && !i.ether_reward.is_zero() {
            errors.push("incentive: ether_reward must be >= 0".into());
        }
    }
}

fn is_fraction(value: Decimal) -> bool {
    value >= Decimal::ZERO && value < Decimal::ONE
}

/// Hex-encode/decode route payloads for JSON.
mod hex_bytes {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_settings() -> StrategySettings {
        StrategySettings {
            methodology: MethodologySettings {
                target_leverage_ratio: dec!(2.0),
                min_leverage_ratio: dec!(1.7),
                max_leverage_ratio: dec!(2.3),
                recentering_speed: dec!(0.5),
                rebalance_interval: 86_400,
            },
            execution: ExecutionSettings {
                unutilized_leverage_percentage: dec!(0.01),
                twap_cooldown_period: 30,
                slippage_tolerance: dec!(0.01),
            },
            incentive: IncentiveSettings {
                incentivized_leverage_ratio: dec!(2.7),
                incentivized_twap_cooldown_period: 1,
                incentivized_slippage_tolerance: dec!(0.05),
                ether_reward: dec!(1),
            },
        }
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(sample_settings().validate().is_ok());
    }

    #[test]
    fn test_band_ordering_enforced() {
        let mut s = sample_settings();
        s.methodology.min_leverage_ratio = dec!(2.1);
        let err = s.validate().expect_err("min above target must fail");
        assert!(err.to_string().contains("min_leverage_ratio"));
    }

    #[test]
    fn test_ratios_must_exceed_one() {
        let mut s = sample_settings();
        s.methodology.min_leverage_ratio = dec!(1.0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_recentering_speed_bounds() {
        let mut s = sample_settings();
        s.methodology.recentering_speed = dec!(1.0);
        assert!(s.validate().is_ok());
        s.methodology.recentering_speed = Decimal::ZERO;
        assert!(s.validate().is_err());
        s.methodology.recentering_speed = dec!(1.01);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_incentivized_ratio_above_max() {
        let mut s = sample_settings();
        s.incentive.incentivized_leverage_ratio = dec!(2.3);
        let err = s.validate().expect_err("incentivized == max must fail");
        assert!(err.to_string().contains("incentivized_leverage_ratio"));
    }

    #[test]
    fn test_all_errors_reported() {
        let mut s = sample_settings();
        s.execution.slippage_tolerance = dec!(1.5);
        s.incentive.incentivized_twap_cooldown_period = 60;
        let err = s.validate().expect_err("two violations");
        let msg = err.to_string();
        assert!(msg.contains("slippage_tolerance"));
        assert!(msg.contains("incentivized_twap_cooldown_period"));
    }

    #[test]
    fn test_exchange_settings_validation() {
        let settings = ExchangeSettings {
            twap_max_trade_size: dec!(5),
            incentivized_twap_max_trade_size: dec!(2),
            last_trade_timestamp: 0,
            lever_route: vec![],
            delever_route: vec![],
        };
        let mut errors = Vec::new();
        settings.collect_errors("uniswap", &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("incentivized_twap_max_trade_size"));
    }

    #[test]
    fn test_route_hex_roundtrip_through_json() {
        let json = r#"{
            "twap_max_trade_size": "5",
            "incentivized_twap_max_trade_size": "10",
            "lever_route": "0xdeadbeef"
        }"#;
        let parsed: ExchangeSettings = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.lever_route, vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(parsed.delever_route.is_empty());
        assert_eq!(parsed.last_trade_timestamp, 0);
    }
}
