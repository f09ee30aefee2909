//! Price oracle adapter.
//!
//! Two independent feeds (collateral, borrow) are read per call and
//! normalized to `Decimal` prices in the feeds' common quote unit. A
//! reading older than the configured bound fails with `OracleStale`; a
//! non-positive answer fails with `InvalidPrice`. Neither is ever
//! escalated to anything else.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use alloy::primitives::Address;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::errors::StrategyError;
use crate::types::fixed_point::{answer_to_price, price_to_answer};
use crate::types::StrategyConfig;

/// Raw feed answer, Chainlink-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceReading {
    pub answer: i128,
    pub decimals: u8,
    /// Unix seconds of the round that produced `answer`.
    pub updated_at: u64,
}

/// Anything that can answer "latest reading for feed X" synchronously.
pub trait PriceOracle: Send + Sync {
    fn latest_reading(&self, feed: Address) -> Result<PriceReading, StrategyError>;
}

/// Normalize a reading to a price, rejecting stale and non-positive answers.
pub fn normalized_price(
    feed: Address,
    reading: &PriceReading,
    now: u64,
    max_staleness_seconds: u64,
) -> Result<Decimal, StrategyError> {
    let age = now.saturating_sub(reading.updated_at);
    if age > max_staleness_seconds {
        warn!(feed = %feed, age, max_staleness_seconds, "oracle reading stale");
        return Err(StrategyError::OracleStale {
            feed,
            age_seconds: age,
            max_seconds: max_staleness_seconds,
        });
    }

    answer_to_price(reading.answer, reading.decimals).ok_or_else(|| {
        StrategyError::InvalidPrice {
            feed,
            reason: format!(
                "answer {} at {} decimals is not a positive price",
                reading.answer, reading.decimals
            ),
        }
    })
}

/// Collateral and borrow prices, both in the feeds' quote unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricePair {
    pub collateral: Decimal,
    pub borrow: Decimal,
}

/// Read and validate both feeds named by `config`.
pub fn read_prices(
    oracle: &dyn PriceOracle,
    config: &StrategyConfig,
    now: u64,
) -> Result<PricePair, StrategyError> {
    let max = config.oracle_max_staleness_seconds;

    let reading = oracle.latest_reading(config.collateral_price_oracle)?;
    let collateral = normalized_price(config.collateral_price_oracle, &reading, now, max)?;

    let reading = oracle.latest_reading(config.borrow_price_oracle)?;
    let borrow = normalized_price(config.borrow_price_oracle, &reading, now, max)?;

    debug!(%collateral, %borrow, "prices read");
    Ok(PricePair { collateral, borrow })
}

/// In-memory feed snapshot shared between writers (the Chainlink poller,
/// a dry-run price driver, tests) and the synchronous engine.
///
/// Cloning shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct SharedPriceOracle {
    readings: Arc<RwLock<HashMap<Address, PriceReading>>>,
}

impl SharedPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw reading for `feed`, replacing any older one.
    pub fn update(&self, feed: Address, reading: PriceReading) -> Result<(), StrategyError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StrategyError::LockPoisoned("price snapshot"))?;
        readings.insert(feed, reading);
        Ok(())
    }

    /// Store a `Decimal` price for `feed` encoded at `decimals`.
    pub fn set_price(
        &self,
        feed: Address,
        price: Decimal,
        decimals: u8,
        updated_at: u64,
    ) -> Result<(), StrategyError> {
        let answer = price_to_answer(price, decimals).ok_or_else(|| StrategyError::InvalidPrice {
            feed,
            reason: format!("price {price} not representable at {decimals} decimals"),
        })?;
        self.update(
            feed,
            PriceReading {
                answer,
                decimals,
                updated_at,
            },
        )
    }

    /// Re-stamp an existing reading without changing its answer.
    pub fn touch(&self, feed: Address, updated_at: u64) -> Result<bool, StrategyError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StrategyError::LockPoisoned("price snapshot"))?;
        Ok(match readings.get_mut(&feed) {
            Some(reading) => {
                reading.updated_at = updated_at;
                true
            }
            None => false,
        })
    }
}

impl PriceOracle for SharedPriceOracle {
    fn latest_reading(&self, feed: Address) -> Result<PriceReading, StrategyError> {
        let readings = self
            .readings
            .read()
            .map_err(|_| StrategyError::LockPoisoned("price snapshot"))?;
        readings
            .get(&feed)
            .copied()
            .ok_or_else(|| StrategyError::InvalidPrice {
                feed,
                reason: "no reading received yet".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use rust_decimal_macros::dec;

    const FEED: Address = address!("5f4eC3Df9cbd43714FE2740f5E3616155c5b8419");

    fn reading(answer: i128, updated_at: u64) -> PriceReading {
        PriceReading {
            answer,
            decimals: 8,
            updated_at,
        }
    }

    #[test]
    fn test_normalized_price_fresh() {
        let price = normalized_price(FEED, &reading(200_000_000_000, 1_000), 1_060, 3_600).unwrap();
        assert_eq!(price, dec!(2000));
    }

    #[test]
    fn test_stale_reading_rejected() {
        let err = normalized_price(FEED, &reading(200_000_000_000, 1_000), 5_000, 3_600)
            .expect_err("4000s old must be stale");
        assert_eq!(
            err,
            StrategyError::OracleStale {
                feed: FEED,
                age_seconds: 4_000,
                max_seconds: 3_600,
            }
        );
    }

    #[test]
    fn test_staleness_boundary_inclusive() {
        assert!(normalized_price(FEED, &reading(1, 1_000), 4_600, 3_600).is_ok());
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        assert!(normalized_price(FEED, &reading(1, 2_000), 1_000, 10).is_ok());
    }

    #[test]
    fn test_non_positive_answer_rejected() {
        let err = normalized_price(FEED, &reading(0, 1_000), 1_000, 10).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidPrice { .. }));
        let err = normalized_price(FEED, &reading(-1, 1_000), 1_000, 10).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidPrice { .. }));
    }

    #[test]
    fn test_shared_oracle_roundtrip() {
        let oracle = SharedPriceOracle::new();
        assert!(oracle.latest_reading(FEED).is_err());

        oracle.set_price(FEED, dec!(1999.5), 8, 42).unwrap();
        let got = oracle.latest_reading(FEED).unwrap();
        assert_eq!(got.answer, 199_950_000_000);
        assert_eq!(got.updated_at, 42);

        let shared = oracle.clone();
        assert!(shared.touch(FEED, 100).unwrap());
        assert_eq!(oracle.latest_reading(FEED).unwrap().updated_at, 100);
        assert!(!shared.touch(Address::ZERO, 100).unwrap());
    }
}
