//! Trade venue capability and the per-venue registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::U256;

use crate::errors::StrategyError;
use crate::types::ExchangeSettings;

/// One execution venue. Implementations own their routing; the engine
/// only passes the opaque route payload configured for the venue.
///
/// Both calls must either fill at or above the minimum or fail with
/// `SlippageExceeded` without side effects.
pub trait TradeVenue: Send + Sync {
    fn name(&self) -> &str;

    /// Sell `borrow_in` borrow-asset units for collateral.
    fn execute_lever_trade(
        &self,
        borrow_in: U256,
        min_collateral_out: U256,
        route: &[u8],
    ) -> Result<U256, StrategyError>;

    /// Sell `collateral_in` collateral units for borrow asset.
    fn execute_delever_trade(
        &self,
        collateral_in: U256,
        min_borrow_out: U256,
        route: &[u8],
    ) -> Result<U256, StrategyError>;
}

/// A registered venue with its settings.
#[derive(Clone)]
pub struct VenueEntry {
    pub venue: Arc<dyn TradeVenue>,
    pub settings: ExchangeSettings,
}

impl std::fmt::Debug for VenueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueEntry")
            .field("venue", &self.venue.name())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Venue name → entry. Ordered so keepers scan venues deterministically.
#[derive(Debug, Clone, Default)]
pub struct VenueRegistry {
    entries: BTreeMap<String, VenueEntry>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        name: &str,
        venue: Arc<dyn TradeVenue>,
        settings: ExchangeSettings,
    ) -> Result<(), StrategyError> {
        validate_exchange(name, &settings)?;
        if self.entries.contains_key(name) {
            return Err(StrategyError::InvalidSettings {
                reason: format!("venue {name} already registered"),
            });
        }
        self.entries
            .insert(name.to_string(), VenueEntry { venue, settings });
        Ok(())
    }

    /// Replace trade sizes and routes; the last trade timestamp is kept so
    /// an update cannot reset a cooldown.
    pub fn update(&mut self, name: &str, settings: ExchangeSettings) -> Result<(), StrategyError> {
        validate_exchange(name, &settings)?;
        let entry = self.entry_mut(name)?;
        let last = entry.settings.last_trade_timestamp;
        entry.settings = ExchangeSettings {
            last_trade_timestamp: last,
            ..settings
        };
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<VenueEntry, StrategyError> {
        self.entries
            .remove(name)
            .ok_or_else(|| StrategyError::InvalidVenue {
                venue: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Result<&VenueEntry, StrategyError> {
        self.entries
            .get(name)
            .ok_or_else(|| StrategyError::InvalidVenue {
                venue: name.to_string(),
            })
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut VenueEntry, StrategyError> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| StrategyError::InvalidVenue {
                venue: name.to_string(),
            })
    }

    /// Stamp a trade. Timestamps never move backwards.
    pub fn record_trade(&mut self, name: &str, now: u64) -> Result<(), StrategyError> {
        let entry = self.entry_mut(name)?;
        entry.settings.last_trade_timestamp = entry.settings.last_trade_timestamp.max(now);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VenueEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_exchange(name: &str, settings: &ExchangeSettings) -> Result<(), StrategyError> {
    let mut errors = Vec::new();
    settings.collect_errors(name, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(StrategyError::InvalidSettings {
            reason: errors.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct NullVenue;

    impl TradeVenue for NullVenue {
        fn name(&self) -> &str {
            "null"
        }

        fn execute_lever_trade(&self, _: U256, min: U256, _: &[u8]) -> Result<U256, StrategyError> {
            Ok(min)
        }

        fn execute_delever_trade(&self, _: U256, min: U256, _: &[u8]) -> Result<U256, StrategyError> {
            Ok(min)
        }
    }

    fn settings() -> ExchangeSettings {
        ExchangeSettings {
            twap_max_trade_size: dec!(5),
            incentivized_twap_max_trade_size: dec!(10),
            last_trade_timestamp: 0,
            lever_route: vec![],
            delever_route: vec![],
        }
    }

    #[test]
    fn test_add_get_remove() {
        let mut reg = VenueRegistry::new();
        reg.add("uniswap", Arc::new(NullVenue), settings()).unwrap();
        assert!(reg.get("uniswap").is_ok());
        assert!(matches!(
            reg.get("sushi").unwrap_err(),
            StrategyError::InvalidVenue { .. }
        ));
        assert!(reg.add("uniswap", Arc::new(NullVenue), settings()).is_err());
        reg.remove("uniswap").unwrap();
        assert!(reg.is_empty());
        assert!(reg.remove("uniswap").is_err());
    }

    #[test]
    fn test_update_keeps_last_trade() {
        let mut reg = VenueRegistry::new();
        reg.add("uniswap", Arc::new(NullVenue), settings()).unwrap();
        reg.record_trade("uniswap", 500).unwrap();

        let mut next = settings();
        next.twap_max_trade_size = dec!(3);
        reg.update("uniswap", next).unwrap();

        let entry = reg.get("uniswap").unwrap();
        assert_eq!(entry.settings.twap_max_trade_size, dec!(3));
        assert_eq!(entry.settings.last_trade_timestamp, 500);
    }

    #[test]
    fn test_record_trade_is_monotonic() {
        let mut reg = VenueRegistry::new();
        reg.add("uniswap", Arc::new(NullVenue), settings()).unwrap();
        reg.record_trade("uniswap", 500).unwrap();
        reg.record_trade("uniswap", 400).unwrap();
        assert_eq!(reg.get("uniswap").unwrap().settings.last_trade_timestamp, 500);
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let mut reg = VenueRegistry::new();
        let mut bad = settings();
        bad.twap_max_trade_size = Decimal::ZERO;
        assert!(reg.add("uniswap", Arc::new(NullVenue), bad).is_err());
    }
}
