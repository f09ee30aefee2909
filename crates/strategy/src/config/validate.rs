use std::collections::HashSet;

use anyhow::{bail, Result};
use rust_decimal::Decimal;

use super::types::FliConfig;

/// Validate invariants across the merged config that serde alone cannot enforce.
/// Called automatically by [`super::load_config`].
pub fn validate_config(config: &FliConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_strategy_config(config, &mut errors);
    config.settings().collect_errors(&mut errors);
    validate_exchanges(config, &mut errors);
    validate_keeper_config(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

// ---------------------------------------------------------------------------
// Strategy identity
// ---------------------------------------------------------------------------

fn validate_strategy_config(config: &FliConfig, errors: &mut Vec<String>) {
    let s = &config.strategy;
    let addrs = [
        ("collateral_asset", &s.collateral_asset),
        ("borrow_asset", &s.borrow_asset),
        ("collateral_price_oracle", &s.collateral_price_oracle),
        ("borrow_price_oracle", &s.borrow_price_oracle),
    ];
    let mut malformed = false;
    for (name, addr) in &addrs {
        if let Err(e) = validate_address(addr) {
            errors.push(format!("strategy.{name}: {e}"));
            malformed = true;
        }
    }
    // Semantic checks need parsed addresses.
    if !malformed {
        match s.to_strategy_config() {
            Ok(parsed) => parsed.collect_errors(errors),
            Err(e) => errors.push(format!("strategy: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Exchanges
// ---------------------------------------------------------------------------

fn validate_exchanges(config: &FliConfig, errors: &mut Vec<String>) {
    if config.exchanges.is_empty() {
        errors.push("exchanges: at least one venue is required".into());
    }
    let mut seen = HashSet::new();
    for entry in &config.exchanges {
        if !seen.insert(entry.name.as_str()) {
            errors.push(format!("exchanges: duplicate venue name '{}'", entry.name));
        }
        entry.settings.collect_errors(&entry.name, errors);
        if entry.paper_fee_bps >= 10_000 {
            errors.push(format!(
                "exchanges.{}: paper_fee_bps ({}) must be < 10000",
                entry.name, entry.paper_fee_bps
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Keeper
// ---------------------------------------------------------------------------

fn validate_keeper_config(config: &FliConfig, errors: &mut Vec<String>) {
    let k = &config.keeper;

    for (name, addr) in [
        ("keeper_address", &k.keeper_address),
        ("operator_address", &k.operator_address),
    ] {
        if let Err(e) = validate_address(addr) {
            errors.push(format!("keeper.{name}: {e}"));
        }
    }
    for addr in &k.allowed_callers {
        if let Err(e) = validate_address(addr) {
            errors.push(format!("keeper.allowed_callers: {e}"));
        }
    }

    if k.poll_interval_seconds == 0 {
        errors.push("keeper: poll_interval_seconds must be > 0".into());
    }
    if k.feed_poll_interval_seconds == 0 {
        errors.push("keeper: feed_poll_interval_seconds must be > 0".into());
    }
    // Feeds refreshed slower than the staleness bound are always stale.
    if k.rpc_url.is_some()
        && k.feed_poll_interval_seconds >= config.strategy.oracle_max_staleness_seconds
    {
        errors.push(format!(
            "keeper: feed_poll_interval_seconds ({}) must be < strategy.oracle_max_staleness_seconds ({})",
            k.feed_poll_interval_seconds, config.strategy.oracle_max_staleness_seconds
        ));
    }
    if let Some(url) = &k.rpc_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(format!("keeper.rpc_url: '{url}' must be an http(s) URL"));
        }
    }

    let p = &k.paper;
    if p.initial_collateral < Decimal::ZERO {
        errors.push("keeper.paper: initial_collateral must be >= 0".into());
    }
    if p.max_ltv <= Decimal::ZERO || p.max_ltv >= Decimal::ONE {
        errors.push(format!("keeper.paper: max_ltv ({}) must be in (0, 1)", p.max_ltv));
    }
    if p.liquidation_threshold < p.max_ltv || p.liquidation_threshold >= Decimal::ONE {
        errors.push(format!(
            "keeper.paper: liquidation_threshold ({}) must be in [max_ltv, 1)",
            p.liquidation_threshold
        ));
    }
    if p.collateral_price <= Decimal::ZERO || p.borrow_price <= Decimal::ZERO {
        errors.push("keeper.paper: prices must be > 0".into());
    }
    if p.reward_deposit < Decimal::ZERO {
        errors.push("keeper.paper: reward_deposit must be >= 0".into());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Basic EVM address format check (0x + 40 hex chars).
fn validate_address(addr: &str) -> Result<(), String> {
    if addr.is_empty() {
        return Err("address is empty".into());
    }
    if !addr.starts_with("0x") && !addr.starts_with("0X") {
        return Err(format!("address '{addr}' must start with 0x"));
    }
    if addr.len() != 42 {
        return Err(format!(
            "address '{addr}' has length {} (expected 42)",
            addr.len()
        ));
    }
    if !addr[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("address '{addr}' contains non-hex characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address_valid() {
        assert!(validate_address("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").is_ok());
        assert!(validate_address("0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419").is_ok());
    }

    #[test]
    fn test_validate_address_empty() {
        assert!(validate_address("").is_err());
    }

    #[test]
    fn test_validate_address_no_prefix() {
        let err = validate_address("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap_err();
        assert!(err.contains("must start with 0x"));
    }

    #[test]
    fn test_validate_address_wrong_length() {
        let err = validate_address("0xC02aaA39b223FE8D0A0e5C4F27eAD908").unwrap_err();
        assert!(err.contains("length"));
    }

    #[test]
    fn test_validate_address_non_hex() {
        let err = validate_address("0xZZ2aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap_err();
        assert!(err.contains("non-hex"));
    }
}
