pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Load and merge all config JSON files into a single [`FliConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   strategy.json
///   methodology.json
///   execution.json
///   incentive.json
///   exchanges.json
///   keeper.json
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                      | Config Field                          |
/// |------------------------------|---------------------------------------|
/// | `FLI_RPC_URL`                | `keeper.rpc_url`                      |
/// | `FLI_KEEPER_ADDRESS`         | `keeper.keeper_address`               |
/// | `FLI_POLL_INTERVAL_SECONDS`  | `keeper.poll_interval_seconds`        |
/// | `FLI_ENGAGE_ON_START`        | `keeper.engage_on_start`              |
/// | `FLI_TARGET_LEVERAGE_RATIO`  | `methodology.target_leverage_ratio`   |
pub fn load_config(config_dir: &Path) -> Result<FliConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let mut config = FliConfig {
        app: parse(&read("app.json")?, "app.json")?,
        strategy: parse(&read("strategy.json")?, "strategy.json")?,
        methodology: parse(&read("methodology.json")?, "methodology.json")?,
        execution: parse(&read("execution.json")?, "execution.json")?,
        incentive: parse(&read("incentive.json")?, "incentive.json")?,
        exchanges: parse(&read("exchanges.json")?, "exchanges.json")?,
        keeper: parse(&read("keeper.json")?, "keeper.json")?,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

fn parse<T: DeserializeOwned>(contents: &str, name: &str) -> Result<T> {
    serde_json::from_str(contents).with_context(|| format!("parsing {name}"))
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are logged and skipped
/// (the JSON value remains).
fn apply_env_overrides(config: &mut FliConfig) {
    // -- Keeper --------------------------------------------------------------
    if let Some(val) = env_string("FLI_RPC_URL") {
        info!("env override: FLI_RPC_URL");
        config.keeper.rpc_url = Some(val);
    }

    if let Some(val) = env_string("FLI_KEEPER_ADDRESS") {
        info!(%val, "env override: FLI_KEEPER_ADDRESS");
        config.keeper.keeper_address = val;
    }

    if let Some(val) = env_parse::<u64>("FLI_POLL_INTERVAL_SECONDS") {
        info!(val, "env override: FLI_POLL_INTERVAL_SECONDS");
        config.keeper.poll_interval_seconds = val;
    }

    if let Some(val) = env_bool("FLI_ENGAGE_ON_START") {
        info!(val, "env override: FLI_ENGAGE_ON_START");
        config.keeper.engage_on_start = val;
    }

    // -- Methodology ---------------------------------------------------------
    if let Some(val) = env_decimal("FLI_TARGET_LEVERAGE_RATIO") {
        info!(%val, "env override: FLI_TARGET_LEVERAGE_RATIO");
        config.methodology.target_leverage_ratio = val;
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`, `1`, `yes` → true).
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Read a non-empty env var and parse it as `Decimal`.
fn env_decimal(key: &str) -> Option<Decimal> {
    env_string(key).and_then(|v| Decimal::from_str(&v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CHAINLINK_ETH_USD, TOKEN_USDC, TOKEN_WETH};
    use rust_decimal_macros::dec;
    use serial_test::serial;
    use std::path::PathBuf;

    fn project_config_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config")
    }

    // -----------------------------------------------------------------------
    // Helper: write a minimal set of config JSON files to a temp dir.
    // -----------------------------------------------------------------------

    fn write_test_configs(dir: &Path) {
        std::fs::write(
            dir.join("app.json"),
            r#"{ "logging": { "log_dir": "logs" } }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("strategy.json"),
            r#"{
                "collateral_asset": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
                "borrow_asset": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                "collateral_price_oracle": "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419",
                "borrow_price_oracle": "0x8fFfFfd4AfB6115b954Bd326cbe7B4BA576818f6",
                "collateral_decimals": 18,
                "borrow_decimals": 6,
                "oracle_max_staleness_seconds": 3600
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("methodology.json"),
            r#"{
                "target_leverage_ratio": "2.0",
                "min_leverage_ratio": "1.7",
                "max_leverage_ratio": "2.3",
                "recentering_speed": "0.05",
                "rebalance_interval": 86400
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("execution.json"),
            r#"{
                "unutilized_leverage_percentage": "0.01",
                "twap_cooldown_period": 30,
                "slippage_tolerance": "0.01"
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("incentive.json"),
            r#"{
                "incentivized_leverage_ratio": "2.7",
                "incentivized_twap_cooldown_period": 1,
                "incentivized_slippage_tolerance": "0.05",
                "ether_reward": "1"
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("exchanges.json"),
            r#"[
                {
                    "name": "paper-dex",
                    "twap_max_trade_size": "5",
                    "incentivized_twap_max_trade_size": "10",
                    "lever_route": "0x01",
                    "paper_fee_bps": 10
                }
            ]"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("keeper.json"),
            r#"{
                "keeper_address": "0x1111111111111111111111111111111111111111",
                "operator_address": "0x2222222222222222222222222222222222222222",
                "allowed_callers": ["0x1111111111111111111111111111111111111111"],
                "paper": {
                    "initial_collateral": "10",
                    "max_ltv": "0.8",
                    "liquidation_threshold": "0.85",
                    "collateral_price": "2000",
                    "borrow_price": "1"
                }
            }"#,
        )
        .unwrap();
    }

    /// Remove all env vars that `apply_env_overrides` reads.
    fn clean_fli_env() {
        for key in [
            "FLI_RPC_URL",
            "FLI_KEEPER_ADDRESS",
            "FLI_POLL_INTERVAL_SECONDS",
            "FLI_ENGAGE_ON_START",
            "FLI_TARGET_LEVERAGE_RATIO",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_load_project_configs() {
        clean_fli_env();
        let config = load_config(&project_config_dir()).expect("project config should load");
        let strategy = config.strategy.to_strategy_config().unwrap();
        assert_eq!(strategy.collateral_asset, TOKEN_WETH);
        assert_eq!(strategy.borrow_asset, TOKEN_USDC);
        assert_eq!(strategy.collateral_price_oracle, CHAINLINK_ETH_USD);
        assert!(!config.exchanges.is_empty());
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_load_test_configs() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let config = load_config(tmp.path()).expect("test config should load");

        assert_eq!(config.app.logging.file_prefix, "fli-keeper.log");
        assert!(config.app.logging.filter.is_none());
        assert_eq!(config.strategy.oracle_decimals, 8);
        assert_eq!(config.methodology.target_leverage_ratio, dec!(2.0));
        assert_eq!(config.keeper.poll_interval_seconds, 15);
        assert!(config.keeper.rpc_url.is_none());
        assert!(!config.keeper.engage_on_start);
        assert_eq!(config.keeper.paper.reward_deposit, Decimal::ZERO);

        let venue = &config.exchanges[0];
        assert_eq!(venue.name, "paper-dex");
        assert_eq!(venue.settings.lever_route, vec![0x01]);
        assert!(venue.settings.delever_route.is_empty());
        assert_eq!(venue.settings.last_trade_timestamp, 0);
        assert_eq!(venue.paper_fee_bps, 10);
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_missing_config_file_errors() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("failed to read config file"),
            "expected file-not-found error, got: {err}"
        );
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_malformed_json_names_file() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::fs::write(tmp.path().join("incentive.json"), "{ not json").unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("incentive.json"), "got: {err}");
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_env_override_rpc_url() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("FLI_RPC_URL", "https://eth.example.com");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.keeper.rpc_url.as_deref(), Some("https://eth.example.com"));
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_env_override_target_ratio() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("FLI_TARGET_LEVERAGE_RATIO", "2.1");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.methodology.target_leverage_ratio, dec!(2.1));
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_env_override_target_outside_band_rejected() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("FLI_TARGET_LEVERAGE_RATIO", "2.5");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("target_leverage_ratio"),
            "expected band error, got: {err}"
        );
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_env_override_keeper_and_poll() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("FLI_KEEPER_ADDRESS", "0x3333333333333333333333333333333333333333");
        std::env::set_var("FLI_POLL_INTERVAL_SECONDS", "60");
        std::env::set_var("FLI_ENGAGE_ON_START", "yes");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(
            config.keeper.keeper_address,
            "0x3333333333333333333333333333333333333333"
        );
        assert_eq!(config.keeper.poll_interval_seconds, 60);
        assert!(config.keeper.engage_on_start);
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_string_ignored() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("FLI_POLL_INTERVAL_SECONDS", "");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.keeper.poll_interval_seconds, 15);
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_parse_ignored() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("FLI_POLL_INTERVAL_SECONDS", "soon");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.keeper.poll_interval_seconds, 15);
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_validation_reports_every_error() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::fs::write(
            tmp.path().join("exchanges.json"),
            r#"[
                { "name": "dup", "twap_max_trade_size": "0", "incentivized_twap_max_trade_size": "1" },
                { "name": "dup", "twap_max_trade_size": "1", "incentivized_twap_max_trade_size": "1" }
            ]"#,
        )
        .unwrap();
        let err = load_config(tmp.path()).unwrap_err().to_string();
        assert!(err.contains("2 errors"), "got: {err}");
        assert!(err.contains("duplicate venue name 'dup'"));
        assert!(err.contains("twap_max_trade_size must be > 0"));
        clean_fli_env();
    }

    #[test]
    #[serial]
    fn test_bad_address_rejected() {
        clean_fli_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::env::set_var("FLI_KEEPER_ADDRESS", "0x1234");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("keeper.keeper_address"), "got: {err}");
        clean_fli_env();
    }

    #[test]
    fn test_strategy_config_conversion() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let raw = std::fs::read_to_string(tmp.path().join("strategy.json")).unwrap();
        let file: StrategyFileConfig = serde_json::from_str(&raw).unwrap();
        let parsed = file.to_strategy_config().unwrap();
        assert_eq!(parsed.collateral_asset, TOKEN_WETH);
        assert_eq!(parsed.borrow_decimals, 6);
        assert_eq!(parsed.oracle_decimals, 8);
    }
}
