use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::RootProvider;
use alloy::transports::http::reqwest::Url;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fli_strategy::config::{self, FliConfig};
use fli_strategy::constants::DEFAULT_CONFIG_DIR;
use fli_strategy::core::clock::{Clock, SystemClock};
use fli_strategy::core::guard::AccessList;
use fli_strategy::core::keeper::Keeper;
use fli_strategy::core::oracle::{PriceOracle, SharedPriceOracle};
use fli_strategy::core::strategy::FlexibleLeverageStrategy;
use fli_strategy::execution::chainlink::ChainlinkPoller;
use fli_strategy::execution::paper::{PaperLedger, PaperVenue};
use fli_strategy::logging;
use fli_strategy::types::fixed_point::decimal_to_units;
use fli_strategy::types::StrategyConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = std::env::var("FLI_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));

    let config = config::load_config(&config_dir)?;

    // Hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    let strategy_config = config.strategy.to_strategy_config()?;
    let keeper_address = config.keeper.keeper()?;
    let operator = config.keeper.operator()?;

    info!(
        collateral = %strategy_config.collateral_asset,
        borrow = %strategy_config.borrow_asset,
        venues = config.exchanges.len(),
        live_feeds = config.keeper.rpc_url.is_some(),
        "FLI keeper starting"
    );

    // -----------------------------------------------------------------------
    // Price feeds
    // -----------------------------------------------------------------------

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let prices = SharedPriceOracle::new();
    let shutdown = CancellationToken::new();

    seed_paper_prices(&prices, &strategy_config, &config, clock.now())?;

    let feed_handle = spawn_feed_task(
        &config,
        &strategy_config,
        prices.clone(),
        clock.clone(),
        shutdown.clone(),
    )
    .await?;

    // -----------------------------------------------------------------------
    // Strategy
    // -----------------------------------------------------------------------

    let strategy = Arc::new(build_strategy(
        &config,
        strategy_config,
        prices,
        clock,
        operator,
    )?);

    if config.keeper.engage_on_start {
        engage_on_start(&strategy, operator, &config);
    }

    // -----------------------------------------------------------------------
    // Keeper loop
    // -----------------------------------------------------------------------

    let keeper = Keeper::new(
        strategy.clone(),
        keeper_address,
        Duration::from_secs(config.keeper.poll_interval_seconds),
        shutdown.clone(),
    );

    let keeper_handle = tokio::spawn(async move {
        if let Err(e) = keeper.run().await {
            error!(error = %e, "keeper exited with error");
        }
    });

    info!("all tasks running, press Ctrl+C to shut down");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutdown signal received, stopping gracefully...");
    shutdown.cancel();

    let (keeper_res, feed_res) = tokio::join!(keeper_handle, feed_handle);
    if let Err(e) = keeper_res {
        error!(error = %e, "keeper task panicked");
    }
    if let Err(e) = feed_res {
        error!(error = %e, "price feed task panicked");
    }

    match strategy.position_snapshot() {
        Ok(state) => info!(
            leverage = %state.current_leverage_ratio,
            collateral_value = %state.collateral_value,
            debt_value = %state.debt_value,
            "final position"
        ),
        Err(e) => warn!(error = %e, "final position unavailable"),
    }

    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Initialization helpers
// ---------------------------------------------------------------------------

/// Write the configured paper prices so the engine has a reading before the
/// first poll lands.
fn seed_paper_prices(
    prices: &SharedPriceOracle,
    strategy: &StrategyConfig,
    config: &FliConfig,
    now: u64,
) -> Result<()> {
    let paper = &config.keeper.paper;
    prices.set_price(
        strategy.collateral_price_oracle,
        paper.collateral_price,
        strategy.oracle_decimals,
        now,
    )?;
    prices.set_price(
        strategy.borrow_price_oracle,
        paper.borrow_price,
        strategy.oracle_decimals,
        now,
    )?;
    Ok(())
}

/// Live Chainlink poller when an RPC URL is configured, otherwise a
/// heartbeat that keeps the paper prices fresh.
async fn spawn_feed_task(
    config: &FliConfig,
    strategy: &StrategyConfig,
    prices: SharedPriceOracle,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let interval = Duration::from_secs(config.keeper.feed_poll_interval_seconds);
    let feeds = vec![strategy.collateral_price_oracle, strategy.borrow_price_oracle];

    if let Some(url) = &config.keeper.rpc_url {
        let rpc_url: Url = url.parse().context("failed to parse RPC URL")?;
        let provider = RootProvider::new_http(rpc_url);
        let poller = ChainlinkPoller::new(
            provider,
            feeds,
            strategy.oracle_decimals,
            prices,
            interval,
            shutdown,
        );
        poller.verify_decimals().await?;
        poller
            .poll_once()
            .await
            .context("initial feed poll failed")?;
        return Ok(tokio::spawn(async move {
            if let Err(e) = poller.run().await {
                error!(error = %e, "chainlink poller exited with error");
            }
        }));
    }

    info!("no rpc_url configured, using paper prices");
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    let now = clock.now();
                    for &feed in &feeds {
                        if let Err(e) = prices.touch(feed, now) {
                            warn!(feed = %feed, error = %e, "paper price heartbeat failed");
                        }
                    }
                }
            }
        }
    }))
}

fn build_strategy(
    config: &FliConfig,
    strategy_config: StrategyConfig,
    prices: SharedPriceOracle,
    clock: Arc<dyn Clock>,
    operator: Address,
) -> Result<FlexibleLeverageStrategy> {
    let paper = &config.keeper.paper;
    let oracle: Arc<dyn PriceOracle> = Arc::new(prices);

    let collateral = decimal_to_units(paper.initial_collateral, strategy_config.collateral_decimals)?;
    let ledger = Arc::new(PaperLedger::new(collateral, paper.lending_limits()));

    let strategy = FlexibleLeverageStrategy::new(
        strategy_config.clone(),
        config.settings(),
        ledger,
        oracle.clone(),
        clock,
        operator,
        AccessList::new(config.keeper.allowed()?),
    )?;
    strategy.set_anyone_callable(operator, config.keeper.anyone_callable)?;

    for entry in &config.exchanges {
        let venue = Arc::new(PaperVenue::new(
            entry.name.clone(),
            oracle.clone(),
            strategy_config.clone(),
            entry.paper_fee_bps,
        ));
        strategy.add_venue(operator, &entry.name, venue, entry.settings.clone())?;
    }

    if paper.reward_deposit > Decimal::ZERO {
        let reserve = strategy.deposit_reward(paper.reward_deposit)?;
        info!(%reserve, "ripcord reward reserve funded");
    }

    Ok(strategy)
}

/// Lever up the fresh position through the first configured venue. A
/// position that is already engaged is left alone.
fn engage_on_start(strategy: &FlexibleLeverageStrategy, operator: Address, config: &FliConfig) {
    let Some(venue) = config.exchanges.first() else {
        return;
    };
    match strategy.engage(operator, &venue.name) {
        Ok(report) => info!(
            venue = %report.venue,
            leverage_after = ?report.leverage_after,
            chunked = report.is_chunked,
            "position engaged"
        ),
        Err(e) => warn!(venue = %venue.name, error = %e, "engage on start skipped"),
    }
}
