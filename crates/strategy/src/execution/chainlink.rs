//! Chainlink feed poller.
//!
//! Reads `latestRoundData` for each configured feed on a fixed interval and
//! writes the raw readings into a `SharedPriceOracle`. The engine reads that
//! snapshot synchronously and applies its own staleness bound, so a poller
//! that falls behind shows up as `OracleStale`, never as a silently old
//! price.

use std::time::Duration;

use alloy::primitives::{Address, I256, U256};
use alloy::providers::RootProvider;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::oracle::{PriceReading, SharedPriceOracle};
use crate::execution::contracts::IAggregatorV3;

pub type HttpProvider = RootProvider;

/// Build a reading from raw round data.
pub fn reading_from_round(answer: I256, updated_at: U256, decimals: u8) -> Result<PriceReading> {
    let answer: i128 = answer
        .to_string()
        .parse()
        .with_context(|| format!("feed answer {answer} does not fit in i128"))?;
    Ok(PriceReading {
        answer,
        decimals,
        updated_at: updated_at.saturating_to::<u64>(),
    })
}

pub struct ChainlinkPoller {
    provider: HttpProvider,
    feeds: Vec<Address>,
    decimals: u8,
    sink: SharedPriceOracle,
    interval: Duration,
    shutdown: CancellationToken,
}

impl ChainlinkPoller {
    pub fn new(
        provider: HttpProvider,
        feeds: Vec<Address>,
        decimals: u8,
        sink: SharedPriceOracle,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            feeds,
            decimals,
            sink,
            interval,
            shutdown,
        }
    }

    /// Check every feed reports the decimals the strategy was configured for.
    pub async fn verify_decimals(&self) -> Result<()> {
        for &feed in &self.feeds {
            let aggregator = IAggregatorV3::new(feed, self.provider.clone());
            let onchain = aggregator
                .decimals()
                .call()
                .await
                .with_context(|| format!("decimals() call failed for feed {feed}"))?;
            if onchain != self.decimals {
                anyhow::bail!(
                    "feed {feed} reports {onchain} decimals, configured {}",
                    self.decimals
                );
            }
        }
        info!(feeds = self.feeds.len(), decimals = self.decimals, "feed decimals verified");
        Ok(())
    }

    /// Poll until cancelled. A failed feed read is logged and retried on
    /// the next tick; the engine sees the reading age out.
    pub async fn run(&self) -> Result<()> {
        info!(feeds = self.feeds.len(), interval = ?self.interval, "chainlink poller started");
        loop {
            match self.poll_once().await {
                Ok(updated) => debug!(updated, "feeds refreshed"),
                Err(e) => error!(error = %e, "feed poll failed"),
            }
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("chainlink poller shutting down");
                    break;
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        Ok(())
    }

    /// Read every feed once. Returns how many were refreshed.
    pub async fn poll_once(&self) -> Result<usize> {
        let reads = self.feeds.iter().map(|&feed| self.read_feed(feed));
        let results = futures::future::join_all(reads).await;

        let mut updated = 0;
        for (&feed, result) in self.feeds.iter().zip(results) {
            match result {
                Ok(reading) => {
                    self.sink.update(feed, reading)?;
                    updated += 1;
                }
                Err(e) => warn!(feed = %feed, error = %e, "feed read failed"),
            }
        }
        Ok(updated)
    }

    async fn read_feed(&self, feed: Address) -> Result<PriceReading> {
        let aggregator = IAggregatorV3::new(feed, self.provider.clone());
        let data = aggregator
            .latestRoundData()
            .call()
            .await
            .context("latestRoundData RPC call failed")?;

        let round_id = data.roundId.saturating_to::<u64>();
        let answered_in_round = data.answeredInRound.saturating_to::<u64>();
        if answered_in_round < round_id {
            warn!(
                answered_in_round,
                round_id,
                feed = %feed,
                "oracle round incomplete"
            );
        }

        reading_from_round(data.answer, data.updatedAt, self.decimals)
    }
}
