//! Keeper loop: polls `should_rebalance` and dispatches the entry point
//! it names.
//!
//! - Ripcord beats iterate, iterate beats rebalance, across all venues
//! - Transient rejections (cooldowns, nothing to do) are not failures
//! - After `MAX_CONSECUTIVE_FAILURES` failed ticks the poll interval backs
//!   off until a tick succeeds
//! - Graceful shutdown via CancellationToken

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::Result;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{FAILURE_BACKOFF_MULTIPLIER, MAX_CONSECUTIVE_FAILURES};
use crate::core::strategy::FlexibleLeverageStrategy;
use crate::errors::StrategyError;
use crate::types::{IterateOutcome, RebalanceAction};

/// Rank used to pick one action per tick. Higher wins.
fn priority(action: RebalanceAction) -> u8 {
    match action {
        RebalanceAction::Ripcord => 3,
        RebalanceAction::Iterate => 2,
        RebalanceAction::Rebalance => 1,
        RebalanceAction::None => 0,
    }
}

/// Most urgent actionable `(venue, action)`; first venue wins ties.
pub fn pick_action(actions: &[(String, RebalanceAction)]) -> Option<(&str, RebalanceAction)> {
    actions
        .iter()
        .filter(|(_, action)| *action != RebalanceAction::None)
        .fold(None, |best: Option<(&str, RebalanceAction)>, (venue, action)| match best {
            Some((_, current)) if priority(current) >= priority(*action) => best,
            _ => Some((venue.as_str(), *action)),
        })
}

/// What one keeper tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    Executed {
        venue: String,
        action: RebalanceAction,
        leverage_after: Option<Decimal>,
    },
    /// The engine declined with a transient error (lost a race, cooldown).
    Deferred {
        venue: String,
        action: RebalanceAction,
        reason: String,
    },
}

pub struct Keeper {
    strategy: Arc<FlexibleLeverageStrategy>,
    keeper_address: Address,
    poll_interval: Duration,
    shutdown: CancellationToken,
    consecutive_failures: AtomicU32,
}

impl Keeper {
    pub fn new(
        strategy: Arc<FlexibleLeverageStrategy>,
        keeper_address: Address,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            strategy,
            keeper_address,
            poll_interval,
            shutdown,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Main polling loop. Runs until the CancellationToken is cancelled.
    pub async fn run(&self) -> Result<()> {
        info!(keeper = %self.keeper_address, "keeper started");

        loop {
            let interval = self.current_interval();
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("keeper shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    match self.tick() {
                        Ok(outcome) => {
                            let previous = self.consecutive_failures.swap(0, Ordering::Relaxed);
                            if previous >= MAX_CONSECUTIVE_FAILURES {
                                info!(previous, "keeper recovered, normal polling resumed");
                            }
                            debug!(?outcome, "keeper tick complete");
                        }
                        Err(e) => {
                            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            error!(
                                error = %e,
                                consecutive_failures = failures,
                                "keeper tick failed"
                            );
                            if failures == MAX_CONSECUTIVE_FAILURES {
                                warn!(
                                    "reached {MAX_CONSECUTIVE_FAILURES} consecutive failures, backing off"
                                );
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// One poll: ask the strategy what to do and do the most urgent thing.
    pub fn tick(&self) -> Result<TickOutcome, StrategyError> {
        let actions = self.strategy.should_rebalance()?;
        let Some((venue, action)) = pick_action(&actions) else {
            return Ok(TickOutcome::Idle);
        };

        let result = match action {
            RebalanceAction::Ripcord => self
                .strategy
                .ripcord(self.keeper_address, venue)
                .map(|outcome| {
                    info!(venue, reward = %outcome.reward_paid, "keeper ripcord succeeded");
                    outcome.report.leverage_after
                }),
            RebalanceAction::Iterate => self
                .strategy
                .iterate_rebalance(self.keeper_address, venue)
                .map(|outcome| match outcome {
                    IterateOutcome::Executed(report) => report.leverage_after,
                    IterateOutcome::TwapCleared { .. } => None,
                }),
            RebalanceAction::Rebalance => self
                .strategy
                .rebalance(self.keeper_address, venue)
                .map(|report| report.leverage_after),
            RebalanceAction::None => return Ok(TickOutcome::Idle),
        };

        match result {
            Ok(leverage_after) => Ok(TickOutcome::Executed {
                venue: venue.to_string(),
                action,
                leverage_after,
            }),
            Err(e) if e.is_transient() => {
                debug!(venue, action = action.as_str(), reason = %e, "keeper action deferred");
                Ok(TickOutcome::Deferred {
                    venue: venue.to_string(),
                    action,
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn current_interval(&self) -> Duration {
        if self.consecutive_failures.load(Ordering::Relaxed) >= MAX_CONSECUTIVE_FAILURES {
            self.poll_interval * FAILURE_BACKOFF_MULTIPLIER
        } else {
            self.poll_interval
        }
    }
}
