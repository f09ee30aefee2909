//! Flexible leverage strategy: the entry points that keep the position
//! near its target leverage ratio.
//!
//! Each call follows the same flow: guard the caller, read both feeds and
//! the position, classify, size one chunk, execute it on the named venue,
//! commit it to the ledger, then stamp the venue and the strategy.
//!
//! All mutable state sits behind one mutex that is held for the whole
//! call, so racing callers are serialized and the loser observes the
//! winner's result (a cooldown, or a position that no longer needs work).
//! Every error is returned before anything is mutated.

use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::Address;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::constants::UNLEVERED_RATIO;
use crate::core::accountant::position_state;
use crate::core::clock::Clock;
use crate::core::decision::{
    classify, is_outside_bounds, rebalance_interval_remaining, venue_action, DecisionContext,
};
use crate::core::guard::{require_cooldown_elapsed, AccessList, CallerGuard};
use crate::core::oracle::{read_prices, PriceOracle, PricePair};
use crate::core::trade_sizer::{
    borrow_to_collateral, collateral_to_borrow, direction_for, max_borrow_collateral, max_in,
    min_out, recentered_leverage_ratio, size_chunk, target_reached, total_rebalance_notional,
};
use crate::errors::StrategyError;
use crate::execution::ledger::PositionLedger;
use crate::execution::venue::{TradeVenue, VenueEntry, VenueRegistry};
use crate::types::fixed_point::{decimal_to_units, units_to_decimal};
use crate::types::{
    ChunkReport, ChunkSize, ExchangeSettings, ExecutionSettings, IncentiveSettings,
    IterateOutcome, MethodologySettings, PositionState, RebalanceAction, RebalanceState,
    RipcordOutcome, StrategyConfig, StrategySettings, TradeDirection, TradeKind, TwapState,
};

/// Mutable strategy state. Only touched under `FlexibleLeverageStrategy::state`.
#[derive(Debug)]
struct StrategyState {
    settings: StrategySettings,
    venues: VenueRegistry,
    twap: TwapState,
    /// Unix seconds of the last executed chunk of any kind.
    last_rebalance_timestamp: u64,
    /// Native-asset balance available for ripcord bounties.
    reward_reserve: Decimal,
}

impl StrategyState {
    fn context(&self, now: u64) -> DecisionContext<'_> {
        DecisionContext {
            methodology: &self.settings.methodology,
            execution: &self.settings.execution,
            incentive: &self.settings.incentive,
            twap: &self.twap,
            last_rebalance_timestamp: self.last_rebalance_timestamp,
            now,
        }
    }
}

/// One side of a trade as sent to a venue, in whole-token units.
#[derive(Debug, Clone, Copy)]
enum TradeOrder {
    Lever {
        borrow_in: Decimal,
        min_collateral_out: Decimal,
    },
    Delever {
        collateral_in: Decimal,
        min_borrow_out: Decimal,
    },
}

/// What a venue actually filled, in whole-token units.
#[derive(Debug, Clone, Copy)]
struct Fill {
    collateral: Decimal,
    borrow: Decimal,
}

/// Leverage strategy over one lending position.
pub struct FlexibleLeverageStrategy {
    config: StrategyConfig,
    ledger: Arc<dyn PositionLedger>,
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn Clock>,
    guard: CallerGuard,
    state: Mutex<StrategyState>,
}

impl FlexibleLeverageStrategy {
    /// Build a strategy with no venues. Both the config and the settings
    /// are validated up front.
    pub fn new(
        config: StrategyConfig,
        settings: StrategySettings,
        ledger: Arc<dyn PositionLedger>,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn Clock>,
        operator: Address,
        access: AccessList,
    ) -> Result<Self, StrategyError> {
        let mut errors = Vec::new();
        config.collect_errors(&mut errors);
        settings.collect_errors(&mut errors);
        if !errors.is_empty() {
            return Err(StrategyError::InvalidSettings {
                reason: errors.join("; "),
            });
        }

        info!(
            collateral = %config.collateral_asset,
            borrow = %config.borrow_asset,
            target = %settings.methodology.target_leverage_ratio,
            %operator,
            "leverage strategy initialized"
        );

        Ok(Self {
            config,
            ledger,
            oracle,
            clock,
            guard: CallerGuard::new(operator, access),
            state: Mutex::new(StrategyState {
                settings,
                venues: VenueRegistry::new(),
                twap: TwapState::Idle,
                last_rebalance_timestamp: 0,
                reward_reserve: Decimal::ZERO,
            }),
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn operator(&self) -> Address {
        self.guard.operator()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StrategyState>, StrategyError> {
        self.state
            .lock()
            .map_err(|_| StrategyError::LockPoisoned("strategy state"))
    }

    fn read_position(&self, now: u64) -> Result<PositionState, StrategyError> {
        let prices = read_prices(self.oracle.as_ref(), &self.config, now)?;
        let balances = self.ledger.balances()?;
        position_state(&balances, &prices, &self.config)
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Lever an unlevered position up to the target ratio. Operator only.
    ///
    /// When the full trade does not fit in one chunk a TWAP is started and
    /// `iterate_rebalance` finishes it.
    pub fn engage(&self, caller: Address, venue: &str) -> Result<ChunkReport, StrategyError> {
        self.guard.require_operator(caller, "engage")?;
        let mut st = self.lock()?;
        let entry = st.venues.get(venue)?.clone();
        let now = self.clock.now();

        let balances = self.ledger.balances()?;
        if !balances.debt.is_zero() {
            return Err(StrategyError::AlreadyEngaged {
                reason: format!("outstanding debt {}", balances.debt),
            });
        }
        let position = self.read_position(now)?;

        let target = st.settings.methodology.target_leverage_ratio;
        let slippage = st.settings.execution.slippage_tolerance;
        let cap = entry.settings.twap_max_trade_size;
        let direction = TradeDirection::Lever;

        let chunk = self.plan_chunk(&st, &position, target, direction, cap)?;
        let order = chunk_order(direction, chunk.notional, &position, slippage)?;
        let fill = self.execute_order(&entry, order)?;

        let report = self.finish_chunk(
            &mut st,
            TradeKind::Engage,
            venue,
            direction,
            target,
            &position,
            &chunk,
            fill,
            now,
        )?;
        Self::track_twap(&mut st, venue, target, direction, &chunk);
        info!(
            venue,
            leverage = ?report.leverage_after,
            target = %target,
            chunked = chunk.is_chunked,
            "position engaged"
        );
        Ok(report)
    }

    /// Ordinary rebalance once the ratio has left the band and the
    /// rebalance interval has passed. Allow-listed callers only.
    pub fn rebalance(&self, caller: Address, venue: &str) -> Result<ChunkReport, StrategyError> {
        self.guard.require_allowed(caller, "rebalance")?;
        let mut st = self.lock()?;
        let entry = st.venues.get(venue)?.clone();
        let now = self.clock.now();
        let position = self.read_position(now)?;
        require_engaged(&position)?;

        let current = position.current_leverage_ratio;
        if current >= st.settings.incentive.incentivized_leverage_ratio {
            return Err(StrategyError::no_rebalance(format!(
                "leverage {current} is above the incentivized ratio; call ripcord"
            )));
        }
        require_cooldown_elapsed(
            venue,
            entry.settings.last_trade_timestamp,
            st.settings.execution.twap_cooldown_period,
            now,
        )?;

        let ctx = st.context(now);
        match classify(current, &ctx) {
            RebalanceState::RebalanceDue => {}
            RebalanceState::TwapInProgress => {
                return Err(StrategyError::no_rebalance(
                    "rebalance in progress; call iterate_rebalance",
                ))
            }
            RebalanceState::Idle if is_outside_bounds(current, ctx.methodology) => {
                return Err(StrategyError::CooldownActive {
                    venue: venue.to_string(),
                    remaining_seconds: rebalance_interval_remaining(&ctx),
                })
            }
            RebalanceState::Idle | RebalanceState::RipcordEligible => {
                return Err(StrategyError::no_rebalance(format!(
                    "leverage {current} within bounds"
                )))
            }
        }

        let target = recentered_leverage_ratio(current, &st.settings.methodology);
        let direction = direction_for(target, current)
            .ok_or_else(|| StrategyError::no_rebalance(format!("leverage {current} at target")))?;
        let slippage = st.settings.execution.slippage_tolerance;
        let cap = entry.settings.twap_max_trade_size;

        let chunk = self.plan_chunk(&st, &position, target, direction, cap)?;
        let order = chunk_order(direction, chunk.notional, &position, slippage)?;
        let fill = self.execute_order(&entry, order)?;

        let report = self.finish_chunk(
            &mut st,
            TradeKind::Rebalance,
            venue,
            direction,
            target,
            &position,
            &chunk,
            fill,
            now,
        )?;
        Self::track_twap(&mut st, venue, target, direction, &chunk);
        Ok(report)
    }

    /// Continue a chunked rebalance toward its stored target. Allow-listed
    /// callers only.
    ///
    /// When fresh prices show the target already reached (or crossed), the
    /// TWAP is cleared without trading.
    pub fn iterate_rebalance(
        &self,
        caller: Address,
        venue: &str,
    ) -> Result<IterateOutcome, StrategyError> {
        self.guard.require_allowed(caller, "iterate")?;
        let mut st = self.lock()?;
        let entry = st.venues.get(venue)?.clone();

        let (target, direction) = match st.twap {
            TwapState::RebalanceTarget {
                leverage_ratio,
                direction,
                ..
            } => (leverage_ratio, direction),
            TwapState::Idle => return Err(StrategyError::no_rebalance("no rebalance in progress")),
        };

        let now = self.clock.now();
        let position = self.read_position(now)?;
        require_engaged(&position)?;

        let current = position.current_leverage_ratio;
        if current >= st.settings.incentive.incentivized_leverage_ratio {
            return Err(StrategyError::no_rebalance(format!(
                "leverage {current} is above the incentivized ratio; call ripcord"
            )));
        }
        require_cooldown_elapsed(
            venue,
            entry.settings.last_trade_timestamp,
            st.settings.execution.twap_cooldown_period,
            now,
        )?;
        if target_reached(target, current, direction) {
            st.twap = TwapState::Idle;
            info!(venue, %target, %current, "rebalance target reached, twap cleared");
            return Ok(IterateOutcome::TwapCleared {
                target_leverage_ratio: target,
                current_leverage_ratio: current,
            });
        }

        let slippage = st.settings.execution.slippage_tolerance;
        let cap = entry.settings.twap_max_trade_size;
        let chunk = self.plan_chunk(&st, &position, target, direction, cap)?;
        let order = chunk_order(direction, chunk.notional, &position, slippage)?;
        let fill = self.execute_order(&entry, order)?;

        let report = self.finish_chunk(
            &mut st,
            TradeKind::Iterate,
            venue,
            direction,
            target,
            &position,
            &chunk,
            fill,
            now,
        )?;
        Self::track_twap(&mut st, venue, target, direction, &chunk);
        Ok(IterateOutcome::Executed(report))
    }

    /// Emergency delever back to the max ratio. Anyone may call; the first
    /// successful caller is paid the bounty.
    pub fn ripcord(&self, caller: Address, venue: &str) -> Result<RipcordOutcome, StrategyError> {
        let mut st = self.lock()?;
        let entry = st.venues.get(venue)?.clone();
        let now = self.clock.now();
        let position = self.read_position(now)?;

        let current = position.current_leverage_ratio;
        let incentive = st.settings.incentive.clone();
        if current < incentive.incentivized_leverage_ratio {
            return Err(StrategyError::no_rebalance(format!(
                "leverage {current} below incentivized ratio {}",
                incentive.incentivized_leverage_ratio
            )));
        }
        require_cooldown_elapsed(
            venue,
            entry.settings.last_trade_timestamp,
            incentive.incentivized_twap_cooldown_period,
            now,
        )?;

        let target = st.settings.methodology.max_leverage_ratio;
        let direction = TradeDirection::Delever;
        let cap = entry.settings.incentivized_twap_max_trade_size;

        let chunk = self.plan_chunk(&st, &position, target, direction, cap)?;
        let order = chunk_order(
            direction,
            chunk.notional,
            &position,
            incentive.incentivized_slippage_tolerance,
        )?;
        let fill = self.execute_order(&entry, order)?;

        let report = self.finish_chunk(
            &mut st,
            TradeKind::Ripcord,
            venue,
            direction,
            target,
            &position,
            &chunk,
            fill,
            now,
        )?;
        if st.twap.is_active() {
            info!(venue, "twap abandoned by ripcord");
        }
        st.twap = TwapState::Idle;

        let reward = incentive.ether_reward.min(st.reward_reserve);
        let reward_paid = if reward > Decimal::ZERO {
            match self.ledger.pay_reward(caller, reward) {
                Ok(()) => {
                    st.reward_reserve -= reward;
                    reward
                }
                Err(err) => {
                    warn!(%caller, %reward, %err, "ripcord executed but reward transfer failed");
                    Decimal::ZERO
                }
            }
        } else {
            Decimal::ZERO
        };

        warn!(
            venue,
            %caller,
            leverage_before = %current,
            leverage_after = ?report.leverage_after,
            %reward_paid,
            "ripcord pulled"
        );
        Ok(RipcordOutcome {
            report,
            recipient: caller,
            reward_paid,
        })
    }

    /// Unwind toward 1x. Operator only.
    ///
    /// If the remaining unwind fits in one chunk, enough collateral is sold
    /// to repay the whole debt; otherwise one delever chunk executes and
    /// the operator calls again. The repay-everything sale is itself held
    /// to the venue cap and the delever headroom, falling back to a plain
    /// chunk when the slippage allowance would push it over either.
    pub fn disengage(&self, caller: Address, venue: &str) -> Result<ChunkReport, StrategyError> {
        self.guard.require_operator(caller, "disengage")?;
        let mut st = self.lock()?;
        let entry = st.venues.get(venue)?.clone();
        let now = self.clock.now();
        let position = self.read_position(now)?;
        require_engaged(&position)?;

        let target = UNLEVERED_RATIO;
        let direction = TradeDirection::Delever;
        let slippage = st.settings.execution.slippage_tolerance;
        let cap = entry.settings.twap_max_trade_size;
        let mut chunk = self.plan_chunk(&st, &position, target, direction, cap)?;

        let full_unwind = if chunk.is_chunked {
            None
        } else {
            let debt_in_collateral = borrow_to_collateral(
                position.debt_units,
                position.collateral_price,
                position.borrow_price,
            )?;
            let limits = self.ledger.lending_limits()?;
            let headroom =
                max_borrow_collateral(&position, &limits, &st.settings.execution, direction);
            let sale = max_in(debt_in_collateral, slippage);
            let limit = position.collateral_units.min(cap).min(headroom);
            if sale <= limit {
                Some(sale)
            } else {
                debug!(%sale, %limit, "full unwind exceeds chunk limit, delevering one chunk");
                chunk.is_chunked = true;
                None
            }
        };

        let order = match full_unwind {
            Some(collateral_in) => TradeOrder::Delever {
                collateral_in,
                min_borrow_out: position.debt_units,
            },
            None => chunk_order(direction, chunk.notional, &position, slippage)?,
        };
        let fill = self.execute_order(&entry, order)?;

        let report = self.finish_chunk(
            &mut st,
            TradeKind::Disengage,
            venue,
            direction,
            target,
            &position,
            &chunk,
            fill,
            now,
        )?;
        st.twap = TwapState::Idle;
        info!(
            venue,
            leverage = ?report.leverage_after,
            complete = !chunk.is_chunked,
            "disengage step executed"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Chunk pipeline
    // -----------------------------------------------------------------------

    fn plan_chunk(
        &self,
        st: &StrategyState,
        position: &PositionState,
        target: Decimal,
        direction: TradeDirection,
        max_trade_size: Decimal,
    ) -> Result<ChunkSize, StrategyError> {
        let total = total_rebalance_notional(
            target,
            position.current_leverage_ratio,
            position.collateral_units,
        )?;
        let limits = self.ledger.lending_limits()?;
        let headroom = max_borrow_collateral(position, &limits, &st.settings.execution, direction);
        let chunk = size_chunk(total, max_trade_size, headroom)?;
        debug!(
            %total,
            %max_trade_size,
            %headroom,
            notional = %chunk.notional,
            direction = direction.as_str(),
            "chunk sized"
        );
        Ok(chunk)
    }

    /// Fill `order` on the venue, then commit to the ledger in one step.
    ///
    /// Venues must reject fills below the minimum themselves. A fill that
    /// comes back short anyway is never committed.
    fn execute_order(&self, entry: &VenueEntry, order: TradeOrder) -> Result<Fill, StrategyError> {
        let venue = entry.venue.name();
        let cdec = self.config.collateral_decimals;
        let bdec = self.config.borrow_decimals;

        match order {
            TradeOrder::Lever {
                borrow_in,
                min_collateral_out,
            } => {
                let borrow_raw = decimal_to_units(borrow_in, bdec)?;
                let min_raw = decimal_to_units(min_collateral_out, cdec)?;
                let received =
                    entry
                        .venue
                        .execute_lever_trade(borrow_raw, min_raw, &entry.settings.lever_route)?;
                if received < min_raw {
                    return Err(short_fill(
                        venue,
                        min_collateral_out,
                        units_to_decimal(received, cdec)?,
                    ));
                }
                self.ledger.commit_lever(borrow_raw, received)?;
                Ok(Fill {
                    collateral: units_to_decimal(received, cdec)?,
                    borrow: units_to_decimal(borrow_raw, bdec)?,
                })
            }
            TradeOrder::Delever {
                collateral_in,
                min_borrow_out,
            } => {
                let sold_raw = decimal_to_units(collateral_in, cdec)?;
                let min_raw = decimal_to_units(min_borrow_out, bdec)?;
                let received = entry.venue.execute_delever_trade(
                    sold_raw,
                    min_raw,
                    &entry.settings.delever_route,
                )?;
                if received < min_raw {
                    return Err(short_fill(
                        venue,
                        min_borrow_out,
                        units_to_decimal(received, bdec)?,
                    ));
                }
                let repaid = self.ledger.commit_delever(sold_raw, received)?;
                debug!(venue, %received, %repaid, "delever committed");
                Ok(Fill {
                    collateral: units_to_decimal(sold_raw, cdec)?,
                    borrow: units_to_decimal(received, bdec)?,
                })
            }
        }
    }

    /// Keep a TWAP open while chunks remain, close it once one is not chunked.
    fn track_twap(
        st: &mut StrategyState,
        venue: &str,
        target: Decimal,
        direction: TradeDirection,
        chunk: &ChunkSize,
    ) {
        let was_active = st.twap.is_active();
        st.twap = if chunk.is_chunked {
            TwapState::RebalanceTarget {
                leverage_ratio: target,
                direction,
                remaining_notional: chunk.total_notional - chunk.notional,
            }
        } else {
            TwapState::Idle
        };
        match (was_active, st.twap.is_active()) {
            (false, true) => info!(venue, %target, "twap started"),
            (true, false) => info!(venue, %target, "twap completed"),
            _ => {}
        }
    }

    /// Stamp the venue and strategy timestamps and build the report.
    #[allow(clippy::too_many_arguments)]
    fn finish_chunk(
        &self,
        st: &mut StrategyState,
        kind: TradeKind,
        venue: &str,
        direction: TradeDirection,
        target: Decimal,
        position: &PositionState,
        chunk: &ChunkSize,
        fill: Fill,
        now: u64,
    ) -> Result<ChunkReport, StrategyError> {
        st.venues.record_trade(venue, now)?;
        st.last_rebalance_timestamp = now;

        let leverage_after = self.leverage_after(position);
        info!(
            venue,
            kind = kind.as_str(),
            direction = direction.as_str(),
            %target,
            leverage_before = %position.current_leverage_ratio,
            ?leverage_after,
            collateral = %fill.collateral,
            borrow = %fill.borrow,
            chunked = chunk.is_chunked,
            "chunk executed"
        );

        Ok(ChunkReport {
            kind,
            venue: venue.to_string(),
            direction,
            target_leverage_ratio: target,
            leverage_before: position.current_leverage_ratio,
            leverage_after,
            collateral_amount: fill.collateral,
            borrow_amount: fill.borrow,
            is_chunked: chunk.is_chunked,
            timestamp: now,
        })
    }

    /// Post-trade ratio at the prices the trade was sized with. `None` when
    /// the post-trade balances cannot be read or priced; the trade itself
    /// has already been committed by then.
    fn leverage_after(&self, before: &PositionState) -> Option<Decimal> {
        let prices = PricePair {
            collateral: before.collateral_price,
            borrow: before.borrow_price,
        };
        match self
            .ledger
            .balances()
            .and_then(|b| position_state(&b, &prices, &self.config))
        {
            Ok(state) => Some(state.current_leverage_ratio),
            Err(err) => {
                warn!(%err, "could not derive post-trade leverage");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn current_leverage_ratio(&self) -> Result<Decimal, StrategyError> {
        Ok(self.position_snapshot()?.current_leverage_ratio)
    }

    pub fn position_snapshot(&self) -> Result<PositionState, StrategyError> {
        self.read_position(self.clock.now())
    }

    /// Next action per registered venue. An unlevered position reports
    /// `None` everywhere.
    pub fn should_rebalance(&self) -> Result<Vec<(String, RebalanceAction)>, StrategyError> {
        let st = self.lock()?;
        let now = self.clock.now();
        let position = self.read_position(now)?;
        let ctx = st.context(now);
        let state = if position.is_engaged() {
            classify(position.current_leverage_ratio, &ctx)
        } else {
            RebalanceState::Idle
        };

        Ok(st
            .venues
            .iter()
            .map(|(name, entry)| (name.to_string(), venue_action(state, &entry.settings, &ctx)))
            .collect())
    }

    /// Chunk the next call on `venue` would trade, with its direction.
    pub fn chunk_rebalance_notional(
        &self,
        venue: &str,
    ) -> Result<(ChunkSize, TradeDirection), StrategyError> {
        let st = self.lock()?;
        let entry = st.venues.get(venue)?;
        let now = self.clock.now();
        let position = self.read_position(now)?;
        let current = position.current_leverage_ratio;

        let (target, cap) = match classify(current, &st.context(now)) {
            RebalanceState::RipcordEligible => (
                st.settings.methodology.max_leverage_ratio,
                entry.settings.incentivized_twap_max_trade_size,
            ),
            RebalanceState::TwapInProgress => (
                st.twap.target().unwrap_or(st.settings.methodology.target_leverage_ratio),
                entry.settings.twap_max_trade_size,
            ),
            RebalanceState::RebalanceDue | RebalanceState::Idle => (
                recentered_leverage_ratio(current, &st.settings.methodology),
                entry.settings.twap_max_trade_size,
            ),
        };
        let direction = direction_for(target, current)
            .ok_or_else(|| StrategyError::no_rebalance(format!("leverage {current} at target")))?;
        let chunk = self.plan_chunk(&st, &position, target, direction, cap)?;
        Ok((chunk, direction))
    }

    pub fn twap_state(&self) -> Result<TwapState, StrategyError> {
        Ok(self.lock()?.twap.clone())
    }

    pub fn settings(&self) -> Result<StrategySettings, StrategyError> {
        Ok(self.lock()?.settings.clone())
    }

    pub fn exchange_settings(&self, venue: &str) -> Result<ExchangeSettings, StrategyError> {
        Ok(self.lock()?.venues.get(venue)?.settings.clone())
    }

    pub fn venue_names(&self) -> Result<Vec<String>, StrategyError> {
        Ok(self.lock()?.venues.names().map(str::to_string).collect())
    }

    pub fn last_rebalance_timestamp(&self) -> Result<u64, StrategyError> {
        Ok(self.lock()?.last_rebalance_timestamp)
    }

    pub fn reward_reserve(&self) -> Result<Decimal, StrategyError> {
        Ok(self.lock()?.reward_reserve)
    }

    pub fn access_list(&self) -> Result<AccessList, StrategyError> {
        self.guard.access_list()
    }

    // -----------------------------------------------------------------------
    // Operator surface
    // -----------------------------------------------------------------------

    pub fn set_methodology_settings(
        &self,
        caller: Address,
        methodology: MethodologySettings,
    ) -> Result<(), StrategyError> {
        self.update_settings(caller, "set methodology", |s| s.methodology = methodology)
    }

    pub fn set_execution_settings(
        &self,
        caller: Address,
        execution: ExecutionSettings,
    ) -> Result<(), StrategyError> {
        self.update_settings(caller, "set execution", |s| s.execution = execution)
    }

    pub fn set_incentive_settings(
        &self,
        caller: Address,
        incentive: IncentiveSettings,
    ) -> Result<(), StrategyError> {
        self.update_settings(caller, "set incentive", |s| s.incentive = incentive)
    }

    fn update_settings(
        &self,
        caller: Address,
        action: &'static str,
        apply: impl FnOnce(&mut StrategySettings),
    ) -> Result<(), StrategyError> {
        self.guard.require_operator(caller, action)?;
        let mut st = self.lock()?;
        if st.twap.is_active() {
            return Err(StrategyError::InvalidSettings {
                reason: "settings are frozen while a rebalance is in progress".into(),
            });
        }
        let mut candidate = st.settings.clone();
        apply(&mut candidate);
        candidate.validate()?;
        st.settings = candidate;
        info!(action, "strategy settings updated");
        Ok(())
    }

    pub fn add_venue(
        &self,
        caller: Address,
        name: &str,
        venue: Arc<dyn TradeVenue>,
        settings: ExchangeSettings,
    ) -> Result<(), StrategyError> {
        self.guard.require_operator(caller, "add venue")?;
        self.lock()?.venues.add(name, venue, settings)?;
        info!(venue = name, "venue added");
        Ok(())
    }

    pub fn update_venue(
        &self,
        caller: Address,
        name: &str,
        settings: ExchangeSettings,
    ) -> Result<(), StrategyError> {
        self.guard.require_operator(caller, "update venue")?;
        self.lock()?.venues.update(name, settings)?;
        info!(venue = name, "venue updated");
        Ok(())
    }

    pub fn remove_venue(&self, caller: Address, name: &str) -> Result<(), StrategyError> {
        self.guard.require_operator(caller, "remove venue")?;
        self.lock()?.venues.remove(name)?;
        info!(venue = name, "venue removed");
        Ok(())
    }

    pub fn set_caller_status(
        &self,
        caller: Address,
        account: Address,
        allowed: bool,
    ) -> Result<(), StrategyError> {
        self.guard.set_caller_status(caller, account, allowed)
    }

    pub fn set_anyone_callable(&self, caller: Address, open: bool) -> Result<(), StrategyError> {
        self.guard.set_anyone_callable(caller, open)
    }

    /// Fund the ripcord bounty reserve. Open to anyone.
    pub fn deposit_reward(&self, amount: Decimal) -> Result<Decimal, StrategyError> {
        if amount <= Decimal::ZERO {
            return Err(StrategyError::InvalidSettings {
                reason: format!("reward deposit must be positive, got {amount}"),
            });
        }
        let mut st = self.lock()?;
        st.reward_reserve += amount;
        info!(%amount, reserve = %st.reward_reserve, "reward reserve funded");
        Ok(st.reward_reserve)
    }

    /// Pay the whole reward reserve to the operator. Operator only.
    pub fn withdraw_reward(&self, caller: Address) -> Result<Decimal, StrategyError> {
        self.guard.require_operator(caller, "withdraw reward")?;
        let mut st = self.lock()?;
        let amount = st.reward_reserve;
        if amount > Decimal::ZERO {
            self.ledger.pay_reward(caller, amount)?;
            st.reward_reserve = Decimal::ZERO;
            info!(%amount, "reward reserve withdrawn");
        }
        Ok(amount)
    }
}

/// A venue reported success with less than the minimum it was given.
fn short_fill(venue: &str, minimum: Decimal, received: Decimal) -> StrategyError {
    error!(
        venue,
        %minimum,
        %received,
        "venue filled below the minimum output, ledger left untouched"
    );
    StrategyError::VenueFailure {
        venue: venue.to_string(),
        reason: format!("filled {received} below minimum {minimum}"),
    }
}

fn require_engaged(position: &PositionState) -> Result<(), StrategyError> {
    if position.is_engaged() {
        Ok(())
    } else {
        Err(StrategyError::NotEngaged)
    }
}

/// Venue order for a chunk of `notional` collateral units.
fn chunk_order(
    direction: TradeDirection,
    notional: Decimal,
    position: &PositionState,
    slippage: Decimal,
) -> Result<TradeOrder, StrategyError> {
    let borrow_equivalent =
        collateral_to_borrow(notional, position.collateral_price, position.borrow_price)?;
    Ok(match direction {
        TradeDirection::Lever => TradeOrder::Lever {
            borrow_in: borrow_equivalent,
            min_collateral_out: min_out(notional, slippage),
        },
        TradeDirection::Delever => TradeOrder::Delever {
            collateral_in: notional,
            min_borrow_out: min_out(borrow_equivalent, slippage),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::oracle::SharedPriceOracle;
    use crate::execution::paper::{PaperLedger, PaperVenue};
    use crate::types::LendingLimits;
    use crate::types::PositionBalances;
    use alloy::primitives::U256;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    const OPERATOR: Address = Address::repeat_byte(0xAA);
    const KEEPER: Address = Address::repeat_byte(0xBB);
    const START: u64 = 1_700_000_000;
    const ETH: u128 = 1_000_000_000_000_000_000;

    fn config() -> StrategyConfig {
        StrategyConfig {
            collateral_asset: Address::repeat_byte(1),
            borrow_asset: Address::repeat_byte(2),
            collateral_price_oracle: Address::repeat_byte(3),
            borrow_price_oracle: Address::repeat_byte(4),
            collateral_decimals: 18,
            borrow_decimals: 6,
            oracle_decimals: 8,
            oracle_max_staleness_seconds: 3_600,
        }
    }

    fn settings() -> StrategySettings {
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

    fn exchange() -> ExchangeSettings {
        ExchangeSettings {
            twap_max_trade_size: dec!(5),
            incentivized_twap_max_trade_size: dec!(10),
            last_trade_timestamp: 0,
            lever_route: vec![],
            delever_route: vec![],
        }
    }

    struct Harness {
        strategy: FlexibleLeverageStrategy,
        ledger: Arc<PaperLedger>,
        oracle: SharedPriceOracle,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(collateral_eth: u128) -> Self {
            let cfg = config();
            let clock = Arc::new(ManualClock::new(START));
            let oracle = SharedPriceOracle::new();
            let ledger = Arc::new(PaperLedger::new(
                U256::from(collateral_eth * ETH),
                LendingLimits {
                    max_ltv: dec!(0.8),
                    liquidation_threshold: dec!(0.85),
                },
            ));
            let strategy = FlexibleLeverageStrategy::new(
                cfg.clone(),
                settings(),
                ledger.clone(),
                Arc::new(oracle.clone()),
                clock.clone(),
                OPERATOR,
                AccessList::new([KEEPER]),
            )
            .unwrap();
            let venue = PaperVenue::new("paper", Arc::new(oracle.clone()), cfg, 10);
            strategy
                .add_venue(OPERATOR, "paper", Arc::new(venue), exchange())
                .unwrap();
            let h = Self {
                strategy,
                ledger,
                oracle,
                clock,
            };
            h.set_price(dec!(2000));
            h
        }

        fn set_price(&self, collateral: Decimal) {
            let now = self.clock.now();
            let cfg = config();
            self.oracle
                .set_price(cfg.collateral_price_oracle, collateral, 8, now)
                .unwrap();
            self.oracle
                .set_price(cfg.borrow_price_oracle, dec!(1), 8, now)
                .unwrap();
        }
    }

    fn limits() -> LendingLimits {
        LendingLimits {
            max_ltv: dec!(0.8),
            liquidation_threshold: dec!(0.85),
        }
    }

    /// Strategy over arbitrary collaborators, priced at 2000 and registered
    /// on a single venue.
    fn strategy_with(
        ledger: Arc<dyn PositionLedger>,
        venue: Arc<dyn TradeVenue>,
    ) -> FlexibleLeverageStrategy {
        let cfg = config();
        let oracle = SharedPriceOracle::new();
        oracle
            .set_price(cfg.collateral_price_oracle, dec!(2000), 8, START)
            .unwrap();
        oracle
            .set_price(cfg.borrow_price_oracle, dec!(1), 8, START)
            .unwrap();
        let strategy = FlexibleLeverageStrategy::new(
            cfg,
            settings(),
            ledger,
            Arc::new(oracle),
            Arc::new(ManualClock::new(START)),
            OPERATOR,
            AccessList::new([KEEPER]),
        )
        .unwrap();
        strategy
            .add_venue(OPERATOR, "paper", venue, exchange())
            .unwrap();
        strategy
    }

    /// Reports success while handing back one unit less than the minimum.
    struct ShortVenue;

    impl TradeVenue for ShortVenue {
        fn name(&self) -> &str {
            "paper"
        }

        fn execute_lever_trade(
            &self,
            _borrow_in: U256,
            min_collateral_out: U256,
            _route: &[u8],
        ) -> Result<U256, StrategyError> {
            Ok(min_collateral_out - U256::from(1))
        }

        fn execute_delever_trade(
            &self,
            _collateral_in: U256,
            min_borrow_out: U256,
            _route: &[u8],
        ) -> Result<U256, StrategyError> {
            Ok(min_borrow_out - U256::from(1))
        }
    }

    /// Paper ledger whose balance reads start failing after the first commit.
    struct BlindAfterCommit {
        inner: PaperLedger,
        blind: AtomicBool,
    }

    impl PositionLedger for BlindAfterCommit {
        fn balances(&self) -> Result<PositionBalances, StrategyError> {
            if self.blind.load(Ordering::SeqCst) {
                return Err(StrategyError::Ledger {
                    reason: "balance read timed out".into(),
                });
            }
            self.inner.balances()
        }

        fn lending_limits(&self) -> Result<LendingLimits, StrategyError> {
            self.inner.lending_limits()
        }

        fn commit_lever(&self, borrowed: U256, received: U256) -> Result<(), StrategyError> {
            self.inner.commit_lever(borrowed, received)?;
            self.blind.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn commit_delever(&self, sold: U256, received: U256) -> Result<U256, StrategyError> {
            let repaid = self.inner.commit_delever(sold, received)?;
            self.blind.store(true, Ordering::SeqCst);
            Ok(repaid)
        }

        fn pay_reward(&self, to: Address, amount: Decimal) -> Result<(), StrategyError> {
            self.inner.pay_reward(to, amount)
        }
    }

    #[test]
    fn test_short_fill_is_a_venue_failure_and_not_committed() {
        let ledger = Arc::new(PaperLedger::new(U256::from(10 * ETH), limits()));
        let strategy = strategy_with(ledger.clone(), Arc::new(ShortVenue));
        let before = ledger.balances().unwrap();

        let err = strategy.engage(OPERATOR, "paper").unwrap_err();
        assert!(
            matches!(err, StrategyError::VenueFailure { ref venue, .. } if venue == "paper"),
            "got {err:?}"
        );
        assert_eq!(ledger.balances().unwrap(), before);
        assert_eq!(strategy.twap_state().unwrap(), TwapState::Idle);
        assert_eq!(strategy.last_rebalance_timestamp().unwrap(), 0);
        assert_eq!(
            strategy.exchange_settings("paper").unwrap().last_trade_timestamp,
            0
        );
    }

    #[test]
    fn test_unreadable_post_trade_leverage_is_none() {
        let ledger = Arc::new(BlindAfterCommit {
            inner: PaperLedger::new(U256::from(10 * ETH), limits()),
            blind: AtomicBool::new(false),
        });
        let cfg = config();
        let oracle = SharedPriceOracle::new();
        oracle
            .set_price(cfg.collateral_price_oracle, dec!(2000), 8, START)
            .unwrap();
        oracle
            .set_price(cfg.borrow_price_oracle, dec!(1), 8, START)
            .unwrap();
        let venue = PaperVenue::new("paper", Arc::new(oracle), cfg, 10);
        let strategy = strategy_with(ledger.clone(), Arc::new(venue));

        let report = strategy.engage(OPERATOR, "paper").unwrap();
        assert_eq!(report.leverage_after, None);
        assert_eq!(report.collateral_amount, dec!(4.995));
        // The trade itself stands.
        assert!(!ledger.inner.balances().unwrap().debt.is_zero());
        assert!(strategy.twap_state().unwrap().is_active());
    }

    #[test]
    fn test_report_serializes_missing_leverage_as_null() {
        let report = ChunkReport {
            kind: TradeKind::Rebalance,
            venue: "paper".into(),
            direction: TradeDirection::Delever,
            target_leverage_ratio: dec!(2.2),
            leverage_before: dec!(2.4),
            leverage_after: None,
            collateral_amount: dec!(1.5),
            borrow_amount: dec!(2985),
            is_chunked: false,
            timestamp: START,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["leverage_after"].is_null());
        assert_eq!(json["leverage_before"], "2.4");

        let back: ChunkReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let mut s = settings();
        s.methodology.max_leverage_ratio = dec!(1.9);
        let result = FlexibleLeverageStrategy::new(
            config(),
            s,
            Arc::new(PaperLedger::new(
                U256::ZERO,
                LendingLimits {
                    max_ltv: dec!(0.8),
                    liquidation_threshold: dec!(0.85),
                },
            )),
            Arc::new(SharedPriceOracle::new()),
            Arc::new(ManualClock::new(0)),
            OPERATOR,
            AccessList::default(),
        );
        assert!(matches!(result, Err(StrategyError::InvalidSettings { .. })));
    }

    #[test]
    fn test_engage_starts_twap() {
        let h = Harness::new(10);
        let report = h.strategy.engage(OPERATOR, "paper").unwrap();
        assert_eq!(report.kind, TradeKind::Engage);
        assert_eq!(report.direction, TradeDirection::Lever);
        assert!(report.is_chunked);
        assert_eq!(report.collateral_amount, dec!(4.995));
        let after = report.leverage_after.unwrap();
        assert!(after > dec!(1.5) && after < dec!(1.51));
        assert!(h.strategy.twap_state().unwrap().is_active());
        assert_eq!(
            h.strategy.exchange_settings("paper").unwrap().last_trade_timestamp,
            START
        );
    }

    #[test]
    fn test_engage_rules() {
        let h = Harness::new(10);
        assert!(matches!(
            h.strategy.engage(KEEPER, "paper").unwrap_err(),
            StrategyError::Unauthorized { .. }
        ));
        assert!(matches!(
            h.strategy.engage(OPERATOR, "nowhere").unwrap_err(),
            StrategyError::InvalidVenue { .. }
        ));
        h.strategy.engage(OPERATOR, "paper").unwrap();
        assert!(matches!(
            h.strategy.engage(OPERATOR, "paper").unwrap_err(),
            StrategyError::AlreadyEngaged { .. }
        ));

        let empty = Harness::new(0);
        assert_eq!(
            empty.strategy.engage(OPERATOR, "paper").unwrap_err(),
            StrategyError::EmptyPosition
        );
    }

    #[test]
    fn test_iterate_respects_cooldown_and_completes() {
        let h = Harness::new(10);
        h.strategy.engage(OPERATOR, "paper").unwrap();

        let err = h.strategy.iterate_rebalance(KEEPER, "paper").unwrap_err();
        assert_eq!(
            err,
            StrategyError::CooldownActive {
                venue: "paper".into(),
                remaining_seconds: 30
            }
        );

        h.clock.advance(30);
        h.set_price(dec!(2000));
        let outcome = h.strategy.iterate_rebalance(KEEPER, "paper").unwrap();
        let report = match outcome {
            IterateOutcome::Executed(report) => report,
            other => panic!("expected a chunk, got {other:?}"),
        };
        assert!(!report.is_chunked);
        assert!((report.leverage_after.unwrap() - dec!(2)).abs() < dec!(0.01));
        assert_eq!(h.strategy.twap_state().unwrap(), TwapState::Idle);

        h.clock.advance(30);
        let err = h.strategy.iterate_rebalance(KEEPER, "paper").unwrap_err();
        assert!(matches!(err, StrategyError::NoRebalanceNeeded { .. }));
    }

    #[test]
    fn test_iterate_clears_twap_when_target_crossed() {
        let h = Harness::new(10);
        h.strategy.engage(OPERATOR, "paper").unwrap();
        h.clock.advance(30);
        // Price drop pushes the ratio past the 2.0 lever target by itself.
        h.set_price(dec!(1200));
        let outcome = h.strategy.iterate_rebalance(KEEPER, "paper").unwrap();
        assert!(matches!(outcome, IterateOutcome::TwapCleared { .. }));
        assert_eq!(h.strategy.twap_state().unwrap(), TwapState::Idle);
    }

    #[test]
    fn test_rebalance_requires_allow_list() {
        let h = Harness::new(10);
        let stranger = Address::repeat_byte(0xCC);
        assert!(matches!(
            h.strategy.rebalance(stranger, "paper").unwrap_err(),
            StrategyError::Unauthorized { .. }
        ));
        h.strategy.set_anyone_callable(OPERATOR, true).unwrap();
        // Allowed now; fails later for a different reason.
        assert_eq!(
            h.strategy.rebalance(stranger, "paper").unwrap_err(),
            StrategyError::NotEngaged
        );
    }

    #[test]
    fn test_rebalance_during_twap_points_to_iterate() {
        let h = Harness::new(10);
        h.strategy.engage(OPERATOR, "paper").unwrap();
        h.clock.advance(30);
        h.set_price(dec!(2000));
        let err = h.strategy.rebalance(KEEPER, "paper").unwrap_err();
        assert!(err.to_string().contains("iterate"));
    }

    #[test]
    fn test_settings_frozen_during_twap() {
        let h = Harness::new(10);
        h.strategy.engage(OPERATOR, "paper").unwrap();
        let mut m = settings().methodology;
        m.recentering_speed = dec!(1);
        assert!(matches!(
            h.strategy.set_methodology_settings(OPERATOR, m.clone()).unwrap_err(),
            StrategyError::InvalidSettings { .. }
        ));

        let idle = Harness::new(10);
        assert!(idle.strategy.set_methodology_settings(KEEPER, m.clone()).is_err());
        idle.strategy.set_methodology_settings(OPERATOR, m).unwrap();
        assert_eq!(
            idle.strategy.settings().unwrap().methodology.recentering_speed,
            dec!(1)
        );
    }

    #[test]
    fn test_should_rebalance_when_unlevered() {
        let h = Harness::new(10);
        assert_eq!(
            h.strategy.should_rebalance().unwrap(),
            vec![("paper".to_string(), RebalanceAction::None)]
        );
        h.strategy.engage(OPERATOR, "paper").unwrap();
        assert_eq!(
            h.strategy.should_rebalance().unwrap(),
            vec![("paper".to_string(), RebalanceAction::None)]
        );
        h.clock.advance(30);
        h.set_price(dec!(2000));
        assert_eq!(
            h.strategy.should_rebalance().unwrap(),
            vec![("paper".to_string(), RebalanceAction::Iterate)]
        );
    }

    #[test]
    fn test_chunk_preview_matches_engage_remainder() {
        let h = Harness::new(10);
        h.strategy.engage(OPERATOR, "paper").unwrap();
        let (chunk, direction) = h.strategy.chunk_rebalance_notional("paper").unwrap();
        assert_eq!(direction, TradeDirection::Lever);
        assert!(!chunk.is_chunked);
        assert!(chunk.notional <= dec!(5));
    }

    #[test]
    fn test_reward_reserve() {
        let h = Harness::new(10);
        assert!(h.strategy.deposit_reward(Decimal::ZERO).is_err());
        assert_eq!(h.strategy.deposit_reward(dec!(2)).unwrap(), dec!(2));
        assert!(h.strategy.withdraw_reward(KEEPER).is_err());
        assert_eq!(h.strategy.withdraw_reward(OPERATOR).unwrap(), dec!(2));
        assert_eq!(h.strategy.reward_reserve().unwrap(), Decimal::ZERO);
        assert_eq!(h.ledger.rewards_paid().unwrap(), vec![(OPERATOR, dec!(2))]);
    }

    #[test]
    fn test_venue_management_is_operator_only() {
        let h = Harness::new(10);
        assert!(h.strategy.remove_venue(KEEPER, "paper").is_err());
        let mut next = exchange();
        next.twap_max_trade_size = dec!(2);
        h.strategy.update_venue(OPERATOR, "paper", next).unwrap();
        assert_eq!(
            h.strategy.exchange_settings("paper").unwrap().twap_max_trade_size,
            dec!(2)
        );
        h.strategy.remove_venue(OPERATOR, "paper").unwrap();
        assert!(h.strategy.venue_names().unwrap().is_empty());
    }
}
