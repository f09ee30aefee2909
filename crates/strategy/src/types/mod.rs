pub mod action;
pub mod fixed_point;
pub mod position;
pub mod settings;

pub use action::{
    ChunkReport, ChunkSize, IterateOutcome, RebalanceAction, RebalanceState, RipcordOutcome,
    TradeDirection, TradeKind, TwapState,
};
pub use position::{LendingLimits, PositionBalances, PositionState};
pub use settings::{
    ExchangeSettings, ExecutionSettings, IncentiveSettings, MethodologySettings, StrategyConfig,
    StrategySettings,
};
