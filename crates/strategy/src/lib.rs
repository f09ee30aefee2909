//! Flexible leverage strategy engine.
//!
//! Keeps a collateral/debt position near a target leverage ratio: reads
//! two price feeds, derives the current ratio, decides whether to lever,
//! delever, continue a chunked rebalance or pull the ripcord, and executes
//! one cooldown-gated chunk against a named trade venue.

pub mod config;
pub mod constants;
pub mod core;
pub mod errors;
pub mod execution;
pub mod logging;
pub mod types;
