//! Liquidation module for the CDP engine.
//!
//! This module handles liquidations and the loss-absorbing pools:
//! - Liquidation engine: collateral caps, partial sizing, the offset/redistribution split
//!   and caller funding of what the pool cannot offset
//! - Stability pool with P/S/G compounding across scales and epochs
//! - Redistribution accumulator for debt the pool cannot absorb
//! - Recovery mode detection, its grace period and liquidation eligibility
//! - Community issuance feeding depositor rewards

pub mod engine;
pub mod issuance;
pub mod recovery;
pub mod rewards;
pub mod stability_pool;

pub use engine::*;
pub use issuance::*;
pub use recovery::*;
pub use rewards::*;
pub use stability_pool::*;
