//! # cdp-engine
//!
//! Liquidation engine for a collateralized-debt-position stablecoin.
//!
//! Borrowers lock collateral in positions and mint debt tokens against it.
//! When a position falls below the minimum collateral ratio it is
//! liquidated: its debt is burned against the stability pool and its
//! collateral handed to depositors, and whatever the pool cannot absorb is
//! redistributed pro rata to the remaining positions. Partial liquidations
//! and Recovery Mode liquidations above MCR never redistribute; the caller
//! burns their own debt tokens for the rest and receives the collateral.
//!
//! ## Architecture
//!
//! - **Core**: Parameters, positions, the sorted registry, pools and the debt token
//! - **Oracle**: Price feed abstraction
//! - **Liquidation**: Stability pool, redistribution, recovery mode and the liquidation split
//! - **Protocol**: Atomic operations, events and a thread-safe handle
//!
//! ## Example
//!
//! ```rust,ignore
//! use cdp_engine::prelude::*;
//!
//! let mut protocol = Protocol::new(ProtocolParams::default(), FixedPriceFeed::new(price))?;
//! let id = protocol.open_position(owner, collateral, debt, InsertHint::NONE)?;
//! protocol.provide_to_sp(owner, deposit, None)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod error;
pub mod liquidation;
pub mod oracle;
pub mod protocol;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::ProtocolParams,
        pools::{CollSurplusPool, ExternalCollateral, FundPool},
        position::{Position, PositionStatus},
        sorted::{InsertHint, PositionRegistry, SortedPositions},
        token::{DebtToken, DebtTokenLedger},
    };
    pub use crate::error::{Error, Result};
    pub use crate::liquidation::{
        engine::{LiquidationRecord, LiquidationSplit, RemainderFunding},
        issuance::{CommunityIssuance, FixedRateIssuance},
        recovery::{GracePeriod, LiquidationMode, SystemMode},
        stability_pool::{DepositorPayout, StabilityPool},
    };
    pub use crate::oracle::price_feed::{FixedPriceFeed, PriceFeed};
    pub use crate::protocol::{BatchOutcome, Protocol, ProtocolEvent, SharedProtocol};
    pub use crate::utils::{
        ids::{AccountId, PositionId},
        logging::init_logging,
        math::FixedPoint,
    };
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name
pub const PROTOCOL_NAME: &str = "cdp-engine";
