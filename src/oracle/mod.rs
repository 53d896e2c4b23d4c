//! Oracle module for price feeds.
//!
//! The engine reads the collateral price through [`PriceFeed`] once per
//! operation. [`FixedPriceFeed`] is a manually driven implementation.

pub mod price_feed;

pub use price_feed::*;
