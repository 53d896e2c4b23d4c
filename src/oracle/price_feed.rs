//! Price feed interface.
//!
//! The engine trusts the feed: it performs no staleness or deviation
//! checks of its own and only rejects a zero price.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::math::FixedPoint;
use crate::utils::validation::validate_price;

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE FEED INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of the collateral price in debt-token units
pub trait PriceFeed {
    /// Current price, assumed fresh for the duration of one operation
    fn fetch_price(&self) -> Result<FixedPoint>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED PRICE FEED
// ═══════════════════════════════════════════════════════════════════════════════

/// Price feed returning a manually set price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPriceFeed {
    price: FixedPoint,
}

impl FixedPriceFeed {
    /// Create a feed reporting `price`
    pub fn new(price: FixedPoint) -> Self {
        Self { price }
    }

    /// Update the reported price
    pub fn set_price(&mut self, price: FixedPoint) {
        tracing::debug!(%price, "price updated");
        self.price = price;
    }
}

impl PriceFeed for FixedPriceFeed {
    fn fetch_price(&self) -> Result<FixedPoint> {
        validate_price(self.price)?;
        Ok(self.price)
    }
}
