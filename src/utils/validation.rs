//! Input validation utilities.
//!
//! Precondition checks shared by the stability pool and the liquidation
//! engine. They run before any state is touched, so a failure here never
//! leaves partial writes behind.

use crate::error::{Error, Result};
use crate::utils::constants::PARTIAL_LIQUIDATION_DENOMINATOR;
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that an amount is non-zero
pub fn validate_non_zero(amount: FixedPoint) -> Result<()> {
    if amount.is_zero() {
        return Err(Error::ZeroAmount);
    }
    Ok(())
}

/// Validate debt meets the minimum net debt
pub fn validate_min_net_debt(debt: FixedPoint, minimum: FixedPoint) -> Result<()> {
    if debt < minimum {
        return Err(Error::DebtBelowMinimum {
            amount: debt,
            minimum,
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// RATIO VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate collateralization ratio
pub fn validate_collateral_ratio(icr: FixedPoint, minimum: FixedPoint) -> Result<()> {
    if icr < minimum {
        return Err(Error::CollateralRatioBelowMinimum { icr, minimum });
    }
    Ok(())
}

/// Validate a partial liquidation ratio in millionths
pub fn validate_partial_ratio(ratio: u32) -> Result<()> {
    if ratio > PARTIAL_LIQUIDATION_DENOMINATOR {
        return Err(Error::InvalidPartialRatio(ratio));
    }
    Ok(())
}

/// Validate a front-end kickback rate lies in [0, 1]
pub fn validate_kickback_rate(rate: FixedPoint) -> Result<()> {
    if rate > FixedPoint::ONE {
        return Err(Error::InvalidKickbackRate(rate));
    }
    Ok(())
}

/// Validate an oracle price
pub fn validate_price(price: FixedPoint) -> Result<()> {
    if price.is_zero() {
        return Err(Error::InvalidPrice("price is zero".into()));
    }
    Ok(())
}
