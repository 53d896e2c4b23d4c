//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing. Ratios
//! are expressed in percent and converted to [`FixedPoint`] by
//! [`crate::core::config::ProtocolParams`], which is where the
//! configurable policy values actually live.
//!
//! [`FixedPoint`]: crate::utils::math::FixedPoint

// ═══════════════════════════════════════════════════════════════════════════════
// PRECISION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of decimals carried by fixed-point values
pub const DECIMALS: u32 = 18;

/// One unit in raw fixed-point representation (10^18)
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

/// Precision of the nominal ICR used to order positions (10^20)
pub const NICR_PRECISION: u128 = 100_000_000_000_000_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum Collateralization Ratio (MCR) - 110%
/// Below this ratio, a position can be liquidated
pub const MIN_COLLATERAL_RATIO: u64 = 110;

/// Critical Collateralization Ratio (CCR) for Recovery Mode - 150%
/// When system TCR falls below this, Recovery Mode activates
pub const CRITICAL_COLLATERAL_RATIO: u64 = 150;

/// Liquidation ICR cap - 110%
/// Collateral seized from a position never exceeds debt * LICR / price
pub const LIQUIDATION_ICR: u64 = 110;

// ═══════════════════════════════════════════════════════════════════════════════
// DEBT CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum net debt of an active position, in whole debt-token units
pub const MIN_NET_DEBT: u64 = 1_800;

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral divisor for gas compensation (1/200 = 0.5%)
pub const GAS_COMPENSATION_DIVISOR: u64 = 200;

/// Denominator of partial liquidation ratios
pub const PARTIAL_LIQUIDATION_DENOMINATOR: u32 = 1_000_000;

/// Seconds Recovery Mode must persist before positions at or above MCR
/// become liquidatable
pub const RECOVERY_GRACE_PERIOD: u64 = 900;

/// Maximum number of events retained in the protocol event log
pub const MAX_EVENT_LOG: usize = 10_000;

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Scale factor applied to P on a scale change (10^9)
pub const SCALE_FACTOR: u128 = 1_000_000_000;

/// Raw P value below which a scale change is forced (10^-9 of one unit)
pub const SCALE_JUMP_FLOOR: u128 = 1_000_000_000;

/// Compounded values smaller than initial / this are reported as zero
pub const COMPOUNDING_DUST_DIVISOR: u128 = 1_000_000_000;
