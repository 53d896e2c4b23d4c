//! Recovery Mode detection and liquidation eligibility.
//!
//! Recovery Mode is active while the Total Collateralization Ratio (TCR)
//! is below the Critical Collateralization Ratio (CCR). In this mode:
//!
//! 1. **Positions below MCR** are liquidated exactly as in Normal Mode
//! 2. **Positions between MCR and TCR** can be liquidated too, but only
//!    once the grace period has run out and only when the stability pool
//!    and the caller's own debt tokens cover their whole debt
//! 3. **Positions at or above TCR** are left alone, since liquidating them
//!    would not raise the TCR
//!
//! The mode is resolved once per liquidation step from the current totals
//! and price; see [`SystemStatus::resolve`]. The grace period is tracked by
//! [`GracePeriod`] against a caller-supplied clock.

use serde::{Deserialize, Serialize};

use crate::core::config::ProtocolParams;
use crate::core::pools::FundPool;
use crate::error::{Error, Result};
use crate::liquidation::engine::RemainderFunding;
use crate::utils::constants::PARTIAL_LIQUIDATION_DENOMINATOR;
use crate::utils::math::*;

// ═══════════════════════════════════════════════════════════════════════════════
// MODES
// ═══════════════════════════════════════════════════════════════════════════════

/// System-wide operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemMode {
    /// TCR at or above CCR
    Normal,
    /// TCR below CCR
    Recovery,
}

impl SystemMode {
    /// Mode for a given TCR
    pub fn from_tcr(tcr: FixedPoint, ccr: FixedPoint) -> Self {
        if tcr < ccr {
            SystemMode::Recovery
        } else {
            SystemMode::Normal
        }
    }

    /// Check if in recovery mode
    pub fn is_recovery(&self) -> bool {
        matches!(self, SystemMode::Recovery)
    }
}

/// How a single liquidation is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationMode {
    /// Full liquidation in Normal Mode
    Normal,
    /// Full liquidation in Recovery Mode
    Recovery,
    /// Partial liquidation of the given fraction, in millionths
    Partial(u32),
}

impl LiquidationMode {
    /// Resolve the mode for a call
    ///
    /// A ratio of `None`, 0, or the full denominator is a full liquidation.
    pub fn resolve(system: SystemMode, partial_ratio: Option<u32>) -> Self {
        match partial_ratio {
            Some(ratio) if ratio > 0 && ratio < PARTIAL_LIQUIDATION_DENOMINATOR => {
                LiquidationMode::Partial(ratio)
            }
            _ if system.is_recovery() => LiquidationMode::Recovery,
            _ => LiquidationMode::Normal,
        }
    }

    /// Check if this is a partial liquidation
    pub fn is_partial(&self) -> bool {
        matches!(self, LiquidationMode::Partial(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYSTEM STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Aggregate collateralization at one price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Active plus default collateral
    pub total_collateral: FixedPoint,
    /// Active plus default debt
    pub total_debt: FixedPoint,
    /// Price used for the calculation
    pub price: FixedPoint,
    /// Total collateralization ratio
    pub tcr: FixedPoint,
    /// Resolved mode
    pub mode: SystemMode,
}

impl SystemStatus {
    /// Compute TCR and mode from the fund pools
    pub fn resolve(
        active: &FundPool,
        default: &FundPool,
        price: FixedPoint,
        params: &ProtocolParams,
    ) -> Result<Self> {
        let total_collateral = active.collateral().checked_add(default.collateral())?;
        let total_debt = active.debt().checked_add(default.debt())?;
        let tcr = compute_cr(total_collateral, total_debt, price)?;

        Ok(Self {
            total_collateral,
            total_debt,
            price,
            tcr,
            mode: SystemMode::from_tcr(tcr, params.ccr),
        })
    }

    /// Check if in recovery mode
    pub fn is_recovery(&self) -> bool {
        self.mode.is_recovery()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GRACE PERIOD
// ═══════════════════════════════════════════════════════════════════════════════

/// Change of the grace period caused by [`GracePeriod::sync`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceTransition {
    /// Recovery Mode was observed for the first time
    Started,
    /// The system was observed back in Normal Mode
    Ended,
}

/// When the system was first observed in its current Recovery Mode episode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePeriod {
    started_at: Option<u64>,
}

impl GracePeriod {
    /// Timestamp Recovery Mode was first observed at, if it still holds
    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    /// Start the period on entering Recovery Mode, clear it on leaving
    pub fn sync(&mut self, mode: SystemMode, now: u64) -> Option<GraceTransition> {
        match (mode.is_recovery(), self.started_at) {
            (true, None) => {
                self.started_at = Some(now);
                Some(GraceTransition::Started)
            }
            (false, Some(_)) => {
                self.started_at = None;
                Some(GraceTransition::Ended)
            }
            _ => None,
        }
    }

    /// Seconds left before positions at or above MCR become liquidatable
    ///
    /// A period that never started has its whole `duration` left.
    pub fn remaining(&self, now: u64, duration: u64) -> u64 {
        match self.started_at {
            Some(started) => duration.saturating_sub(now.saturating_sub(started)),
            None => duration,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ELIGIBILITY
// ═══════════════════════════════════════════════════════════════════════════════

/// What is available to absorb a liquidation that may not redistribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationCapacity {
    /// Stability pool deposits
    pub pool_deposits: FixedPoint,
    /// Caller's debt-token balance
    pub caller_funds: FixedPoint,
    /// Seconds left in the Recovery Mode grace period
    pub grace_remaining: u64,
}

impl LiquidationCapacity {
    /// Debt the pool and the caller can absorb together
    pub fn total(&self) -> FixedPoint {
        self.pool_deposits
            .checked_add(self.caller_funds)
            .unwrap_or(FixedPoint::MAX)
    }

    /// Check if the pool and the caller cover `debt`
    pub fn covers(&self, debt: FixedPoint) -> bool {
        self.total() >= debt
    }
}

/// Whether and how a position may be liquidated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Liquidatable through the usual offset and redistribution split
    Liquidatable,
    /// Liquidatable only after the grace period, and only if the pool and
    /// the caller absorb the whole debt
    RequiresFullOffset,
    /// Not liquidatable at the current TCR
    NotLiquidatable,
}

impl Eligibility {
    /// Classify a position with ratio `icr`
    pub fn check(icr: FixedPoint, status: &SystemStatus, params: &ProtocolParams) -> Self {
        if icr < params.mcr {
            Eligibility::Liquidatable
        } else if status.is_recovery() && icr < status.tcr {
            Eligibility::RequiresFullOffset
        } else {
            Eligibility::NotLiquidatable
        }
    }

    /// Check if `debt` may be liquidated given `capacity`
    pub fn permits(&self, debt: FixedPoint, capacity: &LiquidationCapacity) -> bool {
        match self {
            Eligibility::Liquidatable => true,
            Eligibility::RequiresFullOffset => {
                capacity.grace_remaining == 0 && capacity.covers(debt)
            }
            Eligibility::NotLiquidatable => false,
        }
    }

    /// Fail with the matching error unless liquidation may go ahead
    ///
    /// `capacity` is only consulted for [`Eligibility::RequiresFullOffset`].
    pub fn require(
        &self,
        icr: FixedPoint,
        debt: FixedPoint,
        capacity: &LiquidationCapacity,
        status: &SystemStatus,
        params: &ProtocolParams,
    ) -> Result<()> {
        if self.permits(debt, capacity) {
            return Ok(());
        }
        match self {
            Eligibility::RequiresFullOffset if capacity.grace_remaining > 0 => {
                Err(Error::RecoveryGracePeriodActive {
                    remaining: capacity.grace_remaining,
                })
            }
            Eligibility::RequiresFullOffset => Err(Error::InsufficientStabilityPool {
                required: debt,
                available: capacity.total(),
            }),
            _ => Err(Error::IcrAboveThreshold {
                icr,
                threshold: Self::threshold(status, params),
            }),
        }
    }

    /// Who absorbs the debt the stability pool cannot offset
    pub fn remainder_funding(&self) -> RemainderFunding {
        match self {
            Eligibility::RequiresFullOffset => RemainderFunding::Caller,
            _ => RemainderFunding::Redistribution,
        }
    }

    /// Ratio below which positions become liquidatable
    pub fn threshold(status: &SystemStatus, params: &ProtocolParams) -> FixedPoint {
        if status.is_recovery() {
            status.tcr.max(params.mcr)
        } else {
            params.mcr
        }
    }
}
