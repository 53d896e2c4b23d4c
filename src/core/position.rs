//! Collateral-backed positions.
//!
//! A [`Position`] holds raw collateral and debt plus a stake and a reward
//! snapshot used by the redistribution accumulator. Pending redistribution
//! rewards are not folded into these fields until the position is touched;
//! see [`crate::liquidation::rewards`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::ids::{AccountId, PositionId};
use crate::utils::math::*;

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Never opened
    NonExistent,
    /// Open and participating in redistribution
    Active,
    /// Closed by its owner
    ClosedByOwner,
    /// Fully liquidated
    ClosedByLiquidation,
    /// Closed by a redemption
    ClosedByRedemption,
}

impl PositionStatus {
    /// Check if the position is open
    pub fn is_active(&self) -> bool {
        matches!(self, PositionStatus::Active)
    }

    /// Check if position is closed for good
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PositionStatus::ClosedByOwner
                | PositionStatus::ClosedByLiquidation
                | PositionStatus::ClosedByRedemption
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWARD SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Reward-per-stake accumulators recorded when a position was last touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    /// Collateral reward per unit staked
    pub collateral: FixedPoint,
    /// Debt reward per unit staked
    pub debt: FixedPoint,
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION
// ═══════════════════════════════════════════════════════════════════════════════

/// A collateralized debt position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier
    pub id: PositionId,
    /// Owner account
    pub owner: AccountId,
    /// Collateral, excluding pending redistribution rewards
    pub collateral: FixedPoint,
    /// Debt, excluding pending redistribution rewards
    pub debt: FixedPoint,
    /// Normalized collateral used to apportion redistributions
    pub stake: FixedPoint,
    /// Current status
    pub status: PositionStatus,
    /// Accumulator values at last touch
    pub reward_snapshot: RewardSnapshot,
}

impl Position {
    /// Create an active position; stake and snapshot are set by the caller
    pub fn new(owner: AccountId, nonce: u64, collateral: FixedPoint, debt: FixedPoint) -> Self {
        Self {
            id: PositionId::generate(&owner, nonce),
            owner,
            collateral,
            debt,
            stake: FixedPoint::ZERO,
            status: PositionStatus::Active,
            reward_snapshot: RewardSnapshot::default(),
        }
    }

    /// Check if the position is active
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Individual collateralization ratio of the recorded amounts
    pub fn icr(&self, price: FixedPoint) -> Result<FixedPoint> {
        compute_cr(self.collateral, self.debt, price)
    }

    /// Price-independent ratio used by the sorted registry
    pub fn nominal_icr(&self) -> Result<primitive_types::U256> {
        compute_nominal_cr(self.collateral, self.debt)
    }

    /// Fail unless the position is active
    pub fn require_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(Error::PositionNotActive(self.id.to_hex()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// All positions ever opened, keyed by id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Positions {
    positions: BTreeMap<PositionId, Position>,
    owner_positions: BTreeMap<AccountId, Vec<PositionId>>,
    active_count: usize,
}

impl Positions {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of positions `owner` has opened, used as the next nonce
    pub fn next_nonce(&self, owner: &AccountId) -> u64 {
        self.owner_positions.get(owner).map_or(0, |ids| ids.len() as u64)
    }

    /// Register a newly opened position
    pub fn insert(&mut self, position: Position) -> Result<()> {
        if self.positions.contains_key(&position.id) {
            return Err(Error::InvariantViolation(format!(
                "position {} already exists",
                position.id
            )));
        }
        if position.is_active() {
            self.active_count += 1;
        }
        self.owner_positions
            .entry(position.owner)
            .or_default()
            .push(position.id);
        self.positions.insert(position.id, position);
        Ok(())
    }

    /// Get a position by id
    pub fn get(&self, id: &PositionId) -> Result<&Position> {
        self.positions
            .get(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_hex()))
    }

    /// Get a mutable position by id
    pub fn get_mut(&mut self, id: &PositionId) -> Result<&mut Position> {
        self.positions
            .get_mut(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_hex()))
    }

    /// Get an active position by id
    pub fn get_active(&self, id: &PositionId) -> Result<&Position> {
        let position = self.get(id)?;
        position.require_active()?;
        Ok(position)
    }

    /// Status of `id`, `NonExistent` if never opened
    pub fn status(&self, id: &PositionId) -> PositionStatus {
        self.positions
            .get(id)
            .map_or(PositionStatus::NonExistent, |p| p.status)
    }

    /// Mark an active position closed with `status`
    pub fn close(&mut self, id: &PositionId, status: PositionStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::InvalidParameter {
                name: "status".into(),
                reason: format!("{:?} is not a closing status", status),
            });
        }
        let position = self.get_mut(id)?;
        position.require_active()?;
        position.status = status;
        self.active_count -= 1;
        Ok(())
    }

    /// Active positions owned by `owner`
    pub fn active_owned_by(&self, owner: &AccountId) -> Vec<&Position> {
        self.owner_positions
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|id| self.positions.get(id))
            .filter(|p| p.is_active())
            .collect()
    }

    /// Iterate over active positions
    pub fn active(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_active())
    }

    /// Number of active positions
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Total number of positions ever opened
    pub fn total_count(&self) -> usize {
        self.positions.len()
    }
}
