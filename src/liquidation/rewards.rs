//! Redistribution accumulator.
//!
//! When the stability pool cannot absorb a liquidation, the leftover debt
//! and collateral are spread over every active position in proportion to
//! its stake. Nothing loops over positions: [`RedistributionState`] bumps
//! two reward-per-stake accumulators and each position picks up its share
//! lazily the next time it is touched.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::pools::FundPool;
use crate::core::position::Position;
use crate::error::{Error, Result};
use crate::utils::math::{self, FixedPoint};

/// Redistribution rewards owed to a position but not yet applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRewards {
    /// Collateral owed
    pub collateral: FixedPoint,
    /// Debt owed
    pub debt: FixedPoint,
}

impl PendingRewards {
    /// Check if nothing is owed
    pub fn is_zero(&self) -> bool {
        self.collateral.is_zero() && self.debt.is_zero()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REDISTRIBUTION STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Global redistribution bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionState {
    /// Sum of the stakes of all active positions
    total_stakes: FixedPoint,
    /// `total_stakes` captured after the last liquidation
    total_stakes_snapshot: FixedPoint,
    /// Active plus default collateral captured after the last liquidation
    total_collateral_snapshot: FixedPoint,
    /// Collateral reward per unit staked
    reward_per_stake_collateral: FixedPoint,
    /// Debt reward per unit staked
    reward_per_stake_debt: FixedPoint,
    /// Rounding residue carried into the next collateral redistribution
    last_collateral_error: U256,
    /// Rounding residue carried into the next debt redistribution
    last_debt_error: U256,
}

impl RedistributionState {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Sum of all active stakes
    pub fn total_stakes(&self) -> FixedPoint {
        self.total_stakes
    }

    /// Stakes snapshot
    pub fn total_stakes_snapshot(&self) -> FixedPoint {
        self.total_stakes_snapshot
    }

    /// Collateral snapshot
    pub fn total_collateral_snapshot(&self) -> FixedPoint {
        self.total_collateral_snapshot
    }

    /// Collateral reward per unit staked
    pub fn reward_per_stake_collateral(&self) -> FixedPoint {
        self.reward_per_stake_collateral
    }

    /// Debt reward per unit staked
    pub fn reward_per_stake_debt(&self) -> FixedPoint {
        self.reward_per_stake_debt
    }

    /// Rewards owed to `position` as a pure function of its snapshot
    pub fn pending_rewards(&self, position: &Position) -> Result<PendingRewards> {
        if !position.is_active() || position.stake.is_zero() {
            return Ok(PendingRewards::default());
        }

        let coll_delta = self
            .reward_per_stake_collateral
            .checked_sub(position.reward_snapshot.collateral)?;
        let debt_delta = self
            .reward_per_stake_debt
            .checked_sub(position.reward_snapshot.debt)?;

        Ok(PendingRewards {
            collateral: position.stake.checked_mul(coll_delta)?,
            debt: position.stake.checked_mul(debt_delta)?,
        })
    }

    /// Check if the accumulators moved since `position` was last touched
    pub fn has_pending_rewards(&self, position: &Position) -> bool {
        position.is_active()
            && (position.reward_snapshot.collateral < self.reward_per_stake_collateral
                || position.reward_snapshot.debt < self.reward_per_stake_debt)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STAKES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Stake for `collateral` at the current snapshot ratio
    pub fn compute_new_stake(&self, collateral: FixedPoint) -> Result<FixedPoint> {
        if self.total_collateral_snapshot.is_zero() {
            return Ok(collateral);
        }
        if self.total_stakes_snapshot.is_zero() {
            return Err(Error::InvariantViolation(
                "stake computed against zero stakes snapshot".into(),
            ));
        }
        collateral.mul_div(self.total_stakes_snapshot, self.total_collateral_snapshot)
    }

    /// Recompute the stake of `position` from its collateral
    pub fn update_stake(&mut self, position: &mut Position) -> Result<FixedPoint> {
        let new_stake = self.compute_new_stake(position.collateral)?;
        self.total_stakes = self
            .total_stakes
            .checked_sub(position.stake)?
            .checked_add(new_stake)?;
        position.stake = new_stake;
        Ok(new_stake)
    }

    /// Remove the stake of a position leaving the active set
    pub fn remove_stake(&mut self, position: &mut Position) -> Result<()> {
        self.total_stakes = self.total_stakes.checked_sub(position.stake)?;
        position.stake = FixedPoint::ZERO;
        Ok(())
    }

    /// Record the current accumulators as the reward snapshot of `position`
    pub fn update_reward_snapshot(&self, position: &mut Position) {
        position.reward_snapshot.collateral = self.reward_per_stake_collateral;
        position.reward_snapshot.debt = self.reward_per_stake_debt;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fold pending rewards into `position` and move the funds back to the
    /// active pool
    pub fn apply_pending_rewards(
        &self,
        position: &mut Position,
        active: &mut FundPool,
        default: &mut FundPool,
    ) -> Result<PendingRewards> {
        position.require_active()?;
        let pending = self.pending_rewards(position)?;

        if !pending.is_zero() {
            position.collateral = position.collateral.checked_add(pending.collateral)?;
            position.debt = position.debt.checked_add(pending.debt)?;

            default.decrease_debt(pending.debt)?;
            active.increase_debt(pending.debt)?;
            default.send_collateral_to(active, pending.collateral)?;

            tracing::debug!(
                position = %position.id,
                collateral = %pending.collateral,
                debt = %pending.debt,
                "pending rewards applied"
            );
        }

        self.update_reward_snapshot(position);
        Ok(pending)
    }

    /// Spread `debt` and `collateral` over all active stakes
    pub fn redistribute(
        &mut self,
        debt: FixedPoint,
        collateral: FixedPoint,
        active: &mut FundPool,
        default: &mut FundPool,
    ) -> Result<()> {
        if debt.is_zero() {
            return Ok(());
        }
        if self.total_stakes.is_zero() {
            return Err(Error::InvariantViolation(
                "redistribution with no active stakes".into(),
            ));
        }

        let stakes = self.total_stakes.raw();
        let (coll_per_stake, coll_error) =
            Self::per_unit_staked(collateral, self.last_collateral_error, stakes)?;
        let (debt_per_stake, debt_error) =
            Self::per_unit_staked(debt, self.last_debt_error, stakes)?;

        self.last_collateral_error = coll_error;
        self.last_debt_error = debt_error;
        self.reward_per_stake_collateral = self
            .reward_per_stake_collateral
            .checked_add(coll_per_stake)?;
        self.reward_per_stake_debt = self.reward_per_stake_debt.checked_add(debt_per_stake)?;

        active.decrease_debt(debt)?;
        default.increase_debt(debt)?;
        active.send_collateral_to(default, collateral)?;

        tracing::debug!(
            %debt,
            %collateral,
            l_collateral = %self.reward_per_stake_collateral,
            l_debt = %self.reward_per_stake_debt,
            "redistributed"
        );
        Ok(())
    }

    /// Capture stakes and collateral after a liquidation
    pub fn update_system_snapshots(&mut self, active: &FundPool, default: &FundPool) -> Result<()> {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = active.collateral().checked_add(default.collateral())?;
        Ok(())
    }

    /// `(amount * 1e18 + error) / stakes`, returning the new residue
    fn per_unit_staked(amount: FixedPoint, error: U256, stakes: U256) -> Result<(FixedPoint, U256)> {
        let numerator = math::add(
            math::mul(amount.raw(), FixedPoint::scale(), "reward numerator")?,
            error,
            "reward numerator",
        )?;
        let per_unit = math::div(numerator, stakes, "reward per unit staked")?;
        let residue = math::sub(
            numerator,
            math::mul(per_unit, stakes, "reward residue")?,
            "reward residue",
        )?;
        Ok((FixedPoint::from_raw(per_unit), residue))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// SHA-256 of the serialized state
    pub fn state_hash(&self) -> Result<[u8; 32]> {
        let digest = Sha256::digest(self.to_bytes()?);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ids::AccountId;

    fn units(n: u64) -> FixedPoint {
        FixedPoint::from_integer(n)
    }

    fn open(
        state: &mut RedistributionState,
        active: &mut FundPool,
        label: &str,
        coll: u64,
        debt: u64,
    ) -> Position {
        let mut position = Position::new(AccountId::from_label(label), 0, units(coll), units(debt));
        state.update_stake(&mut position).unwrap();
        state.update_reward_snapshot(&mut position);
        active.receive_collateral(units(coll)).unwrap();
        active.increase_debt(units(debt)).unwrap();
        position
    }

    #[test]
    fn test_stake_falls_back_to_collateral() {
        let state = RedistributionState::new();
        assert_eq!(state.compute_new_stake(units(7)).unwrap(), units(7));
    }

    #[test]
    fn test_zero_stakes_snapshot_is_invariant_violation() {
        let mut active = FundPool::active();
        let default = FundPool::default_pool();
        active.receive_collateral(units(5)).unwrap();

        let mut state = RedistributionState::new();
        state.update_system_snapshots(&active, &default).unwrap();

        assert!(matches!(
            state.compute_new_stake(units(1)),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_redistribute_is_pro_rata() {
        let mut state = RedistributionState::new();
        let mut active = FundPool::active();
        let mut default = FundPool::default_pool();

        let mut a = open(&mut state, &mut active, "a", 3, 2000);
        let mut b = open(&mut state, &mut active, "b", 1, 2000);

        // A liquidated position's funds are still in the active pool
        active.receive_collateral(units(4)).unwrap();
        active.increase_debt(units(1000)).unwrap();
        state.redistribute(units(1000), units(4), &mut active, &mut default).unwrap();

        assert_eq!(default.debt(), units(1000));
        assert_eq!(default.collateral(), units(4));

        let pending_a = state.pending_rewards(&a).unwrap();
        let pending_b = state.pending_rewards(&b).unwrap();
        assert_eq!(pending_a.collateral, units(3));
        assert_eq!(pending_a.debt, units(750));
        assert_eq!(pending_b.collateral, units(1));
        assert_eq!(pending_b.debt, units(250));

        state.apply_pending_rewards(&mut a, &mut active, &mut default).unwrap();
        state.apply_pending_rewards(&mut b, &mut active, &mut default).unwrap();
        assert_eq!(a.collateral, units(6));
        assert_eq!(b.debt, units(2250));
        assert_eq!(default.debt(), FixedPoint::ZERO);
        assert_eq!(default.collateral(), FixedPoint::ZERO);
    }

    #[test]
    fn test_apply_pending_rewards_is_idempotent() {
        let mut state = RedistributionState::new();
        let mut active = FundPool::active();
        let mut default = FundPool::default_pool();

        let mut a = open(&mut state, &mut active, "a", 2, 2000);
        active.receive_collateral(units(1)).unwrap();
        active.increase_debt(units(500)).unwrap();
        state.redistribute(units(500), units(1), &mut active, &mut default).unwrap();

        let first = state.apply_pending_rewards(&mut a, &mut active, &mut default).unwrap();
        let second = state.apply_pending_rewards(&mut a, &mut active, &mut default).unwrap();
        assert!(!first.is_zero());
        assert!(second.is_zero());
        assert!(!state.has_pending_rewards(&a));
    }

    #[test]
    fn test_rounding_residue_carried_forward() {
        let mut state = RedistributionState::new();
        let mut active = FundPool::active();
        let mut default = FundPool::default_pool();
        open(&mut state, &mut active, "a", 3, 2000);

        // 1 wei over 3 units of stake does not divide evenly
        let wei = FixedPoint::from_raw_u128(1);
        active.receive_collateral(wei).unwrap();
        active.increase_debt(wei).unwrap();
        state.redistribute(wei, wei, &mut active, &mut default).unwrap();

        assert!(!state.last_collateral_error.is_zero());
    }

    #[test]
    fn test_redistribute_without_stakes_fails() {
        let mut state = RedistributionState::new();
        let mut active = FundPool::active();
        let mut default = FundPool::default_pool();
        assert!(matches!(
            state.redistribute(units(1), units(1), &mut active, &mut default),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_stake_uses_snapshot_ratio() {
        let mut state = RedistributionState::new();
        let mut active = FundPool::active();
        let mut default = FundPool::default_pool();
        open(&mut state, &mut active, "a", 4, 2000);

        active.receive_collateral(units(4)).unwrap();
        active.increase_debt(units(100)).unwrap();
        state.redistribute(units(100), units(4), &mut active, &mut default).unwrap();
        state.update_system_snapshots(&active, &default).unwrap();

        // 4 stake backs 8 collateral, so new collateral is staked at half
        assert_eq!(state.compute_new_stake(units(2)).unwrap(), units(1));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut state = RedistributionState::new();
        let mut active = FundPool::active();
        open(&mut state, &mut active, "a", 4, 2000);

        let restored = RedistributionState::from_bytes(&state.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.state_hash().unwrap(), state.state_hash().unwrap());
    }
}
