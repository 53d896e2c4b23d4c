//! Liquidation engine.
//!
//! This module holds the arithmetic shared by every liquidation entry point:
//! - Capping seized collateral and carving out gas compensation and surplus
//! - Sizing a partial liquidation
//! - The offset/redistribution split and its execution
//! - Caller funding of debt the stability pool cannot offset
//! - Per-liquidation records and batch totals

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::config::ProtocolParams;
use crate::core::pools::FundPool;
use crate::core::token::DebtToken;
use crate::error::{Error, Result};
use crate::liquidation::recovery::LiquidationMode;
use crate::liquidation::rewards::RedistributionState;
use crate::liquidation::stability_pool::{OffsetOutcome, StabilityPool};
use crate::utils::constants::PARTIAL_LIQUIDATION_DENOMINATOR;
use crate::utils::ids::{AccountId, PositionId};
use crate::utils::math::*;
use crate::utils::validation::validate_partial_ratio;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERAL ALLOCATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a liquidated position's collateral goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralAllocation {
    /// Collateral handed to the offset/redistribution split
    pub to_split: FixedPoint,
    /// Collateral paid to the caller
    pub gas_compensation: FixedPoint,
    /// Collateral above the liquidation ICR cap, reserved for the owner
    pub surplus: FixedPoint,
}

impl CollateralAllocation {
    /// Allocate `collateral` backing `debt` at `price`
    ///
    /// Seized collateral is capped at `debt * liquidation_icr / price`.
    pub fn compute(
        collateral: FixedPoint,
        debt: FixedPoint,
        price: FixedPoint,
        params: &ProtocolParams,
    ) -> Result<Self> {
        let cap = debt.checked_mul(params.liquidation_icr)?.checked_div(price)?;
        let capped = collateral.min(cap);
        let surplus = collateral.checked_sub(capped)?;
        Self::from_seized(capped, surplus, params)
    }

    /// Allocate collateral of a partial liquidation, which never leaves a surplus
    pub fn partial(seized: FixedPoint, params: &ProtocolParams) -> Result<Self> {
        Self::from_seized(seized, FixedPoint::ZERO, params)
    }

    fn from_seized(seized: FixedPoint, surplus: FixedPoint, params: &ProtocolParams) -> Result<Self> {
        let gas_compensation = seized.div_integer(params.gas_compensation_divisor)?;
        Ok(Self {
            to_split: seized.checked_sub(gas_compensation)?,
            gas_compensation,
            surplus,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARTIAL LIQUIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Debt and collateral removed by a partial liquidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialAmounts {
    /// Debt removed
    pub debt: FixedPoint,
    /// Collateral removed
    pub collateral: FixedPoint,
}

impl PartialAmounts {
    /// Size a partial liquidation of `ratio` millionths of `debt`
    ///
    /// Collateral is taken at `min(icr, liquidation_icr)` so the remaining
    /// position's ratio never drops.
    pub fn compute(
        debt: FixedPoint,
        collateral: FixedPoint,
        icr: FixedPoint,
        ratio: u32,
        price: FixedPoint,
        params: &ProtocolParams,
    ) -> Result<Self> {
        validate_partial_ratio(ratio)?;

        let debt_liquidated = FixedPoint::from_raw(mul_div(
            debt.raw(),
            U256::from(ratio),
            U256::from(PARTIAL_LIQUIDATION_DENOMINATOR),
            "partial debt",
        )?);
        if debt_liquidated.is_zero() {
            return Err(Error::InvalidPartialRatio(ratio));
        }

        let remaining = debt.checked_sub(debt_liquidated)?;
        if remaining < params.min_net_debt {
            return Err(Error::PartialLiquidationBelowMinDebt {
                remaining,
                minimum: params.min_net_debt,
            });
        }

        let seize_ratio = icr.min(params.liquidation_icr);
        let collateral_liquidated = debt_liquidated
            .checked_mul(seize_ratio)?
            .checked_div(price)?
            .min(collateral);

        Ok(Self {
            debt: debt_liquidated,
            collateral: collateral_liquidated,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OFFSET / REDISTRIBUTION SPLIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Who absorbs the debt the stability pool cannot offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemainderFunding {
    /// Spread over every active position
    Redistribution,
    /// Burned from the caller, who receives the matching collateral
    Caller,
}

/// Division of a liquidation between the stability pool, redistribution
/// and the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationSplit {
    /// Debt cancelled against the stability pool
    pub debt_to_offset: FixedPoint,
    /// Collateral sent to the stability pool
    pub collateral_to_pool: FixedPoint,
    /// Debt spread over active positions
    pub debt_to_redistribute: FixedPoint,
    /// Collateral spread over active positions
    pub collateral_to_redistribute: FixedPoint,
    /// Debt burned from the caller's own balance
    #[serde(default)]
    pub debt_from_caller: FixedPoint,
    /// Collateral paid to the caller for the debt they burned
    #[serde(default)]
    pub collateral_to_caller: FixedPoint,
}

impl LiquidationSplit {
    /// Split `debt` and `collateral` given the pool's `deposits`
    pub fn compute(debt: FixedPoint, collateral: FixedPoint, deposits: FixedPoint) -> Result<Self> {
        let debt_to_offset = debt.min(deposits);
        let collateral_to_pool = if debt_to_offset.is_zero() {
            FixedPoint::ZERO
        } else {
            collateral.mul_div(debt_to_offset, debt)?
        };

        Ok(Self {
            debt_to_offset,
            collateral_to_pool,
            debt_to_redistribute: debt.checked_sub(debt_to_offset)?,
            collateral_to_redistribute: collateral.checked_sub(collateral_to_pool)?,
            debt_from_caller: FixedPoint::ZERO,
            collateral_to_caller: FixedPoint::ZERO,
        })
    }

    /// Split as [`LiquidationSplit::compute`], sending the remainder to `funding`
    pub fn compute_funded(
        debt: FixedPoint,
        collateral: FixedPoint,
        deposits: FixedPoint,
        funding: RemainderFunding,
    ) -> Result<Self> {
        let split = Self::compute(debt, collateral, deposits)?;
        Ok(match funding {
            RemainderFunding::Redistribution => split,
            RemainderFunding::Caller => Self {
                debt_from_caller: split.debt_to_redistribute,
                collateral_to_caller: split.collateral_to_redistribute,
                debt_to_redistribute: FixedPoint::ZERO,
                collateral_to_redistribute: FixedPoint::ZERO,
                ..split
            },
        })
    }

    /// Apply the pool and redistribution parts of the split to the ledgers
    ///
    /// The offset portion is burned from the stability pool's token
    /// account; a failing burn aborts the whole liquidation. The caller's
    /// part is settled by the protocol, which owns the caller's accounts.
    pub fn execute<T: DebtToken>(
        &self,
        pool: &mut StabilityPool,
        rewards: &mut RedistributionState,
        active: &mut FundPool,
        default: &mut FundPool,
        token: &mut T,
    ) -> Result<Option<OffsetOutcome>> {
        let outcome = if self.debt_to_offset.is_zero() {
            None
        } else {
            let outcome = pool.offset(self.debt_to_offset, self.collateral_to_pool)?;
            active.decrease_debt(self.debt_to_offset)?;
            token.burn_from(&pool.account(), self.debt_to_offset)?;
            active.send_collateral(self.collateral_to_pool)?;
            Some(outcome)
        };

        rewards.redistribute(
            self.debt_to_redistribute,
            self.collateral_to_redistribute,
            active,
            default,
        )?;
        Ok(outcome)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Record of one liquidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationRecord {
    /// Liquidated position
    pub position_id: PositionId,
    /// Owner of the position
    pub owner: AccountId,
    /// Caller who triggered the liquidation
    pub liquidator: AccountId,
    /// Mode the liquidation ran in
    pub mode: LiquidationMode,
    /// Position ratio before liquidation
    pub icr: FixedPoint,
    /// Price used
    pub price: FixedPoint,
    /// Debt removed from the position
    pub debt: FixedPoint,
    /// Collateral removed from the position
    pub collateral: FixedPoint,
    /// How debt and collateral were divided
    pub split: LiquidationSplit,
    /// Collateral paid to the caller
    pub gas_compensation: FixedPoint,
    /// Collateral reserved for the owner
    pub surplus: FixedPoint,
}

impl LiquidationRecord {
    /// Check the record accounts for every unit it removed
    pub fn is_balanced(&self) -> bool {
        let debt_ok = self
            .split
            .debt_to_offset
            .checked_add(self.split.debt_to_redistribute)
            .and_then(|d| d.checked_add(self.split.debt_from_caller))
            .map_or(false, |d| d == self.debt);

        let coll_ok = self
            .split
            .collateral_to_pool
            .checked_add(self.split.collateral_to_redistribute)
            .and_then(|c| c.checked_add(self.split.collateral_to_caller))
            .and_then(|c| c.checked_add(self.gas_compensation))
            .and_then(|c| c.checked_add(self.surplus))
            .map_or(false, |c| c == self.collateral);

        debt_ok && coll_ok
    }
}

/// Totals over a batch of liquidations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTotals {
    /// Positions liquidated
    pub count: usize,
    /// Debt liquidated
    pub debt: FixedPoint,
    /// Collateral liquidated
    pub collateral: FixedPoint,
    /// Debt offset against the pool
    pub debt_offset: FixedPoint,
    /// Collateral sent to the pool
    pub collateral_to_pool: FixedPoint,
    /// Debt redistributed
    pub debt_redistributed: FixedPoint,
    /// Collateral redistributed
    pub collateral_redistributed: FixedPoint,
    /// Debt burned from the caller
    #[serde(default)]
    pub debt_from_caller: FixedPoint,
    /// Collateral paid to the caller for burned debt
    #[serde(default)]
    pub collateral_to_caller: FixedPoint,
    /// Collateral paid to the caller as gas compensation
    pub gas_compensation: FixedPoint,
    /// Collateral reserved for owners
    pub surplus: FixedPoint,
}

impl BatchTotals {
    /// Add one liquidation
    pub fn add(&mut self, record: &LiquidationRecord) -> Result<()> {
        self.count += 1;
        self.debt = self.debt.checked_add(record.debt)?;
        self.collateral = self.collateral.checked_add(record.collateral)?;
        self.debt_offset = self.debt_offset.checked_add(record.split.debt_to_offset)?;
        self.collateral_to_pool = self
            .collateral_to_pool
            .checked_add(record.split.collateral_to_pool)?;
        self.debt_redistributed = self
            .debt_redistributed
            .checked_add(record.split.debt_to_redistribute)?;
        self.collateral_redistributed = self
            .collateral_redistributed
            .checked_add(record.split.collateral_to_redistribute)?;
        self.debt_from_caller = self
            .debt_from_caller
            .checked_add(record.split.debt_from_caller)?;
        self.collateral_to_caller = self
            .collateral_to_caller
            .checked_add(record.split.collateral_to_caller)?;
        self.gas_compensation = self.gas_compensation.checked_add(record.gas_compensation)?;
        self.surplus = self.surplus.checked_add(record.surplus)?;
        Ok(())
    }

    /// Check if nothing was liquidated
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifetime liquidation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationStats {
    /// Full liquidations performed
    pub full_liquidations: u64,
    /// Partial liquidations performed
    pub partial_liquidations: u64,
    /// Total debt liquidated
    pub total_debt_liquidated: FixedPoint,
    /// Total collateral liquidated
    pub total_collateral_liquidated: FixedPoint,
    /// Total gas compensation paid
    pub total_gas_compensation: FixedPoint,
}

impl LiquidationStats {
    /// Fold a record into the statistics
    pub fn record(&mut self, record: &LiquidationRecord) -> Result<()> {
        if record.mode.is_partial() {
            self.partial_liquidations += 1;
        } else {
            self.full_liquidations += 1;
        }
        self.total_debt_liquidated = self.total_debt_liquidated.checked_add(record.debt)?;
        self.total_collateral_liquidated = self
            .total_collateral_liquidated
            .checked_add(record.collateral)?;
        self.total_gas_compensation = self
            .total_gas_compensation
            .checked_add(record.gas_compensation)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::token::DebtTokenLedger;
    use crate::utils::constants::{SCALE_FACTOR, SCALE_JUMP_FLOOR};

    fn units(n: u64) -> FixedPoint {
        FixedPoint::from_integer(n)
    }

    fn fp(s: &str) -> FixedPoint {
        s.parse().unwrap()
    }

    #[test]
    fn test_split_partial_offset() {
        let split = LiquidationSplit::compute(units(1000), units(10), units(400)).unwrap();
        assert_eq!(split.debt_to_offset, units(400));
        assert_eq!(split.collateral_to_pool, units(4));
        assert_eq!(split.debt_to_redistribute, units(600));
        assert_eq!(split.collateral_to_redistribute, units(6));
    }

    #[test]
    fn test_split_empty_pool() {
        let split = LiquidationSplit::compute(units(1000), units(10), FixedPoint::ZERO).unwrap();
        assert_eq!(split.debt_to_offset, FixedPoint::ZERO);
        assert_eq!(split.collateral_to_redistribute, units(10));
    }

    #[test]
    fn test_split_is_exact_with_uneven_division() {
        let debt = units(3);
        let coll = FixedPoint::from_raw_u128(10);
        let split = LiquidationSplit::compute(debt, coll, units(1)).unwrap();
        assert_eq!(
            split.collateral_to_pool.checked_add(split.collateral_to_redistribute).unwrap(),
            coll
        );
    }

    #[test]
    fn test_caller_funded_split_never_redistributes() {
        let split = LiquidationSplit::compute_funded(
            units(1000),
            units(10),
            units(400),
            RemainderFunding::Caller,
        )
        .unwrap();
        assert_eq!(split.debt_to_offset, units(400));
        assert_eq!(split.collateral_to_pool, units(4));
        assert_eq!(split.debt_from_caller, units(600));
        assert_eq!(split.collateral_to_caller, units(6));
        assert!(split.debt_to_redistribute.is_zero());
        assert!(split.collateral_to_redistribute.is_zero());

        let redistributed = LiquidationSplit::compute_funded(
            units(1000),
            units(10),
            units(400),
            RemainderFunding::Redistribution,
        )
        .unwrap();
        assert_eq!(
            redistributed,
            LiquidationSplit::compute(units(1000), units(10), units(400)).unwrap()
        );
    }

    #[test]
    fn test_allocation_caps_collateral() {
        let params = ProtocolParams::default();
        // 2 collateral at 1000 backing 1000 debt: cap is 1.1
        let alloc = CollateralAllocation::compute(units(2), units(1000), units(1000), &params).unwrap();
        assert_eq!(alloc.surplus, fp("0.9"));
        assert_eq!(alloc.gas_compensation, fp("0.0055"));
        assert_eq!(alloc.to_split, fp("1.0945"));
    }

    #[test]
    fn test_allocation_below_cap_has_no_surplus() {
        let params = ProtocolParams::default();
        let alloc = CollateralAllocation::compute(units(1), units(1000), units(1000), &params).unwrap();
        assert_eq!(alloc.surplus, FixedPoint::ZERO);
        assert_eq!(alloc.gas_compensation, fp("0.005"));
    }

    #[test]
    fn test_partial_amounts_keep_ratio() {
        let params = ProtocolParams::default().with_min_net_debt(units(100));
        let icr = FixedPoint::from_percentage(105);
        // 2.1 collateral at 1000 backing 2000 debt: 105%
        let amounts =
            PartialAmounts::compute(units(2000), fp("2.1"), icr, 250_000, units(1000), &params).unwrap();
        assert_eq!(amounts.debt, units(500));
        assert_eq!(amounts.collateral, fp("0.525"));
    }

    #[test]
    fn test_partial_amounts_respect_min_debt() {
        let params = ProtocolParams::default();
        let icr = FixedPoint::from_percentage(105);
        assert!(matches!(
            PartialAmounts::compute(units(2000), fp("2.1"), icr, 500_000, units(1000), &params),
            Err(Error::PartialLiquidationBelowMinDebt { .. })
        ));
        assert_eq!(
            PartialAmounts::compute(units(2000), fp("2.1"), icr, 1_000_001, units(1000), &params),
            Err(Error::InvalidPartialRatio(1_000_001))
        );
    }

    #[test]
    fn test_execute_burns_from_pool_account() {
        let mut pool = StabilityPool::new(
            AccountId::from_label("stability-pool"),
            SCALE_FACTOR as u64,
            SCALE_JUMP_FLOOR as u64,
        );
        let mut token = DebtTokenLedger::default();
        let mut rewards = RedistributionState::new();
        let mut active = FundPool::active();
        let mut default = FundPool::default_pool();

        let depositor = AccountId::from_label("alice");
        pool.provide(depositor, units(100), None).unwrap();
        token.mint(&pool.account(), units(100)).unwrap();
        active.receive_collateral(units(1)).unwrap();
        active.increase_debt(units(100)).unwrap();

        let split = LiquidationSplit::compute(units(100), units(1), pool.total_deposits()).unwrap();
        let outcome = split
            .execute(&mut pool, &mut rewards, &mut active, &mut default, &mut token)
            .unwrap()
            .unwrap();

        assert!(outcome.epoch_changed);
        assert_eq!(token.balance_of(&pool.account()), FixedPoint::ZERO);
        assert_eq!(active.debt(), FixedPoint::ZERO);
        assert_eq!(active.collateral(), FixedPoint::ZERO);
        assert_eq!(pool.collateral(), units(1));
    }

    #[test]
    fn test_execute_fails_when_burn_fails() {
        let mut pool = StabilityPool::new(
            AccountId::from_label("stability-pool"),
            SCALE_FACTOR as u64,
            SCALE_JUMP_FLOOR as u64,
        );
        let mut token = DebtTokenLedger::default();
        let mut rewards = RedistributionState::new();
        let mut active = FundPool::active();
        let mut default = FundPool::default_pool();

        pool.provide(AccountId::from_label("alice"), units(100), None).unwrap();
        active.receive_collateral(units(1)).unwrap();
        active.increase_debt(units(100)).unwrap();

        // Pool account was never funded
        let split = LiquidationSplit::compute(units(50), units(1), pool.total_deposits()).unwrap();
        assert!(matches!(
            split.execute(&mut pool, &mut rewards, &mut active, &mut default, &mut token),
            Err(Error::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_batch_totals() {
        let record = LiquidationRecord {
            position_id: PositionId::generate(&AccountId::from_label("owner"), 0),
            owner: AccountId::from_label("owner"),
            liquidator: AccountId::from_label("keeper"),
            mode: LiquidationMode::Normal,
            icr: FixedPoint::from_percentage(105),
            price: units(1000),
            debt: units(100),
            collateral: units(2),
            split: LiquidationSplit::compute(units(100), fp("1.99"), units(40)).unwrap(),
            gas_compensation: fp("0.01"),
            surplus: FixedPoint::ZERO,
        };
        assert!(record.is_balanced());

        let mut funded = record.clone();
        funded.split = LiquidationSplit::compute_funded(
            units(100),
            fp("1.99"),
            units(40),
            RemainderFunding::Caller,
        )
        .unwrap();
        assert!(funded.is_balanced());
        funded.split.collateral_to_caller = FixedPoint::ZERO;
        assert!(!funded.is_balanced());

        let mut totals = BatchTotals::default();
        totals.add(&record).unwrap();
        totals.add(&record).unwrap();
        assert_eq!(totals.count, 2);
        assert_eq!(totals.debt_offset, units(80));
        assert_eq!(totals.gas_compensation, fp("0.02"));

        let mut stats = LiquidationStats::default();
        stats.record(&record).unwrap();
        assert_eq!(stats.full_liquidations, 1);
        assert_eq!(stats.total_debt_liquidated, units(100));
    }
}
