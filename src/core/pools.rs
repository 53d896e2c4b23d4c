//! Ledger primitives for collateral and debt.
//!
//! Balance movers with no business logic of their own:
//! - [`FundPool`]: the active pool backing live positions and the default
//!   pool holding redistributed funds not yet applied to positions
//! - [`CollSurplusPool`]: collateral reserved for owners of liquidated
//!   positions, claimable later
//! - [`ExternalCollateral`]: collateral that entered or left the system,
//!   used to audit conservation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::ids::AccountId;
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// FUND POOLS
// ═══════════════════════════════════════════════════════════════════════════════

/// Which fund pool a [`FundPool`] represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    /// Funds backing active positions
    Active,
    /// Redistributed funds pending application to positions
    Default,
}

/// Collateral and debt held by one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundPool {
    kind: PoolKind,
    collateral: FixedPoint,
    debt: FixedPoint,
}

impl FundPool {
    /// Create an empty active pool
    pub fn active() -> Self {
        Self::new(PoolKind::Active)
    }

    /// Create an empty default pool
    pub fn default_pool() -> Self {
        Self::new(PoolKind::Default)
    }

    fn new(kind: PoolKind) -> Self {
        Self {
            kind,
            collateral: FixedPoint::ZERO,
            debt: FixedPoint::ZERO,
        }
    }

    /// Pool kind
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Collateral held
    pub fn collateral(&self) -> FixedPoint {
        self.collateral
    }

    /// Debt recorded
    pub fn debt(&self) -> FixedPoint {
        self.debt
    }

    /// Credit collateral entering the pool
    pub fn receive_collateral(&mut self, amount: FixedPoint) -> Result<()> {
        self.collateral = self.collateral.checked_add(amount)?;
        Ok(())
    }

    /// Debit collateral leaving the pool to an outside destination
    pub fn send_collateral(&mut self, amount: FixedPoint) -> Result<()> {
        self.collateral = self.collateral.checked_sub(amount).map_err(|_| {
            Error::InvariantViolation(format!(
                "{:?} pool holds {} collateral, cannot send {}",
                self.kind, self.collateral, amount
            ))
        })?;
        Ok(())
    }

    /// Move collateral into another pool
    pub fn send_collateral_to(&mut self, to: &mut FundPool, amount: FixedPoint) -> Result<()> {
        self.send_collateral(amount)?;
        to.receive_collateral(amount)
    }

    /// Record additional debt
    pub fn increase_debt(&mut self, amount: FixedPoint) -> Result<()> {
        self.debt = self.debt.checked_add(amount)?;
        Ok(())
    }

    /// Remove recorded debt
    pub fn decrease_debt(&mut self, amount: FixedPoint) -> Result<()> {
        self.debt = self.debt.checked_sub(amount).map_err(|_| {
            Error::InvariantViolation(format!(
                "{:?} pool records {} debt, cannot remove {}",
                self.kind, self.debt, amount
            ))
        })?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERAL SURPLUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral owed to owners of liquidated positions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollSurplusPool {
    balances: BTreeMap<AccountId, FixedPoint>,
    total: FixedPoint,
}

impl CollSurplusPool {
    /// Create an empty surplus pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `amount` for `owner`
    pub fn account_surplus(&mut self, owner: AccountId, amount: FixedPoint) -> Result<()> {
        let balance = self.balances.entry(owner).or_insert(FixedPoint::ZERO);
        *balance = balance.checked_add(amount)?;
        self.total = self.total.checked_add(amount)?;
        Ok(())
    }

    /// Release the whole balance of `owner`
    pub fn claim(&mut self, owner: &AccountId) -> Result<FixedPoint> {
        let amount = self.balances.remove(owner).unwrap_or(FixedPoint::ZERO);
        if amount.is_zero() {
            return Err(Error::NoCollateralGain);
        }
        self.total = self.total.checked_sub(amount)?;
        Ok(amount)
    }

    /// Claimable balance of `owner`
    pub fn balance_of(&self, owner: &AccountId) -> FixedPoint {
        self.balances.get(owner).copied().unwrap_or(FixedPoint::ZERO)
    }

    /// Total collateral held
    pub fn total(&self) -> FixedPoint {
        self.total
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTERNAL COLLATERAL
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral that crossed the system boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCollateral {
    deposited: FixedPoint,
    withdrawn: FixedPoint,
    paid: BTreeMap<AccountId, FixedPoint>,
}

impl ExternalCollateral {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record collateral brought in by a borrower
    pub fn record_deposit(&mut self, amount: FixedPoint) -> Result<()> {
        self.deposited = self.deposited.checked_add(amount)?;
        Ok(())
    }

    /// Record collateral paid out to `to`
    pub fn pay(&mut self, to: AccountId, amount: FixedPoint) -> Result<()> {
        let balance = self.paid.entry(to).or_insert(FixedPoint::ZERO);
        *balance = balance.checked_add(amount)?;
        self.withdrawn = self.withdrawn.checked_add(amount)?;
        Ok(())
    }

    /// Total collateral ever deposited
    pub fn total_deposited(&self) -> FixedPoint {
        self.deposited
    }

    /// Total collateral ever paid out
    pub fn total_withdrawn(&self) -> FixedPoint {
        self.withdrawn
    }

    /// Collateral paid to `account` so far
    pub fn paid_to(&self, account: &AccountId) -> FixedPoint {
        self.paid.get(account).copied().unwrap_or(FixedPoint::ZERO)
    }
}
