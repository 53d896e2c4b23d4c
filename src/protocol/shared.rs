//! Thread-safe handle to a [`Protocol`].
//!
//! Operations are serialized behind a write lock; queries share a read
//! lock. Combined with the transactional state inside [`Protocol`], a
//! reader never observes a half-applied liquidation.

use std::sync::{Arc, RwLock};

use crate::core::sorted::{InsertHint, PositionRegistry, SortedPositions};
use crate::core::token::{DebtToken, DebtTokenLedger};
use crate::error::{Error, Result};
use crate::liquidation::engine::LiquidationRecord;
use crate::liquidation::issuance::{CommunityIssuance, FixedRateIssuance};
use crate::liquidation::stability_pool::DepositorPayout;
use crate::oracle::price_feed::PriceFeed;
use crate::protocol::system::{BatchOutcome, Protocol};
use crate::utils::ids::{AccountId, PositionId};
use crate::utils::math::FixedPoint;

/// Cloneable, lock-protected protocol
#[derive(Debug)]
pub struct SharedProtocol<F, R = SortedPositions, T = DebtTokenLedger, I = FixedRateIssuance> {
    inner: Arc<RwLock<Protocol<F, R, T, I>>>,
}

impl<F, R, T, I> Clone for SharedProtocol<F, R, T, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, R, T, I> SharedProtocol<F, R, T, I>
where
    F: PriceFeed,
    R: PositionRegistry + Clone,
    T: DebtToken + Clone,
    I: CommunityIssuance + Clone,
{
    /// Wrap a protocol
    pub fn new(protocol: Protocol<F, R, T, I>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(protocol)),
        }
    }

    /// Run a query under the read lock
    pub fn read<O>(&self, f: impl FnOnce(&Protocol<F, R, T, I>) -> Result<O>) -> Result<O> {
        let guard = self.inner.read().map_err(|_| Error::Lock)?;
        f(&guard)
    }

    /// Run an operation under the write lock
    pub fn write<O>(&self, f: impl FnOnce(&mut Protocol<F, R, T, I>) -> Result<O>) -> Result<O> {
        let mut guard = self.inner.write().map_err(|_| Error::Lock)?;
        f(&mut guard)
    }

    /// Open a position
    pub fn open_position(
        &self,
        owner: AccountId,
        collateral: FixedPoint,
        debt: FixedPoint,
    ) -> Result<PositionId> {
        self.write(|p| p.open_position(owner, collateral, debt, InsertHint::NONE))
    }

    /// Fully liquidate one position
    pub fn liquidate(&self, caller: AccountId, id: &PositionId) -> Result<LiquidationRecord> {
        self.write(|p| p.liquidate(caller, id))
    }

    /// Liquidate up to `n` positions from the riskiest end
    pub fn liquidate_sequentially(&self, caller: AccountId, n: usize) -> Result<BatchOutcome> {
        self.write(|p| p.liquidate_sequentially(caller, n))
    }

    /// Deposit into the stability pool
    pub fn provide_to_sp(
        &self,
        caller: AccountId,
        amount: FixedPoint,
        front_end_tag: Option<AccountId>,
    ) -> Result<DepositorPayout> {
        self.write(|p| p.provide_to_sp(caller, amount, front_end_tag))
    }

    /// Withdraw from the stability pool
    pub fn withdraw_from_sp(&self, caller: AccountId, amount: FixedPoint) -> Result<DepositorPayout> {
        self.write(|p| p.withdraw_from_sp(caller, amount))
    }

    /// Total collateralization ratio
    pub fn tcr(&self) -> Result<FixedPoint> {
        self.read(|p| p.tcr())
    }

    /// Current value of a stability pool deposit
    pub fn compounded_deposit(&self, account: &AccountId) -> Result<FixedPoint> {
        self.read(|p| p.compounded_deposit(account))
    }

    /// Verify conservation and bookkeeping invariants
    pub fn check_invariants(&self) -> Result<()> {
        self.read(|p| p.check_invariants())
    }
}
