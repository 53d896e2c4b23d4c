//! Stability Pool accounting.
//!
//! Depositors pool debt tokens that absorb liquidated debt in exchange for
//! the liquidated collateral. Every deposit is tracked in O(1) with a
//! running product `P` (how much of a deposit survives the offsets so far)
//! and two running sums indexed by epoch and scale: `S` for collateral
//! gains and `G` for issuance rewards.
//!
//! ## Scale and epoch
//!
//! Each offset multiplies `P` by `1 - loss`. When that would push `P` under
//! the precision floor, `P` is multiplied by the scale factor and the scale
//! is incremented; deposits more than one scale old are dust and report
//! zero. When an offset drains the pool completely the epoch is incremented
//! and `P` resets to one; deposits from earlier epochs report zero while
//! their gains remain claimable from the sums of their own epoch.
//!
//! This module only does accounting. Token and collateral transfers are
//! carried out by [`crate::protocol::Protocol`] from the returned
//! [`DepositorPayout`].

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::constants::COMPOUNDING_DUST_DIVISOR;
use crate::utils::ids::AccountId;
use crate::utils::math::{self, FixedPoint};
use crate::utils::validation::{validate_kickback_rate, validate_non_zero};

type EpochScaleMap = BTreeMap<u64, BTreeMap<u64, U256>>;

// ═══════════════════════════════════════════════════════════════════════════════
// SNAPSHOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool state recorded when a deposit or front-end stake last changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSnapshot {
    /// Collateral sum `S` for the snapshot epoch and scale (0 for front ends)
    pub s: U256,
    /// Product `P`
    pub p: U256,
    /// Issuance sum `G` for the snapshot epoch and scale
    pub g: U256,
    /// Scale
    pub scale: u64,
    /// Epoch
    pub epoch: u64,
}

impl Default for DepositSnapshot {
    fn default() -> Self {
        Self {
            s: U256::zero(),
            p: FixedPoint::scale(),
            g: U256::zero(),
            scale: 0,
            epoch: 0,
        }
    }
}

/// A depositor's position in the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Value at the last deposit change
    pub initial_value: FixedPoint,
    /// Front end the deposit was made through
    pub front_end_tag: Option<AccountId>,
    /// Pool state at the last deposit change
    pub snapshot: DepositSnapshot,
}

/// A registered front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEnd {
    /// Share of issuance passed through to tagged depositors
    pub kickback_rate: FixedPoint,
    /// Sum of tagged deposits at the last change
    pub stake: FixedPoint,
    /// Pool state at the last stake change
    pub snapshot: DepositSnapshot,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// What a deposit change owes to whom
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositorPayout {
    /// Collateral gain owed to the depositor
    pub collateral_gain: FixedPoint,
    /// Issuance reward owed to the depositor
    pub issuance_gain: FixedPoint,
    /// Front end the deposit is tagged with
    pub front_end: Option<AccountId>,
    /// Issuance reward owed to the front end
    pub front_end_issuance_gain: FixedPoint,
    /// Compounded deposit before the change
    pub compounded_deposit: FixedPoint,
    /// Deposit after the change
    pub new_deposit: FixedPoint,
    /// Debt tokens leaving the pool for the depositor
    pub withdrawn: FixedPoint,
}

/// Effects of one offset on the global state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetOutcome {
    /// Increment applied to `S` at the pre-offset epoch and scale
    pub sum_increment: U256,
    /// `P` after the offset
    pub new_p: U256,
    /// Whether the pool was fully drained and a new epoch started
    pub epoch_changed: bool,
    /// Whether a scale change was forced
    pub scale_changed: bool,
    /// Epoch after the offset
    pub epoch: u64,
    /// Scale after the offset
    pub scale: u64,
}

/// Summary of pool state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPoolStats {
    /// Total debt tokens deposited
    pub total_deposits: FixedPoint,
    /// Collateral gains held for depositors
    pub collateral: FixedPoint,
    /// Number of depositors
    pub depositor_count: usize,
    /// Number of registered front ends
    pub front_end_count: usize,
    /// Current product
    pub p: U256,
    /// Current scale
    pub scale: u64,
    /// Current epoch
    pub epoch: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// The stability pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPool {
    /// Debt-token account holding the deposits
    account: AccountId,
    total_deposits: FixedPoint,
    collateral: FixedPoint,
    p: U256,
    current_scale: u64,
    current_epoch: u64,
    epoch_to_scale_to_sum: EpochScaleMap,
    epoch_to_scale_to_g: EpochScaleMap,
    deposits: BTreeMap<AccountId, Deposit>,
    front_ends: BTreeMap<AccountId, FrontEnd>,
    last_collateral_error_offset: U256,
    last_debt_loss_error_offset: U256,
    last_issuance_error: U256,
    scale_factor: U256,
    scale_jump_floor: U256,
}

impl StabilityPool {
    /// Create an empty pool whose deposits are held by `account`
    pub fn new(account: AccountId, scale_factor: u64, scale_jump_floor: u64) -> Self {
        Self {
            account,
            total_deposits: FixedPoint::ZERO,
            collateral: FixedPoint::ZERO,
            p: FixedPoint::scale(),
            current_scale: 0,
            current_epoch: 0,
            epoch_to_scale_to_sum: BTreeMap::new(),
            epoch_to_scale_to_g: BTreeMap::new(),
            deposits: BTreeMap::new(),
            front_ends: BTreeMap::new(),
            last_collateral_error_offset: U256::zero(),
            last_debt_loss_error_offset: U256::zero(),
            last_issuance_error: U256::zero(),
            scale_factor: U256::from(scale_factor),
            scale_jump_floor: U256::from(scale_jump_floor),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FRONT ENDS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register `account` as a front end passing `kickback_rate` of issuance
    /// rewards through to its depositors
    pub fn register_front_end(&mut self, account: AccountId, kickback_rate: FixedPoint) -> Result<()> {
        validate_kickback_rate(kickback_rate)?;
        if self.front_ends.contains_key(&account) {
            return Err(Error::AlreadyFrontEnd(account.to_hex()));
        }
        if self.deposits.contains_key(&account) {
            return Err(Error::FrontEndHasDeposit(account.to_hex()));
        }

        self.front_ends.insert(
            account,
            FrontEnd {
                kickback_rate,
                stake: FixedPoint::ZERO,
                snapshot: DepositSnapshot::default(),
            },
        );
        tracing::info!(front_end = %account, %kickback_rate, "front end registered");
        Ok(())
    }

    /// Check if `account` is a registered front end
    pub fn is_front_end(&self, account: &AccountId) -> bool {
        self.front_ends.contains_key(account)
    }

    /// Registered front end, if any
    pub fn front_end(&self, account: &AccountId) -> Option<&FrontEnd> {
        self.front_ends.get(account)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSITOR OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add `amount` to the deposit of `depositor`
    ///
    /// `front_end_tag` only takes effect when the depositor has no
    /// deposit yet; an existing deposit keeps its tag.
    pub fn provide(
        &mut self,
        depositor: AccountId,
        amount: FixedPoint,
        front_end_tag: Option<AccountId>,
    ) -> Result<DepositorPayout> {
        validate_non_zero(amount)?;
        if self.is_front_end(&depositor) {
            return Err(Error::AlreadyFrontEnd(depositor.to_hex()));
        }
        if let Some(tag) = front_end_tag {
            if !self.is_front_end(&tag) {
                return Err(Error::UnknownFrontEnd(tag.to_hex()));
            }
        }

        let tag = match self.deposits.get(&depositor) {
            Some(deposit) => deposit.front_end_tag,
            None => front_end_tag,
        };

        let mut payout = self.settle(&depositor, tag)?;

        if let Some(front_end) = tag {
            let stake = self.compounded_front_end_stake(&front_end)?.checked_add(amount)?;
            self.update_front_end_stake(front_end, stake)?;
        }

        self.total_deposits = self.total_deposits.checked_add(amount)?;
        payout.new_deposit = payout.compounded_deposit.checked_add(amount)?;
        self.update_deposit(depositor, payout.new_deposit, tag)?;
        self.release_collateral(payout.collateral_gain)?;

        tracing::debug!(%depositor, %amount, new_deposit = %payout.new_deposit, "deposit provided");
        Ok(payout)
    }

    /// Withdraw up to `amount` from the deposit of `depositor`
    ///
    /// Requests above the compounded deposit withdraw everything.
    pub fn withdraw(&mut self, depositor: AccountId, amount: FixedPoint) -> Result<DepositorPayout> {
        validate_non_zero(amount)?;
        self.withdraw_inner(depositor, amount)
    }

    /// Pay out accrued gains without touching the compounded deposit
    pub fn claim_gains(&mut self, depositor: AccountId) -> Result<DepositorPayout> {
        self.withdraw_inner(depositor, FixedPoint::ZERO)
    }

    /// Settle `depositor` and detach the collateral gain so the caller can
    /// add it to a position
    pub fn move_gain_to_position(&mut self, depositor: AccountId) -> Result<DepositorPayout> {
        let tag = self.require_deposit(&depositor)?.front_end_tag;
        if self.depositor_collateral_gain(&depositor)?.is_zero() {
            return Err(Error::NoCollateralGain);
        }

        let mut payout = self.settle(&depositor, tag)?;
        if let Some(front_end) = tag {
            let stake = self.compounded_front_end_stake(&front_end)?;
            self.update_front_end_stake(front_end, stake)?;
        }

        payout.new_deposit = payout.compounded_deposit;
        self.update_deposit(depositor, payout.new_deposit, tag)?;
        self.release_collateral(payout.collateral_gain)?;
        Ok(payout)
    }

    fn withdraw_inner(&mut self, depositor: AccountId, amount: FixedPoint) -> Result<DepositorPayout> {
        let tag = self.require_deposit(&depositor)?.front_end_tag;

        let mut payout = self.settle(&depositor, tag)?;
        let withdrawn = amount.min(payout.compounded_deposit);

        if let Some(front_end) = tag {
            let stake = self
                .compounded_front_end_stake(&front_end)?
                .saturating_sub(withdrawn);
            self.update_front_end_stake(front_end, stake)?;
        }

        self.total_deposits = self.total_deposits.checked_sub(withdrawn)?;
        payout.withdrawn = withdrawn;
        payout.new_deposit = payout.compounded_deposit.checked_sub(withdrawn)?;
        self.update_deposit(depositor, payout.new_deposit, tag)?;
        self.release_collateral(payout.collateral_gain)?;

        tracing::debug!(%depositor, %withdrawn, new_deposit = %payout.new_deposit, "deposit withdrawn");
        Ok(payout)
    }

    fn require_deposit(&self, depositor: &AccountId) -> Result<&Deposit> {
        self.deposits
            .get(depositor)
            .filter(|d| !d.initial_value.is_zero())
            .ok_or_else(|| Error::NoDeposit(depositor.to_hex()))
    }

    /// Gains and compounded value of `depositor` at the current state
    fn settle(&self, depositor: &AccountId, tag: Option<AccountId>) -> Result<DepositorPayout> {
        let mut payout = DepositorPayout {
            collateral_gain: self.depositor_collateral_gain(depositor)?,
            issuance_gain: self.depositor_issuance_gain(depositor)?,
            front_end: tag,
            compounded_deposit: self.compounded_deposit(depositor)?,
            ..DepositorPayout::default()
        };
        if let Some(front_end) = tag {
            payout.front_end_issuance_gain = self.front_end_issuance_gain(&front_end)?;
        }
        Ok(payout)
    }

    fn release_collateral(&mut self, amount: FixedPoint) -> Result<()> {
        self.collateral = self.collateral.checked_sub(amount).map_err(|_| {
            Error::InvariantViolation(format!(
                "stability pool holds {} collateral, owes {}",
                self.collateral, amount
            ))
        })?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SNAPSHOTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn current_snapshot(&self, with_sum: bool) -> DepositSnapshot {
        let s = if with_sum {
            Self::lookup(&self.epoch_to_scale_to_sum, self.current_epoch, self.current_scale)
        } else {
            U256::zero()
        };
        DepositSnapshot {
            s,
            p: self.p,
            g: Self::lookup(&self.epoch_to_scale_to_g, self.current_epoch, self.current_scale),
            scale: self.current_scale,
            epoch: self.current_epoch,
        }
    }

    fn update_deposit(
        &mut self,
        depositor: AccountId,
        value: FixedPoint,
        tag: Option<AccountId>,
    ) -> Result<()> {
        if value.is_zero() {
            self.deposits.remove(&depositor);
            return Ok(());
        }
        let snapshot = self.current_snapshot(true);
        self.deposits.insert(
            depositor,
            Deposit {
                initial_value: value,
                front_end_tag: tag,
                snapshot,
            },
        );
        Ok(())
    }

    fn update_front_end_stake(&mut self, account: AccountId, stake: FixedPoint) -> Result<()> {
        let snapshot = if stake.is_zero() {
            DepositSnapshot::default()
        } else {
            self.current_snapshot(false)
        };
        let front_end = self
            .front_ends
            .get_mut(&account)
            .ok_or_else(|| Error::UnknownFrontEnd(account.to_hex()))?;
        front_end.stake = stake;
        front_end.snapshot = snapshot;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ISSUANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Spread `issued` reward tokens over the current deposits
    ///
    /// Does nothing while the pool is empty.
    pub fn update_g(&mut self, issued: FixedPoint) -> Result<()> {
        if self.total_deposits.is_zero() || issued.is_zero() {
            return Ok(());
        }

        let numerator = math::add(
            math::mul(issued.raw(), FixedPoint::scale(), "issuance numerator")?,
            self.last_issuance_error,
            "issuance numerator",
        )?;
        let total = self.total_deposits.raw();
        let per_unit = math::div(numerator, total, "issuance per unit staked")?;
        self.last_issuance_error = math::sub(
            numerator,
            math::mul(per_unit, total, "issuance residue")?,
            "issuance residue",
        )?;

        let marginal = math::mul(per_unit, self.p, "marginal issuance gain")?;
        let (epoch, scale) = (self.current_epoch, self.current_scale);
        let g = Self::entry(&mut self.epoch_to_scale_to_g, epoch, scale);
        *g = math::add(*g, marginal, "G update")?;

        tracing::debug!(%issued, epoch, scale, g = %*g, "issuance sum updated");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OFFSET
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cancel `debt` against the pool and credit `collateral` to depositors
    pub fn offset(&mut self, debt: FixedPoint, collateral: FixedPoint) -> Result<OffsetOutcome> {
        if self.total_deposits.is_zero() {
            return Err(Error::InvariantViolation("offset against an empty pool".into()));
        }
        if debt.is_zero() || debt > self.total_deposits {
            return Err(Error::InvariantViolation(format!(
                "offset of {} against deposits of {}",
                debt, self.total_deposits
            )));
        }

        let (coll_per_unit, debt_loss_per_unit) = self.compute_rewards_per_unit_staked(debt, collateral)?;
        let outcome = self.update_reward_sum_and_product(coll_per_unit, debt_loss_per_unit)?;

        self.total_deposits = self.total_deposits.checked_sub(debt)?;
        self.collateral = self.collateral.checked_add(collateral)?;

        tracing::debug!(
            %debt,
            %collateral,
            p = %outcome.new_p,
            epoch = outcome.epoch,
            scale = outcome.scale,
            "offset against stability pool"
        );
        Ok(outcome)
    }

    fn compute_rewards_per_unit_staked(
        &mut self,
        debt: FixedPoint,
        collateral: FixedPoint,
    ) -> Result<(U256, U256)> {
        let scale = FixedPoint::scale();
        let total = self.total_deposits.raw();

        let coll_numerator = math::add(
            math::mul(collateral.raw(), scale, "collateral numerator")?,
            self.last_collateral_error_offset,
            "collateral numerator",
        )?;
        let coll_per_unit = math::div(coll_numerator, total, "collateral per unit staked")?;
        self.last_collateral_error_offset = math::sub(
            coll_numerator,
            math::mul(coll_per_unit, total, "collateral residue")?,
            "collateral residue",
        )?;

        let debt_loss_per_unit = if debt == self.total_deposits {
            self.last_debt_loss_error_offset = U256::zero();
            scale
        } else {
            let loss_numerator = math::sub(
                math::mul(debt.raw(), scale, "loss numerator")?,
                self.last_debt_loss_error_offset,
                "loss numerator",
            )?;
            // Round up so depositors never over-report their remaining deposits
            let per_unit = math::add(
                math::div(loss_numerator, total, "loss per unit staked")?,
                U256::one(),
                "loss per unit staked",
            )?;
            self.last_debt_loss_error_offset = math::sub(
                math::mul(per_unit, total, "loss residue")?,
                loss_numerator,
                "loss residue",
            )?;
            per_unit
        };

        Ok((coll_per_unit, debt_loss_per_unit))
    }

    fn update_reward_sum_and_product(
        &mut self,
        coll_per_unit: U256,
        debt_loss_per_unit: U256,
    ) -> Result<OffsetOutcome> {
        let scale = FixedPoint::scale();
        if debt_loss_per_unit > scale {
            return Err(Error::InvariantViolation(format!(
                "debt loss per unit staked {} exceeds one",
                debt_loss_per_unit
            )));
        }

        let current_p = self.p;
        let new_product_factor = math::sub(scale, debt_loss_per_unit, "product factor")?;

        let sum_increment = math::mul(coll_per_unit, current_p, "marginal collateral gain")?;
        let (epoch, current_scale) = (self.current_epoch, self.current_scale);
        let s = Self::entry(&mut self.epoch_to_scale_to_sum, epoch, current_scale);
        *s = math::add(*s, sum_increment, "S update")?;

        let mut epoch_changed = false;
        let mut scale_changed = false;

        let new_p = if new_product_factor.is_zero() {
            self.current_epoch += 1;
            self.current_scale = 0;
            epoch_changed = true;
            tracing::info!(epoch = self.current_epoch, "stability pool emptied, new epoch");
            scale
        } else {
            let candidate = math::mul_div(current_p, new_product_factor, scale, "P update")?;
            if candidate < self.scale_jump_floor {
                self.current_scale += 1;
                scale_changed = true;
                tracing::debug!(scale = self.current_scale, "stability pool scale changed");
                math::mul_div(
                    math::mul(current_p, new_product_factor, "P update")?,
                    self.scale_factor,
                    scale,
                    "P update",
                )?
            } else {
                candidate
            }
        };

        if new_p.is_zero() {
            return Err(Error::InvariantViolation("P reached zero".into()));
        }
        self.p = new_p;

        Ok(OffsetOutcome {
            sum_increment,
            new_p,
            epoch_changed,
            scale_changed,
            epoch: self.current_epoch,
            scale: self.current_scale,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMPOUNDING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Current value of the deposit of `depositor`
    pub fn compounded_deposit(&self, depositor: &AccountId) -> Result<FixedPoint> {
        match self.deposits.get(depositor) {
            Some(deposit) => self.compound(deposit.initial_value, &deposit.snapshot),
            None => Ok(FixedPoint::ZERO),
        }
    }

    /// Current stake of front end `account`
    pub fn compounded_front_end_stake(&self, account: &AccountId) -> Result<FixedPoint> {
        match self.front_ends.get(account) {
            Some(front_end) => self.compound(front_end.stake, &front_end.snapshot),
            None => Ok(FixedPoint::ZERO),
        }
    }

    /// Collateral gain accrued by `depositor`
    pub fn depositor_collateral_gain(&self, depositor: &AccountId) -> Result<FixedPoint> {
        match self.deposits.get(depositor) {
            Some(deposit) => self.gain_from_snapshots(
                deposit.initial_value,
                deposit.snapshot.s,
                &deposit.snapshot,
                &self.epoch_to_scale_to_sum,
            ),
            None => Ok(FixedPoint::ZERO),
        }
    }

    /// Issuance reward accrued by `depositor`, after front-end kickback
    pub fn depositor_issuance_gain(&self, depositor: &AccountId) -> Result<FixedPoint> {
        let deposit = match self.deposits.get(depositor) {
            Some(deposit) => deposit,
            None => return Ok(FixedPoint::ZERO),
        };
        let kickback = match deposit.front_end_tag {
            Some(tag) => self
                .front_ends
                .get(&tag)
                .map(|fe| fe.kickback_rate)
                .ok_or_else(|| Error::UnknownFrontEnd(tag.to_hex()))?,
            None => FixedPoint::ONE,
        };
        let gain = self.gain_from_snapshots(
            deposit.initial_value,
            deposit.snapshot.g,
            &deposit.snapshot,
            &self.epoch_to_scale_to_g,
        )?;
        kickback.checked_mul(gain)
    }

    /// Issuance reward accrued by front end `account`
    pub fn front_end_issuance_gain(&self, account: &AccountId) -> Result<FixedPoint> {
        let front_end = match self.front_ends.get(account) {
            Some(front_end) => front_end,
            None => return Ok(FixedPoint::ZERO),
        };
        let share = FixedPoint::ONE.checked_sub(front_end.kickback_rate)?;
        let gain = self.gain_from_snapshots(
            front_end.stake,
            front_end.snapshot.g,
            &front_end.snapshot,
            &self.epoch_to_scale_to_g,
        )?;
        share.checked_mul(gain)
    }

    fn compound(&self, initial: FixedPoint, snapshot: &DepositSnapshot) -> Result<FixedPoint> {
        if initial.is_zero() || snapshot.epoch < self.current_epoch {
            return Ok(FixedPoint::ZERO);
        }

        let scale_diff = self.current_scale.saturating_sub(snapshot.scale);
        let raw = match scale_diff {
            0 => math::mul_div(initial.raw(), self.p, snapshot.p, "compounded deposit")?,
            1 => math::div(
                math::mul_div(initial.raw(), self.p, snapshot.p, "compounded deposit")?,
                self.scale_factor,
                "compounded deposit",
            )?,
            _ => U256::zero(),
        };

        let dust = initial.raw() / U256::from(COMPOUNDING_DUST_DIVISOR);
        if raw < dust {
            return Ok(FixedPoint::ZERO);
        }
        Ok(FixedPoint::from_raw(raw))
    }

    fn gain_from_snapshots(
        &self,
        initial: FixedPoint,
        snapshot_sum: U256,
        snapshot: &DepositSnapshot,
        sums: &EpochScaleMap,
    ) -> Result<FixedPoint> {
        if initial.is_zero() {
            return Ok(FixedPoint::ZERO);
        }

        let first = math::sub(
            Self::lookup(sums, snapshot.epoch, snapshot.scale),
            snapshot_sum,
            "first portion",
        )?;
        let second = Self::lookup(sums, snapshot.epoch, snapshot.scale + 1) / self.scale_factor;
        let portions = math::add(first, second, "gain portions")?;

        let gain = math::div(
            math::mul_div(initial.raw(), portions, snapshot.p, "gain from snapshots")?,
            FixedPoint::scale(),
            "gain from snapshots",
        )?;
        Ok(FixedPoint::from_raw(gain))
    }

    fn lookup(map: &EpochScaleMap, epoch: u64, scale: u64) -> U256 {
        map.get(&epoch)
            .and_then(|scales| scales.get(&scale))
            .copied()
            .unwrap_or_default()
    }

    fn entry(map: &mut EpochScaleMap, epoch: u64, scale: u64) -> &mut U256 {
        map.entry(epoch).or_default().entry(scale).or_default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Debt-token account holding the deposits
    pub fn account(&self) -> AccountId {
        self.account
    }

    /// Total deposits
    pub fn total_deposits(&self) -> FixedPoint {
        self.total_deposits
    }

    /// Collateral held for depositors
    pub fn collateral(&self) -> FixedPoint {
        self.collateral
    }

    /// Current product `P`
    pub fn p(&self) -> U256 {
        self.p
    }

    /// Current scale
    pub fn current_scale(&self) -> u64 {
        self.current_scale
    }

    /// Current epoch
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    /// Collateral sum `S` at `epoch` and `scale`
    pub fn sum_at(&self, epoch: u64, scale: u64) -> U256 {
        Self::lookup(&self.epoch_to_scale_to_sum, epoch, scale)
    }

    /// Issuance sum `G` at `epoch` and `scale`
    pub fn g_at(&self, epoch: u64, scale: u64) -> U256 {
        Self::lookup(&self.epoch_to_scale_to_g, epoch, scale)
    }

    /// Recorded deposit of `depositor`
    pub fn deposit(&self, depositor: &AccountId) -> Option<&Deposit> {
        self.deposits.get(depositor)
    }

    /// Iterate over depositors
    pub fn depositors(&self) -> impl Iterator<Item = &AccountId> {
        self.deposits.keys()
    }

    /// Number of depositors
    pub fn depositor_count(&self) -> usize {
        self.deposits.len()
    }

    /// Get pool statistics
    pub fn statistics(&self) -> StabilityPoolStats {
        StabilityPoolStats {
            total_deposits: self.total_deposits,
            collateral: self.collateral,
            depositor_count: self.deposits.len(),
            front_end_count: self.front_ends.len(),
            p: self.p,
            scale: self.current_scale,
            epoch: self.current_epoch,
        }
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
