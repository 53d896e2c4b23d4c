//! Protocol - the liquidation engine wired to its ledgers.
//!
//! [`Protocol`] owns every piece of mutable state: positions, the sorted
//! registry, the debt token, fund pools, the stability pool and the
//! redistribution accumulator. Each public operation runs as one atomic
//! transaction: it mutates a draft copy of the state and commits only if
//! every step succeeded, so a failed debt-token burn deep inside a batch
//! liquidation leaves nothing behind.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::config::ProtocolParams;
use crate::core::pools::{CollSurplusPool, ExternalCollateral, FundPool};
use crate::core::position::{Position, PositionStatus, Positions};
use crate::core::sorted::{InsertHint, PositionRegistry, SortedPositions};
use crate::core::token::{DebtToken, DebtTokenLedger};
use crate::error::{Error, Result};
use crate::liquidation::engine::*;
use crate::liquidation::issuance::{CommunityIssuance, FixedRateIssuance};
use crate::liquidation::recovery::{
    Eligibility, GracePeriod, GraceTransition, LiquidationCapacity, LiquidationMode, SystemStatus,
};
use crate::liquidation::rewards::{PendingRewards, RedistributionState};
use crate::liquidation::stability_pool::{DepositorPayout, StabilityPool};
use crate::oracle::price_feed::PriceFeed;
use crate::protocol::events::*;
use crate::utils::ids::{AccountId, PositionId};
use crate::utils::math::*;
use crate::utils::validation::*;

/// Label of the debt-token account holding stability pool deposits
pub const STABILITY_POOL_LABEL: &str = "stability-pool";

/// Debt-token account holding stability pool deposits
pub fn stability_pool_account() -> AccountId {
    AccountId::from_label(STABILITY_POOL_LABEL)
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Debt and collateral of a position including pending rewards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntireDebtAndColl {
    /// Recorded plus pending debt
    pub debt: FixedPoint,
    /// Recorded plus pending collateral
    pub collateral: FixedPoint,
    /// Pending debt
    pub pending_debt: FixedPoint,
    /// Pending collateral
    pub pending_collateral: FixedPoint,
}

/// Result of a batch liquidation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// One record per liquidated position, in liquidation order
    pub records: Vec<LiquidationRecord>,
    /// Totals over all records
    pub totals: BatchTotals,
}

impl BatchOutcome {
    fn push(&mut self, record: LiquidationRecord) -> Result<()> {
        self.totals.add(&record)?;
        self.records.push(record);
        Ok(())
    }
}

/// Inputs fixed for the duration of one liquidation call
#[derive(Debug, Clone, Copy)]
struct LiquidationCall {
    price: FixedPoint,
    caller: AccountId,
    grace_remaining: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a transaction may change
#[derive(Debug, Clone)]
struct LedgerState<R, T, I> {
    positions: Positions,
    registry: R,
    token: T,
    issuance: I,
    active_pool: FundPool,
    default_pool: FundPool,
    surplus_pool: CollSurplusPool,
    external: ExternalCollateral,
    stability_pool: StabilityPool,
    rewards: RedistributionState,
    stats: LiquidationStats,
    events: EventLog,
}

impl<R: PositionRegistry, T: DebtToken, I: CommunityIssuance> LedgerState<R, T, I> {
    fn new(params: &ProtocolParams, registry: R, token: T, issuance: I) -> Self {
        Self {
            positions: Positions::new(),
            registry,
            token,
            issuance,
            active_pool: FundPool::active(),
            default_pool: FundPool::default_pool(),
            surplus_pool: CollSurplusPool::new(),
            external: ExternalCollateral::new(),
            stability_pool: StabilityPool::new(
                stability_pool_account(),
                params.scale_factor,
                params.scale_jump_floor,
            ),
            rewards: RedistributionState::new(),
            stats: LiquidationStats::default(),
            events: EventLog::new(params.max_event_log),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════════

    fn system_status(&self, price: FixedPoint, params: &ProtocolParams) -> Result<SystemStatus> {
        SystemStatus::resolve(&self.active_pool, &self.default_pool, price, params)
    }

    fn entire_debt_and_coll(&self, id: &PositionId) -> Result<EntireDebtAndColl> {
        let position = self.positions.get(id)?;
        let pending = self.rewards.pending_rewards(position)?;
        Ok(EntireDebtAndColl {
            debt: position.debt.checked_add(pending.debt)?,
            collateral: position.collateral.checked_add(pending.collateral)?,
            pending_debt: pending.debt,
            pending_collateral: pending.collateral,
        })
    }

    fn current_icr(&self, id: &PositionId, price: FixedPoint) -> Result<FixedPoint> {
        let entire = self.entire_debt_and_coll(id)?;
        compute_cr(entire.collateral, entire.debt, price)
    }

    fn require_no_undercollateralized(&self, price: FixedPoint, params: &ProtocolParams) -> Result<()> {
        if let Some(riskiest) = self.registry.last() {
            if self.current_icr(&riskiest, price)? < params.mcr {
                return Err(Error::UndercollateralizedPositions);
            }
        }
        Ok(())
    }

    fn check_invariants(&self) -> Result<()> {
        let held = self
            .active_pool
            .collateral()
            .checked_add(self.default_pool.collateral())?
            .checked_add(self.stability_pool.collateral())?
            .checked_add(self.surplus_pool.total())?;
        let net_deposited = self
            .external
            .total_deposited()
            .checked_sub(self.external.total_withdrawn())?;
        if held != net_deposited {
            return Err(Error::InvariantViolation(format!(
                "collateral held {} differs from net deposits {}",
                held, net_deposited
            )));
        }

        let system_debt = self.active_pool.debt().checked_add(self.default_pool.debt())?;
        if self.token.total_supply() != system_debt {
            return Err(Error::InvariantViolation(format!(
                "token supply {} differs from system debt {}",
                self.token.total_supply(),
                system_debt
            )));
        }

        let pool_balance = self.token.balance_of(&self.stability_pool.account());
        if pool_balance < self.stability_pool.total_deposits() {
            return Err(Error::InvariantViolation(format!(
                "pool holds {} tokens for {} of deposits",
                pool_balance,
                self.stability_pool.total_deposits()
            )));
        }

        let stakes = self
            .positions
            .active()
            .try_fold(FixedPoint::ZERO, |acc, p| acc.checked_add(p.stake))?;
        if stakes != self.rewards.total_stakes() {
            return Err(Error::InvariantViolation(format!(
                "active stakes {} differ from total stakes {}",
                stakes,
                self.rewards.total_stakes()
            )));
        }

        if self.registry.len() != self.positions.active_count() {
            return Err(Error::InvariantViolation(format!(
                "registry holds {} positions, {} are active",
                self.registry.len(),
                self.positions.active_count()
            )));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POSITION HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn open_position(
        &mut self,
        params: &ProtocolParams,
        price: FixedPoint,
        owner: AccountId,
        collateral: FixedPoint,
        debt: FixedPoint,
        hint: InsertHint,
    ) -> Result<PositionId> {
        validate_non_zero(collateral)?;
        validate_min_net_debt(debt, params.min_net_debt)?;

        let icr = compute_cr(collateral, debt, price)?;
        let minimum = if self.system_status(price, params)?.is_recovery() {
            params.ccr
        } else {
            params.mcr
        };
        validate_collateral_ratio(icr, minimum)?;

        let nonce = self.positions.next_nonce(&owner);
        let mut position = Position::new(owner, nonce, collateral, debt);
        let stake = self.rewards.update_stake(&mut position)?;
        self.rewards.update_reward_snapshot(&mut position);

        let id = position.id;
        self.registry.insert(id, position.nominal_icr()?, hint)?;
        self.positions.insert(position)?;
        self.active_pool.receive_collateral(collateral)?;
        self.active_pool.increase_debt(debt)?;
        self.external.record_deposit(collateral)?;
        self.token.mint(&owner, debt)?;

        tracing::info!(position = %id, %owner, %collateral, %debt, "position opened");
        self.events.push(ProtocolEvent::PositionOpened(PositionOpenedEvent {
            position_id: id,
            owner,
            collateral,
            debt,
            stake,
        }));
        Ok(id)
    }

    fn apply_pending(&mut self, id: &PositionId) -> Result<PendingRewards> {
        let position = self.positions.get_mut(id)?;
        let pending =
            self.rewards
                .apply_pending_rewards(position, &mut self.active_pool, &mut self.default_pool)?;
        if !pending.is_zero() {
            self.events.push(ProtocolEvent::PendingRewardsApplied {
                position_id: *id,
                collateral: pending.collateral,
                debt: pending.debt,
            });
        }
        Ok(pending)
    }

    fn reinsert(&mut self, id: PositionId, hint: InsertHint) -> Result<()> {
        let nicr = self.positions.get(&id)?.nominal_icr()?;
        self.registry.reinsert(id, nicr, hint)
    }

    fn update_system_snapshots(&mut self) -> Result<()> {
        self.rewards
            .update_system_snapshots(&self.active_pool, &self.default_pool)?;
        self.events.push(ProtocolEvent::SystemSnapshotsUpdated {
            total_stakes: self.rewards.total_stakes_snapshot(),
            total_collateral: self.rewards.total_collateral_snapshot(),
        });
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION
    // ═══════════════════════════════════════════════════════════════════════════

    fn capacity(&self, call: &LiquidationCall) -> LiquidationCapacity {
        LiquidationCapacity {
            pool_deposits: self.stability_pool.total_deposits(),
            caller_funds: self.token.balance_of(&call.caller),
            grace_remaining: call.grace_remaining,
        }
    }

    fn liquidate(
        &mut self,
        params: &ProtocolParams,
        call: LiquidationCall,
        id: &PositionId,
    ) -> Result<LiquidationRecord> {
        self.positions.get_active(id)?;
        if self.positions.active_count() <= 1 {
            return Err(Error::LastPositionCannotBeLiquidated);
        }

        let status = self.system_status(call.price, params)?;
        let entire = self.entire_debt_and_coll(id)?;
        let icr = compute_cr(entire.collateral, entire.debt, call.price)?;
        let eligibility = Eligibility::check(icr, &status, params);
        eligibility.require(icr, entire.debt, &self.capacity(&call), &status, params)?;

        let mode = LiquidationMode::resolve(status.mode, None);
        self.liquidate_full(params, call, id, icr, mode, eligibility.remainder_funding())
    }

    fn liquidate_full(
        &mut self,
        params: &ProtocolParams,
        call: LiquidationCall,
        id: &PositionId,
        icr: FixedPoint,
        mode: LiquidationMode,
        funding: RemainderFunding,
    ) -> Result<LiquidationRecord> {
        self.apply_pending(id)?;

        let position = self.positions.get_mut(id)?;
        self.rewards.remove_stake(position)?;
        let (owner, collateral, debt) = (position.owner, position.collateral, position.debt);

        let allocation = CollateralAllocation::compute(collateral, debt, call.price, params)?;
        self.pay_out(call.caller, allocation.gas_compensation)?;
        if !allocation.surplus.is_zero() {
            self.active_pool.send_collateral(allocation.surplus)?;
            self.surplus_pool.account_surplus(owner, allocation.surplus)?;
        }

        let split = LiquidationSplit::compute_funded(
            debt,
            allocation.to_split,
            self.stability_pool.total_deposits(),
            funding,
        )?;
        self.execute_split(call.caller, &split)?;

        self.positions.close(id, PositionStatus::ClosedByLiquidation)?;
        self.registry.remove(id)?;

        self.finish_liquidation(LiquidationRecord {
            position_id: *id,
            owner,
            liquidator: call.caller,
            mode,
            icr,
            price: call.price,
            debt,
            collateral,
            split,
            gas_compensation: allocation.gas_compensation,
            surplus: allocation.surplus,
        })
    }

    /// Remove a fraction of a position's debt and collateral
    ///
    /// Debt the stability pool cannot offset is burned from the caller,
    /// who receives the matching collateral. Nothing is redistributed, so
    /// the position never absorbs a share of its own liquidation.
    fn partially_liquidate(
        &mut self,
        params: &ProtocolParams,
        call: LiquidationCall,
        id: &PositionId,
        ratio: u32,
        hint: InsertHint,
    ) -> Result<LiquidationRecord> {
        validate_partial_ratio(ratio)?;
        let status = self.system_status(call.price, params)?;
        let ratio = match LiquidationMode::resolve(status.mode, Some(ratio)) {
            LiquidationMode::Partial(ratio) => ratio,
            _ => return self.liquidate(params, call, id),
        };

        self.positions.get_active(id)?;
        let entire = self.entire_debt_and_coll(id)?;
        let icr = compute_cr(entire.collateral, entire.debt, call.price)?;
        let amounts =
            PartialAmounts::compute(entire.debt, entire.collateral, icr, ratio, call.price, params)?;
        Eligibility::check(icr, &status, params).require(
            icr,
            amounts.debt,
            &self.capacity(&call),
            &status,
            params,
        )?;

        self.apply_pending(id)?;
        let position = self.positions.get_mut(id)?;
        position.debt = position.debt.checked_sub(amounts.debt)?;
        position.collateral = position.collateral.checked_sub(amounts.collateral)?;
        self.rewards.update_stake(position)?;
        let owner = position.owner;

        let allocation = CollateralAllocation::partial(amounts.collateral, params)?;
        self.pay_out(call.caller, allocation.gas_compensation)?;

        let split = LiquidationSplit::compute_funded(
            amounts.debt,
            allocation.to_split,
            self.stability_pool.total_deposits(),
            RemainderFunding::Caller,
        )?;
        self.execute_split(call.caller, &split)?;
        self.reinsert(*id, hint)?;

        let new_icr = self.current_icr(id, call.price)?;
        if new_icr < icr {
            return Err(Error::InvariantViolation(format!(
                "partial liquidation lowered ICR from {} to {}",
                icr, new_icr
            )));
        }

        self.finish_liquidation(LiquidationRecord {
            position_id: *id,
            owner,
            liquidator: call.caller,
            mode: LiquidationMode::Partial(ratio),
            icr,
            price: call.price,
            debt: amounts.debt,
            collateral: amounts.collateral,
            split,
            gas_compensation: allocation.gas_compensation,
            surplus: FixedPoint::ZERO,
        })
    }

    /// Walk the registry from its riskiest end
    ///
    /// Stops at the first position that is not liquidatable, including one
    /// between MCR and TCR that the pool and the caller's balance together
    /// cannot cover.
    fn liquidate_sequentially(
        &mut self,
        params: &ProtocolParams,
        call: LiquidationCall,
        max: usize,
        recovery_only: bool,
    ) -> Result<BatchOutcome> {
        if recovery_only && !self.system_status(call.price, params)?.is_recovery() {
            return Err(Error::NotInRecoveryMode);
        }

        let mut outcome = BatchOutcome::default();
        let mut cursor = self.registry.last();

        while outcome.records.len() < max {
            let id = match cursor {
                Some(id) => id,
                None => break,
            };
            if self.positions.active_count() <= 1 {
                break;
            }

            let status = self.system_status(call.price, params)?;
            if recovery_only && !status.is_recovery() {
                tracing::debug!(tcr = %status.tcr, "system left recovery mode");
                break;
            }

            let entire = self.entire_debt_and_coll(&id)?;
            let icr = compute_cr(entire.collateral, entire.debt, call.price)?;
            let eligibility = Eligibility::check(icr, &status, params);
            if !eligibility.permits(entire.debt, &self.capacity(&call)) {
                break;
            }

            cursor = self.registry.prev(&id);
            let mode = LiquidationMode::resolve(status.mode, None);
            let record =
                self.liquidate_full(params, call, &id, icr, mode, eligibility.remainder_funding())?;
            outcome.push(record)?;
        }

        self.finish_batch(outcome)
    }

    fn liquidate_batch(
        &mut self,
        params: &ProtocolParams,
        call: LiquidationCall,
        ids: &[PositionId],
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for id in ids {
            if !self.positions.status(id).is_active() {
                tracing::warn!(position = %id, "skipping unknown or inactive position");
                continue;
            }
            if self.positions.active_count() <= 1 {
                tracing::warn!(position = %id, "stopping at the last active position");
                break;
            }

            let status = self.system_status(call.price, params)?;
            let entire = self.entire_debt_and_coll(id)?;
            let icr = compute_cr(entire.collateral, entire.debt, call.price)?;
            let eligibility = Eligibility::check(icr, &status, params);
            if !eligibility.permits(entire.debt, &self.capacity(&call)) {
                tracing::warn!(position = %id, %icr, tcr = %status.tcr, "skipping position");
                continue;
            }

            let mode = LiquidationMode::resolve(status.mode, None);
            let record =
                self.liquidate_full(params, call, id, icr, mode, eligibility.remainder_funding())?;
            outcome.push(record)?;
        }

        self.finish_batch(outcome)
    }

    /// Send active-pool collateral out of the system to `to`
    fn pay_out(&mut self, to: AccountId, amount: FixedPoint) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.active_pool.send_collateral(amount)?;
        self.external.pay(to, amount)
    }

    fn execute_split(&mut self, caller: AccountId, split: &LiquidationSplit) -> Result<()> {
        let epoch = self.stability_pool.current_epoch();
        let scale = self.stability_pool.current_scale();

        let offset = split.execute(
            &mut self.stability_pool,
            &mut self.rewards,
            &mut self.active_pool,
            &mut self.default_pool,
            &mut self.token,
        )?;

        if let Some(outcome) = offset {
            self.events.push(ProtocolEvent::SumUpdated {
                epoch,
                scale,
                increment: outcome.sum_increment,
            });
            self.events.push(ProtocolEvent::ProductUpdated { p: outcome.new_p });
            if outcome.epoch_changed {
                self.events.push(ProtocolEvent::EpochUpdated { epoch: outcome.epoch });
                self.events.push(ProtocolEvent::ScaleUpdated { scale: outcome.scale });
            } else if outcome.scale_changed {
                self.events.push(ProtocolEvent::ScaleUpdated { scale: outcome.scale });
            }
        }

        if !split.debt_to_redistribute.is_zero() {
            self.events.push(ProtocolEvent::RewardTermsUpdated {
                collateral: self.rewards.reward_per_stake_collateral(),
                debt: self.rewards.reward_per_stake_debt(),
            });
        }

        if !split.debt_from_caller.is_zero() {
            self.token.burn_from(&caller, split.debt_from_caller)?;
            self.active_pool.decrease_debt(split.debt_from_caller)?;
            self.pay_out(caller, split.collateral_to_caller)?;
            tracing::debug!(
                %caller,
                debt = %split.debt_from_caller,
                collateral = %split.collateral_to_caller,
                "caller funded liquidation remainder"
            );
        }
        Ok(())
    }

    fn finish_liquidation(&mut self, record: LiquidationRecord) -> Result<LiquidationRecord> {
        if !record.is_balanced() {
            return Err(Error::InvariantViolation(format!(
                "liquidation of {} does not balance",
                record.position_id
            )));
        }
        self.stats.record(&record)?;

        tracing::info!(
            position = %record.position_id,
            mode = ?record.mode,
            icr = %record.icr,
            debt = %record.debt,
            collateral = %record.collateral,
            offset = %record.split.debt_to_offset,
            redistributed = %record.split.debt_to_redistribute,
            from_caller = %record.split.debt_from_caller,
            "position liquidated"
        );
        self.events.push(ProtocolEvent::Liquidation(record.clone()));
        Ok(record)
    }

    fn finish_batch(&mut self, outcome: BatchOutcome) -> Result<BatchOutcome> {
        if outcome.records.is_empty() {
            return Err(Error::NothingToLiquidate);
        }
        self.update_system_snapshots()?;

        tracing::info!(
            count = outcome.totals.count,
            debt = %outcome.totals.debt,
            collateral = %outcome.totals.collateral,
            "batch liquidated"
        );
        self.events
            .push(ProtocolEvent::BatchLiquidated(outcome.totals.clone()));
        Ok(outcome)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STABILITY POOL
    // ═══════════════════════════════════════════════════════════════════════════

    fn trigger_issuance(&mut self) -> Result<()> {
        if self.stability_pool.total_deposits().is_zero() {
            return Ok(());
        }
        let issued = self.issuance.issue()?;
        if issued.is_zero() {
            return Ok(());
        }
        self.stability_pool.update_g(issued)?;

        let epoch = self.stability_pool.current_epoch();
        let scale = self.stability_pool.current_scale();
        self.events.push(ProtocolEvent::IssuanceSumUpdated {
            epoch,
            scale,
            g: self.stability_pool.g_at(epoch, scale),
        });
        Ok(())
    }

    fn pay_issuance_gains(&mut self, depositor: AccountId, payout: &DepositorPayout) -> Result<()> {
        self.issuance.send(&depositor, payout.issuance_gain)?;
        if let Some(front_end) = payout.front_end {
            self.issuance.send(&front_end, payout.front_end_issuance_gain)?;
        }
        Ok(())
    }

    fn settle_depositor(&mut self, depositor: AccountId, payout: DepositorPayout) -> Result<DepositorPayout> {
        if !payout.collateral_gain.is_zero() {
            self.external.pay(depositor, payout.collateral_gain)?;
        }
        self.pay_issuance_gains(depositor, &payout)?;
        self.events
            .push(ProtocolEvent::DepositUpdated { depositor, payout });
        Ok(payout)
    }

    fn provide_to_sp(
        &mut self,
        caller: AccountId,
        amount: FixedPoint,
        front_end_tag: Option<AccountId>,
    ) -> Result<DepositorPayout> {
        validate_non_zero(amount)?;
        let balance = self.token.balance_of(&caller);
        if balance < amount {
            return Err(Error::InsufficientBalance {
                account: caller.to_hex(),
                required: amount,
                available: balance,
            });
        }

        self.trigger_issuance()?;
        let payout = self.stability_pool.provide(caller, amount, front_end_tag)?;
        let pool_account = self.stability_pool.account();
        self.token.transfer(&caller, &pool_account, amount)?;
        self.settle_depositor(caller, payout)
    }

    fn withdraw_from_sp(
        &mut self,
        params: &ProtocolParams,
        price: FixedPoint,
        caller: AccountId,
        amount: FixedPoint,
    ) -> Result<DepositorPayout> {
        validate_non_zero(amount)?;
        if self.stability_pool.deposit(&caller).is_none() {
            return Err(Error::NoDeposit(caller.to_hex()));
        }
        self.require_no_undercollateralized(price, params)?;

        self.trigger_issuance()?;
        let payout = self.stability_pool.withdraw(caller, amount)?;
        if !payout.withdrawn.is_zero() {
            let pool_account = self.stability_pool.account();
            self.token.transfer(&pool_account, &caller, payout.withdrawn)?;
        }
        self.settle_depositor(caller, payout)
    }

    fn claim_sp_gains(&mut self, caller: AccountId) -> Result<DepositorPayout> {
        if self.stability_pool.deposit(&caller).is_none() {
            return Err(Error::NoDeposit(caller.to_hex()));
        }
        self.trigger_issuance()?;
        let payout = self.stability_pool.claim_gains(caller)?;
        self.settle_depositor(caller, payout)
    }

    fn withdraw_collateral_gain_to_position(
        &mut self,
        caller: AccountId,
        id: &PositionId,
        hint: InsertHint,
    ) -> Result<DepositorPayout> {
        if self.stability_pool.deposit(&caller).is_none() {
            return Err(Error::NoDeposit(caller.to_hex()));
        }
        match self.positions.get(id) {
            Ok(position) if position.is_active() && position.owner == caller => {}
            _ => return Err(Error::NoActivePosition(caller.to_hex())),
        }

        self.trigger_issuance()?;
        let payout = self.stability_pool.move_gain_to_position(caller)?;
        self.pay_issuance_gains(caller, &payout)?;

        self.apply_pending(id)?;
        let position = self.positions.get_mut(id)?;
        position.collateral = position.collateral.checked_add(payout.collateral_gain)?;
        self.rewards.update_stake(position)?;
        self.active_pool.receive_collateral(payout.collateral_gain)?;
        self.reinsert(*id, hint)?;

        tracing::debug!(position = %id, gain = %payout.collateral_gain, "collateral gain moved to position");
        self.events
            .push(ProtocolEvent::DepositUpdated { depositor: caller, payout });
        Ok(payout)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL
// ═══════════════════════════════════════════════════════════════════════════════

/// The liquidation engine with its ledgers
///
/// Time is supplied by the host through [`Protocol::set_time`]; it only
/// drives the Recovery Mode grace period. The grace period survives a
/// failed call, so a reverted liquidation attempt still starts it.
#[derive(Debug)]
pub struct Protocol<F, R = SortedPositions, T = DebtTokenLedger, I = FixedRateIssuance> {
    params: ProtocolParams,
    price_feed: F,
    now: u64,
    grace: GracePeriod,
    state: LedgerState<R, T, I>,
}

impl<F: PriceFeed> Protocol<F> {
    /// Create with the in-memory registry and ledger and no issuance
    pub fn new(params: ProtocolParams, price_feed: F) -> Result<Self> {
        Self::with_components(
            params,
            price_feed,
            SortedPositions::new(),
            DebtTokenLedger::default(),
            FixedRateIssuance::disabled(),
        )
    }
}

impl<F, R, T, I> Protocol<F, R, T, I>
where
    F: PriceFeed,
    R: PositionRegistry + Clone,
    T: DebtToken + Clone,
    I: CommunityIssuance + Clone,
{
    /// Create from explicit collaborators
    pub fn with_components(
        params: ProtocolParams,
        price_feed: F,
        registry: R,
        token: T,
        issuance: I,
    ) -> Result<Self> {
        params.validate()?;
        let state = LedgerState::new(&params, registry, token, issuance);
        tracing::debug!(?params, "protocol created");
        Ok(Self {
            params,
            price_feed,
            now: 0,
            grace: GracePeriod::default(),
            state,
        })
    }

    fn price(&self) -> Result<FixedPoint> {
        let price = self.price_feed.fetch_price()?;
        validate_price(price)?;
        Ok(price)
    }

    /// Start or clear the grace period from the mode at `price`
    fn sync_grace_at(&mut self, price: FixedPoint) -> Result<()> {
        let mode = self.state.system_status(price, &self.params)?.mode;
        let timestamp = self.now;
        match self.grace.sync(mode, timestamp) {
            Some(GraceTransition::Started) => {
                tracing::info!(timestamp, "recovery mode grace period started");
                self.state
                    .events
                    .push(ProtocolEvent::RecoveryGracePeriodStarted { timestamp });
            }
            Some(GraceTransition::Ended) => {
                tracing::info!(timestamp, "recovery mode grace period cleared");
                self.state
                    .events
                    .push(ProtocolEvent::RecoveryGracePeriodEnded { timestamp });
            }
            None => {}
        }
        Ok(())
    }

    /// Fetch the price and sync the grace period ahead of a liquidation
    fn liquidation_call(&mut self, caller: AccountId) -> Result<LiquidationCall> {
        let price = self.price()?;
        self.sync_grace_at(price)?;
        Ok(LiquidationCall {
            price,
            caller,
            grace_remaining: self.grace.remaining(self.now, self.params.recovery_grace_period),
        })
    }

    /// Run a liquidation transaction, re-syncing the grace period on success
    fn liquidate_with<O, Op>(&mut self, caller: AccountId, op: Op) -> Result<O>
    where
        Op: FnOnce(&mut LedgerState<R, T, I>, &ProtocolParams, LiquidationCall) -> Result<O>,
    {
        let call = self.liquidation_call(caller)?;
        let output = self.transact(|state, params| op(state, params, call))?;
        self.sync_grace_at(call.price)?;
        Ok(output)
    }

    /// Run `op` against a draft of the state, committing only on success
    fn transact<O, Op>(&mut self, op: Op) -> Result<O>
    where
        Op: FnOnce(&mut LedgerState<R, T, I>, &ProtocolParams) -> Result<O>,
    {
        let mut draft = self.state.clone();
        let output = op(&mut draft, &self.params)?;
        self.state = draft;
        Ok(output)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POSITION OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a position for `owner`, minting `debt` to them
    pub fn open_position(
        &mut self,
        owner: AccountId,
        collateral: FixedPoint,
        debt: FixedPoint,
        hint: InsertHint,
    ) -> Result<PositionId> {
        let price = self.price()?;
        let id = self
            .transact(|state, params| state.open_position(params, price, owner, collateral, debt, hint))?;
        self.sync_grace_at(price)?;
        Ok(id)
    }

    /// Fold pending redistribution rewards into a position
    pub fn apply_pending_rewards(&mut self, id: &PositionId) -> Result<PendingRewards> {
        self.transact(|state, _| {
            state.positions.get_active(id)?;
            let pending = state.apply_pending(id)?;
            if !pending.is_zero() {
                state.reinsert(*id, InsertHint::NONE)?;
            }
            Ok(pending)
        })
    }

    /// Move debt tokens between accounts
    pub fn transfer(&mut self, from: AccountId, to: AccountId, amount: FixedPoint) -> Result<()> {
        self.transact(|state, _| state.token.transfer(&from, &to, amount))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fully liquidate one position
    pub fn liquidate(&mut self, caller: AccountId, id: &PositionId) -> Result<LiquidationRecord> {
        self.liquidate_with(caller, |state, params, call| {
            let record = state.liquidate(params, call, id)?;
            state.update_system_snapshots()?;
            Ok(record)
        })
    }

    /// Liquidate `ratio` millionths of a position's debt
    ///
    /// A ratio of 0 or 1,000,000 performs a full liquidation. Debt the
    /// stability pool cannot offset is burned from the caller's balance.
    pub fn partially_liquidate(
        &mut self,
        caller: AccountId,
        id: &PositionId,
        ratio: u32,
        hint: InsertHint,
    ) -> Result<LiquidationRecord> {
        self.liquidate_with(caller, |state, params, call| {
            let record = state.partially_liquidate(params, call, id, ratio, hint)?;
            state.update_system_snapshots()?;
            Ok(record)
        })
    }

    /// Liquidate up to `n` positions from the riskiest end
    pub fn liquidate_sequentially(&mut self, caller: AccountId, n: usize) -> Result<BatchOutcome> {
        self.liquidate_with(caller, |state, params, call| {
            state.liquidate_sequentially(params, call, n, false)
        })
    }

    /// Same as [`Protocol::liquidate_sequentially`]
    pub fn liquidate_cdps(&mut self, caller: AccountId, n: usize) -> Result<BatchOutcome> {
        self.liquidate_sequentially(caller, n)
    }

    /// Liquidate up to `n` positions while the system stays in Recovery Mode
    pub fn liquidate_sequentially_in_recovery(
        &mut self,
        caller: AccountId,
        n: usize,
    ) -> Result<BatchOutcome> {
        self.liquidate_with(caller, |state, params, call| {
            state.liquidate_sequentially(params, call, n, true)
        })
    }

    /// Liquidate the given positions, skipping any that are not eligible
    pub fn liquidate_in_batch_recovery(
        &mut self,
        caller: AccountId,
        ids: &[PositionId],
    ) -> Result<BatchOutcome> {
        self.liquidate_with(caller, |state, params, call| state.liquidate_batch(params, call, ids))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLOCK AND GRACE PERIOD
    // ═══════════════════════════════════════════════════════════════════════════

    /// Current clock time, in seconds
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Set the clock; it never moves backwards
    pub fn set_time(&mut self, now: u64) {
        self.now = self.now.max(now);
    }

    /// Advance the clock by `seconds`
    pub fn advance_time(&mut self, seconds: u64) {
        self.now = self.now.saturating_add(seconds);
    }

    /// Start the grace period if the system is in Recovery Mode, clear it if not
    pub fn sync_grace_period(&mut self) -> Result<()> {
        let price = self.price()?;
        self.sync_grace_at(price)
    }

    /// Recovery Mode grace period state
    pub fn grace_period(&self) -> &GracePeriod {
        &self.grace
    }

    /// Seconds before positions at or above MCR become liquidatable
    pub fn grace_period_remaining(&self) -> u64 {
        self.grace.remaining(self.now, self.params.recovery_grace_period)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STABILITY POOL OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit `amount` debt tokens into the stability pool
    pub fn provide_to_sp(
        &mut self,
        caller: AccountId,
        amount: FixedPoint,
        front_end_tag: Option<AccountId>,
    ) -> Result<DepositorPayout> {
        self.transact(|state, _| state.provide_to_sp(caller, amount, front_end_tag))
    }

    /// Withdraw up to `amount` from the stability pool
    pub fn withdraw_from_sp(&mut self, caller: AccountId, amount: FixedPoint) -> Result<DepositorPayout> {
        let price = self.price()?;
        self.transact(|state, params| state.withdraw_from_sp(params, price, caller, amount))
    }

    /// Pay accrued stability pool gains without withdrawing
    pub fn claim_sp_gains(&mut self, caller: AccountId) -> Result<DepositorPayout> {
        self.transact(|state, _| state.claim_sp_gains(caller))
    }

    /// Add the caller's collateral gain to their own position
    pub fn withdraw_collateral_gain_to_position(
        &mut self,
        caller: AccountId,
        id: &PositionId,
        hint: InsertHint,
    ) -> Result<DepositorPayout> {
        self.transact(|state, _| state.withdraw_collateral_gain_to_position(caller, id, hint))
    }

    /// Register `caller` as a front end
    pub fn register_front_end(&mut self, caller: AccountId, kickback_rate: FixedPoint) -> Result<()> {
        self.transact(|state, _| {
            state.stability_pool.register_front_end(caller, kickback_rate)?;
            state.events.push(ProtocolEvent::FrontEndRegistered {
                front_end: caller,
                kickback_rate,
            });
            Ok(())
        })
    }

    /// Pay out surplus collateral left by a capped liquidation
    pub fn claim_collateral(&mut self, owner: AccountId) -> Result<FixedPoint> {
        self.transact(|state, _| {
            let amount = state.surplus_pool.claim(&owner)?;
            state.external.pay(owner, amount)?;
            tracing::info!(%owner, %amount, "surplus collateral claimed");
            state.events.push(ProtocolEvent::SurplusClaimed { owner, amount });
            Ok(amount)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Protocol parameters
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// Price feed
    pub fn price_feed(&self) -> &F {
        &self.price_feed
    }

    /// Mutable price feed
    pub fn price_feed_mut(&mut self) -> &mut F {
        &mut self.price_feed
    }

    /// Get a position by id
    pub fn position(&self, id: &PositionId) -> Result<&Position> {
        self.state.positions.get(id)
    }

    /// All positions
    pub fn positions(&self) -> &Positions {
        &self.state.positions
    }

    /// Sorted registry
    pub fn registry(&self) -> &R {
        &self.state.registry
    }

    /// Debt token
    pub fn token(&self) -> &T {
        &self.state.token
    }

    /// Issuance source
    pub fn issuance(&self) -> &I {
        &self.state.issuance
    }

    /// Stability pool
    pub fn stability_pool(&self) -> &StabilityPool {
        &self.state.stability_pool
    }

    /// Redistribution accumulator
    pub fn redistribution(&self) -> &RedistributionState {
        &self.state.rewards
    }

    /// Active pool
    pub fn active_pool(&self) -> &FundPool {
        &self.state.active_pool
    }

    /// Default pool
    pub fn default_pool(&self) -> &FundPool {
        &self.state.default_pool
    }

    /// Claimable surplus balances
    pub fn surplus_pool(&self) -> &CollSurplusPool {
        &self.state.surplus_pool
    }

    /// Collateral that entered or left the system
    pub fn external_collateral(&self) -> &ExternalCollateral {
        &self.state.external
    }

    /// Event log
    pub fn events(&self) -> &EventLog {
        &self.state.events
    }

    /// Lifetime liquidation statistics
    pub fn stats(&self) -> &LiquidationStats {
        &self.state.stats
    }

    /// Debt and collateral including pending rewards
    pub fn entire_debt_and_coll(&self, id: &PositionId) -> Result<EntireDebtAndColl> {
        self.state.entire_debt_and_coll(id)
    }

    /// Pending redistribution rewards of a position
    pub fn pending_rewards(&self, id: &PositionId) -> Result<PendingRewards> {
        self.state.rewards.pending_rewards(self.state.positions.get(id)?)
    }

    /// Check if a position has rewards not yet applied
    pub fn has_pending_rewards(&self, id: &PositionId) -> Result<bool> {
        Ok(self
            .state
            .rewards
            .has_pending_rewards(self.state.positions.get(id)?))
    }

    /// ICR at the current price, including pending rewards
    pub fn current_icr(&self, id: &PositionId) -> Result<FixedPoint> {
        self.state.current_icr(id, self.price()?)
    }

    /// Nominal ICR, including pending rewards
    pub fn nominal_icr(&self, id: &PositionId) -> Result<U256> {
        let entire = self.state.entire_debt_and_coll(id)?;
        compute_nominal_cr(entire.collateral, entire.debt)
    }

    /// TCR, mode and totals at the current price
    pub fn system_status(&self) -> Result<SystemStatus> {
        self.state.system_status(self.price()?, &self.params)
    }

    /// Total collateralization ratio at the current price
    pub fn tcr(&self) -> Result<FixedPoint> {
        Ok(self.system_status()?.tcr)
    }

    /// Check if the system is in Recovery Mode
    pub fn is_recovery_mode(&self) -> Result<bool> {
        Ok(self.system_status()?.is_recovery())
    }

    /// Current value of a stability pool deposit
    pub fn compounded_deposit(&self, account: &AccountId) -> Result<FixedPoint> {
        self.state.stability_pool.compounded_deposit(account)
    }

    /// Collateral gain of a depositor
    pub fn depositor_collateral_gain(&self, account: &AccountId) -> Result<FixedPoint> {
        self.state.stability_pool.depositor_collateral_gain(account)
    }

    /// Issuance gain of a depositor
    pub fn depositor_issuance_gain(&self, account: &AccountId) -> Result<FixedPoint> {
        self.state.stability_pool.depositor_issuance_gain(account)
    }

    /// Issuance gain of a front end
    pub fn front_end_issuance_gain(&self, front_end: &AccountId) -> Result<FixedPoint> {
        self.state.stability_pool.front_end_issuance_gain(front_end)
    }

    /// Current stake of a front end
    pub fn compounded_front_end_stake(&self, front_end: &AccountId) -> Result<FixedPoint> {
        self.state.stability_pool.compounded_front_end_stake(front_end)
    }

    /// Claimable surplus of an owner
    pub fn surplus_of(&self, owner: &AccountId) -> FixedPoint {
        self.state.surplus_pool.balance_of(owner)
    }

    /// Collateral paid out to an account so far
    pub fn collateral_paid_to(&self, account: &AccountId) -> FixedPoint {
        self.state.external.paid_to(account)
    }

    /// Verify conservation and bookkeeping invariants
    pub fn check_invariants(&self) -> Result<()> {
        self.state.check_invariants()
    }
}
