//! Integration tests for the CDP engine.
//!
//! These tests drive the public [`Protocol`] API through complete
//! liquidation scenarios and check the books balance afterwards.

use cdp_engine::core::config::ProtocolParams;
use cdp_engine::core::position::PositionStatus;
use cdp_engine::core::sorted::{InsertHint, PositionRegistry, SortedPositions};
use cdp_engine::core::token::{DebtToken, DebtTokenLedger};
use cdp_engine::error::{Error, Result};
use cdp_engine::liquidation::issuance::{CommunityIssuance, FixedRateIssuance};
use cdp_engine::liquidation::recovery::LiquidationMode;
use cdp_engine::oracle::price_feed::FixedPriceFeed;
use cdp_engine::protocol::{stability_pool_account, Protocol};
use cdp_engine::utils::ids::{AccountId, PositionId};
use cdp_engine::utils::logging::init_logging;
use cdp_engine::utils::math::FixedPoint;
use proptest::prelude::*;

// ═══════════════════════════════════════════════════════════════════════════════
// TEST HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn units(n: u64) -> FixedPoint {
    FixedPoint::from_integer(n)
}

fn tenths(n: u64) -> FixedPoint {
    FixedPoint::from_ratio(n, 10).unwrap()
}

fn account(label: &str) -> AccountId {
    AccountId::from_label(label)
}

fn keeper() -> AccountId {
    account("keeper")
}

fn assert_close(actual: FixedPoint, expected: FixedPoint) {
    // 1e-9 units
    let tolerance = FixedPoint::from_raw_u128(1_000_000_000);
    assert!(
        actual.abs_diff(expected) <= tolerance,
        "{} is not within tolerance of {}",
        actual,
        expected
    );
}

fn protocol_at(price: u64) -> Protocol<FixedPriceFeed> {
    init_logging("cdp_engine=debug");
    Protocol::new(ProtocolParams::default(), FixedPriceFeed::new(units(price))).unwrap()
}

fn open(
    protocol: &mut Protocol<FixedPriceFeed>,
    owner: &str,
    collateral: FixedPoint,
    debt: u64,
) -> PositionId {
    protocol
        .open_position(account(owner), collateral, units(debt), InsertHint::NONE)
        .unwrap()
}

/// Alice 3/2000, Bob 10/5000 and Carol 1/1800 at a price of 2000
fn three_positions() -> (Protocol<FixedPriceFeed>, PositionId, PositionId, PositionId) {
    let mut protocol = protocol_at(2000);
    let alice = open(&mut protocol, "alice", units(3), 2000);
    let bob = open(&mut protocol, "bob", units(10), 5000);
    let carol = open(&mut protocol, "carol", units(1), 1800);
    (protocol, alice, bob, carol)
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL OFFSET TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_offset_shares_loss_and_gain_pro_rata() {
    let (mut protocol, _, _, carol) = three_positions();
    protocol.provide_to_sp(account("alice"), units(1500), None).unwrap();
    protocol.provide_to_sp(account("bob"), units(500), None).unwrap();

    // Carol at 105.5%
    protocol.price_feed_mut().set_price(units(1900));
    let record = protocol.liquidate(keeper(), &carol).unwrap();

    assert_eq!(record.mode, LiquidationMode::Normal);
    assert_eq!(record.split.debt_to_offset, units(1800));
    assert!(record.split.debt_to_redistribute.is_zero());
    assert_eq!(record.surplus, FixedPoint::ZERO);

    // 0.5% of one unit to the liquidator, the rest to depositors
    let gas = FixedPoint::from_ratio(5, 1000).unwrap();
    assert_eq!(record.gas_compensation, gas);
    assert_eq!(protocol.collateral_paid_to(&keeper()), gas);

    let to_pool = units(1).checked_sub(gas).unwrap();
    assert_eq!(protocol.stability_pool().collateral(), to_pool);
    assert_eq!(protocol.stability_pool().total_deposits(), units(200));

    assert_close(protocol.compounded_deposit(&account("alice")).unwrap(), units(150));
    assert_close(protocol.compounded_deposit(&account("bob")).unwrap(), units(50));
    assert_close(
        protocol.depositor_collateral_gain(&account("alice")).unwrap(),
        to_pool.mul_div(units(3), units(4)).unwrap(),
    );
    assert_close(
        protocol.depositor_collateral_gain(&account("bob")).unwrap(),
        to_pool.div_integer(4).unwrap(),
    );

    assert_eq!(
        protocol.position(&carol).unwrap().status,
        PositionStatus::ClosedByLiquidation
    );
    assert!(!protocol.registry().contains(&carol));
    protocol.check_invariants().unwrap();
}

#[test]
fn test_full_drain_starts_new_epoch() {
    let (mut protocol, _, _, carol) = three_positions();
    protocol.provide_to_sp(account("alice"), units(1800), None).unwrap();

    protocol.price_feed_mut().set_price(units(1900));
    protocol.liquidate(keeper(), &carol).unwrap();

    let pool = protocol.stability_pool();
    assert_eq!(pool.current_epoch(), 1);
    assert_eq!(pool.current_scale(), 0);
    assert_eq!(pool.p(), FixedPoint::scale());
    assert_eq!(pool.total_deposits(), FixedPoint::ZERO);
    assert_eq!(
        protocol.compounded_deposit(&account("alice")).unwrap(),
        FixedPoint::ZERO
    );

    // Gain survives the epoch change and is paid on withdrawal
    let expected_gain = FixedPoint::from_ratio(995, 1000).unwrap();
    assert_close(
        protocol.depositor_collateral_gain(&account("alice")).unwrap(),
        expected_gain,
    );
    let payout = protocol.withdraw_from_sp(account("alice"), units(1)).unwrap();
    assert_eq!(payout.withdrawn, FixedPoint::ZERO);
    assert_close(protocol.collateral_paid_to(&account("alice")), expected_gain);

    // A fresh deposit in the new epoch starts clean
    protocol.provide_to_sp(account("bob"), units(100), None).unwrap();
    assert_eq!(protocol.compounded_deposit(&account("bob")).unwrap(), units(100));
    assert_eq!(
        protocol.depositor_collateral_gain(&account("bob")).unwrap(),
        FixedPoint::ZERO
    );
    protocol.check_invariants().unwrap();
}

#[test]
fn test_deposits_after_scale_change() {
    let (mut protocol, _, _, carol) = three_positions();
    let dave = open(&mut protocol, "dave", units(1), 1800);
    // Leaves one millionth of a unit after Carol's 1800 is offset
    let deposit = units(1800)
        .checked_add(FixedPoint::from_raw_u128(1_000_000_000_000))
        .unwrap();
    protocol.provide_to_sp(account("alice"), deposit, None).unwrap();

    protocol.price_feed_mut().set_price(units(1900));
    let record = protocol.liquidate(keeper(), &carol).unwrap();
    assert_eq!(record.split.debt_to_offset, units(1800));
    assert_eq!(protocol.stability_pool().current_epoch(), 0);
    assert_eq!(protocol.stability_pool().current_scale(), 1);
    let dust = FixedPoint::from_ratio(1, 1000).unwrap();
    assert!(protocol.compounded_deposit(&account("alice")).unwrap() < dust);

    // A deposit made at the new scale compounds from its own snapshot
    protocol.provide_to_sp(account("bob"), units(2000), None).unwrap();
    assert_eq!(protocol.compounded_deposit(&account("bob")).unwrap(), units(2000));
    protocol.liquidate(keeper(), &dave).unwrap();
    assert_eq!(protocol.stability_pool().current_scale(), 1);

    let remaining = protocol.compounded_deposit(&account("bob")).unwrap();
    assert!(remaining.abs_diff(units(200)) < dust);
    let payout = protocol.withdraw_from_sp(account("bob"), units(5000)).unwrap();
    assert_eq!(payout.withdrawn, remaining);
    assert!(payout
        .collateral_gain
        .abs_diff(FixedPoint::from_ratio(995, 1000).unwrap())
        < dust);
    assert_eq!(
        protocol.token().balance_of(&account("bob")),
        units(3000).checked_add(remaining).unwrap()
    );

    let alice_payout = protocol.withdraw_from_sp(account("alice"), units(1)).unwrap();
    assert!(alice_payout
        .collateral_gain
        .abs_diff(FixedPoint::from_ratio(995, 1000).unwrap())
        < dust);
    protocol.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// ELIGIBILITY TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_exactly_mcr_is_not_liquidatable() {
    let (mut protocol, _, _, carol) = three_positions();

    // 1 * 1980 / 1800 = 110%
    protocol.price_feed_mut().set_price(units(1980));
    assert_eq!(
        protocol.current_icr(&carol).unwrap(),
        FixedPoint::from_percentage(110)
    );
    assert!(matches!(
        protocol.liquidate(keeper(), &carol),
        Err(Error::IcrAboveThreshold { .. })
    ));

    protocol.price_feed_mut().set_price(units(1979));
    protocol.liquidate(keeper(), &carol).unwrap();
}

#[test]
fn test_liquidating_closed_position_fails() {
    let (mut protocol, _, _, carol) = three_positions();
    protocol.price_feed_mut().set_price(units(1900));
    protocol.liquidate(keeper(), &carol).unwrap();

    assert!(matches!(
        protocol.liquidate(keeper(), &carol),
        Err(Error::PositionNotActive(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARTIAL LIQUIDATION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_partial_liquidation_of_a_quarter() {
    let mut protocol = protocol_at(2000);
    open(&mut protocol, "alice", units(3), 2000);
    open(&mut protocol, "bob", units(10), 5000);
    let carol = open(&mut protocol, "carol", units(4), 7000);
    protocol.provide_to_sp(account("alice"), units(2000), None).unwrap();

    // 4 * 1900 / 7000 = 108.6%
    protocol.price_feed_mut().set_price(units(1900));
    let icr_before = protocol.current_icr(&carol).unwrap();
    let record = protocol
        .partially_liquidate(keeper(), &carol, 250_000, InsertHint::NONE)
        .unwrap();

    assert_eq!(record.mode, LiquidationMode::Partial(250_000));
    assert_eq!(record.debt, units(1750));
    assert_close(record.collateral, units(1));
    assert_eq!(record.split.debt_to_offset, units(1750));

    let position = protocol.position(&carol).unwrap();
    assert!(position.is_active());
    assert_eq!(position.debt, units(5250));
    assert_close(position.collateral, units(3));
    assert!(protocol.current_icr(&carol).unwrap() >= icr_before);
    assert!(protocol.registry().contains(&carol));
    protocol.check_invariants().unwrap();
}

#[test]
fn test_partial_liquidation_respects_min_debt() {
    let (mut protocol, _, _, carol) = three_positions();
    protocol.price_feed_mut().set_price(units(1900));

    assert!(matches!(
        protocol.partially_liquidate(keeper(), &carol, 500_000, InsertHint::NONE),
        Err(Error::PartialLiquidationBelowMinDebt { .. })
    ));
    assert!(matches!(
        protocol.partially_liquidate(keeper(), &carol, 1_000_001, InsertHint::NONE),
        Err(Error::InvalidPartialRatio(1_000_001))
    ));

    // The full denominator falls back to a full liquidation
    let record = protocol
        .partially_liquidate(keeper(), &carol, 1_000_000, InsertHint::NONE)
        .unwrap();
    assert_eq!(record.mode, LiquidationMode::Normal);
}

/// Alice 3/2000, Bob 10/5000 and Carol 4/7000 at 2000, nothing deposited
fn partial_scenario() -> (Protocol<FixedPriceFeed>, PositionId) {
    let mut protocol = protocol_at(2000);
    open(&mut protocol, "alice", units(3), 2000);
    open(&mut protocol, "bob", units(10), 5000);
    let carol = open(&mut protocol, "carol", units(4), 7000);
    (protocol, carol)
}

#[test]
fn test_partial_liquidation_without_deposits_burns_caller_funds() {
    let (mut protocol, carol) = partial_scenario();
    protocol.price_feed_mut().set_price(units(1900));

    let events_before = protocol.events().len();
    let supply_before = protocol.token().total_supply();
    let result = protocol.partially_liquidate(keeper(), &carol, 250_000, InsertHint::NONE);
    assert!(matches!(
        result,
        Err(Error::InsufficientBalance { ref account, .. }) if *account == keeper().to_hex()
    ));
    assert_eq!(protocol.position(&carol).unwrap().debt, units(7000));
    assert_eq!(protocol.events().len(), events_before);
    assert_eq!(protocol.stats().partial_liquidations, 0);
    assert_eq!(protocol.collateral_paid_to(&keeper()), FixedPoint::ZERO);

    protocol.transfer(account("bob"), keeper(), units(2000)).unwrap();
    let record = protocol
        .partially_liquidate(keeper(), &carol, 250_000, InsertHint::NONE)
        .unwrap();

    assert_eq!(record.debt, units(1750));
    assert_close(record.collateral, units(1));
    assert!(record.split.debt_to_offset.is_zero());
    assert!(record.split.debt_to_redistribute.is_zero());
    assert_eq!(record.split.debt_from_caller, units(1750));
    assert_eq!(protocol.token().balance_of(&keeper()), units(250));
    assert_eq!(
        protocol.token().total_supply(),
        supply_before.checked_sub(units(1750)).unwrap()
    );
    // Gas compensation plus the collateral bought with the burned debt
    assert_eq!(protocol.collateral_paid_to(&keeper()), record.collateral);
    assert_eq!(protocol.default_pool().debt(), FixedPoint::ZERO);
    protocol.check_invariants().unwrap();
}

#[test]
fn test_partial_liquidation_without_deposits_keeps_synced_icr() {
    let (mut protocol, carol) = partial_scenario();
    let dave = open(&mut protocol, "dave", units(1), 1800);
    protocol.price_feed_mut().set_price(units(1900));

    // Dave's debt is redistributed, leaving Carol with pending rewards
    protocol.liquidate(keeper(), &dave).unwrap();
    assert!(protocol.has_pending_rewards(&carol).unwrap());
    let icr_before = protocol.current_icr(&carol).unwrap();
    assert!(icr_before < protocol.params().mcr);

    protocol.transfer(account("bob"), keeper(), units(3000)).unwrap();
    let reward_per_stake = protocol.redistribution().reward_per_stake_debt();
    let record = protocol
        .partially_liquidate(keeper(), &carol, 250_000, InsertHint::NONE)
        .unwrap();

    assert_eq!(record.icr, icr_before);
    assert!(protocol.current_icr(&carol).unwrap() >= icr_before);
    assert!(!protocol.has_pending_rewards(&carol).unwrap());
    assert_eq!(protocol.redistribution().reward_per_stake_debt(), reward_per_stake);
    protocol.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// REDISTRIBUTION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_redistribution_without_deposits() {
    let (mut protocol, alice, bob, carol) = three_positions();
    protocol.price_feed_mut().set_price(units(1900));

    let record = protocol.liquidate(keeper(), &carol).unwrap();
    assert!(record.split.debt_to_offset.is_zero());
    assert_eq!(record.split.debt_to_redistribute, units(1800));
    assert_eq!(protocol.default_pool().debt(), units(1800));

    // Stakes are 3 and 10
    let pending = protocol.pending_rewards(&alice).unwrap();
    assert_close(pending.debt, units(1800).mul_div(units(3), units(13)).unwrap());
    let bob_pending = protocol.pending_rewards(&bob).unwrap();
    assert_close(bob_pending.debt, units(1800).mul_div(units(10), units(13)).unwrap());
    protocol.check_invariants().unwrap();
}

#[test]
fn test_pending_rewards_apply_once() {
    let (mut protocol, alice, _, carol) = three_positions();
    protocol.price_feed_mut().set_price(units(1900));
    protocol.liquidate(keeper(), &carol).unwrap();

    let entire = protocol.entire_debt_and_coll(&alice).unwrap();
    assert!(protocol.has_pending_rewards(&alice).unwrap());

    let first = protocol.apply_pending_rewards(&alice).unwrap();
    assert!(!first.is_zero());
    assert!(!protocol.has_pending_rewards(&alice).unwrap());

    let second = protocol.apply_pending_rewards(&alice).unwrap();
    assert!(second.is_zero());

    let position = protocol.position(&alice).unwrap();
    assert_eq!(position.debt, entire.debt);
    assert_eq!(position.collateral, entire.collateral);
    protocol.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECOVERY MODE TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Drop the price into Recovery Mode and let the grace period run out
fn enter_recovery(protocol: &mut Protocol<FixedPriceFeed>, price: u64) {
    protocol.price_feed_mut().set_price(units(price));
    protocol.sync_grace_period().unwrap();
    assert!(protocol.is_recovery_mode().unwrap());
    let grace = protocol.params().recovery_grace_period;
    protocol.advance_time(grace);
}

/// Carol 2/2000, Bob 2.4/2000 and a 14/10000 whale holding a 5000 deposit
fn recovery_scenario() -> (Protocol<FixedPriceFeed>, PositionId, PositionId, PositionId) {
    let mut protocol = protocol_at(2000);
    let whale = open(&mut protocol, "whale", units(14), 10_000);
    let bob = open(&mut protocol, "bob", tenths(24), 2000);
    let carol = open(&mut protocol, "carol", units(2), 2000);
    protocol.provide_to_sp(account("whale"), units(5000), None).unwrap();
    (protocol, whale, bob, carol)
}

#[test]
fn test_sequential_liquidation_in_recovery() {
    let (mut protocol, whale, bob, carol) = recovery_scenario();
    assert_eq!(
        protocol
            .liquidate_sequentially_in_recovery(keeper(), 10)
            .unwrap_err(),
        Error::NotInRecoveryMode
    );

    // TCR 18.4 * 1000 / 14000 = 131%; Carol 100%, Bob 120%, whale 140%
    enter_recovery(&mut protocol, 1000);

    let outcome = protocol.liquidate_sequentially_in_recovery(keeper(), 10).unwrap();
    let liquidated: Vec<_> = outcome.records.iter().map(|r| r.position_id).collect();
    assert_eq!(liquidated, vec![carol, bob]);
    assert!(outcome.records.iter().all(|r| r.mode == LiquidationMode::Recovery));
    assert_eq!(outcome.totals.count, 2);
    assert_eq!(outcome.totals.debt_offset, units(4000));

    // Bob's collateral above 110% of his debt is kept for him
    assert_eq!(outcome.records[1].surplus, tenths(2));
    assert_eq!(protocol.surplus_of(&account("bob")), tenths(2));
    assert!(protocol.position(&whale).unwrap().is_active());

    assert_eq!(protocol.claim_collateral(account("bob")).unwrap(), tenths(2));
    assert_eq!(protocol.collateral_paid_to(&account("bob")), tenths(2));
    assert_eq!(
        protocol.claim_collateral(account("bob")).unwrap_err(),
        Error::NoCollateralGain
    );
    protocol.check_invariants().unwrap();
}

#[test]
fn test_batch_skips_ineligible_positions() {
    let (mut protocol, whale, _, carol) = recovery_scenario();
    enter_recovery(&mut protocol, 1000);

    let unknown = PositionId::generate(&account("nobody"), 0);
    let outcome = protocol
        .liquidate_in_batch_recovery(keeper(), &[unknown, whale, carol])
        .unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].position_id, carol);
    assert_eq!(
        protocol
            .liquidate_in_batch_recovery(keeper(), &[whale])
            .unwrap_err(),
        Error::NothingToLiquidate
    );
    protocol.check_invariants().unwrap();
}

#[test]
fn test_recovery_requires_full_offset() {
    let mut protocol = protocol_at(2000);
    open(&mut protocol, "whale", units(14), 10_000);
    let bob = open(&mut protocol, "bob", tenths(24), 2000);
    open(&mut protocol, "carol", units(2), 2000);
    protocol.provide_to_sp(account("whale"), units(1000), None).unwrap();

    enter_recovery(&mut protocol, 1000);
    assert_eq!(
        protocol.liquidate(keeper(), &bob).unwrap_err(),
        Error::InsufficientStabilityPool {
            required: units(2000),
            available: units(1000),
        }
    );

    // The caller's own tokens cover what the pool cannot
    protocol.transfer(account("carol"), keeper(), units(1000)).unwrap();
    let record = protocol.liquidate(keeper(), &bob).unwrap();
    assert_eq!(record.mode, LiquidationMode::Recovery);
    assert_eq!(record.split.debt_to_offset, units(1000));
    assert_eq!(record.split.debt_from_caller, units(1000));
    assert!(record.split.debt_to_redistribute.is_zero());
    assert_eq!(protocol.default_pool().debt(), FixedPoint::ZERO);
    assert_eq!(protocol.token().balance_of(&keeper()), FixedPoint::ZERO);

    // Capped at 2.2; 0.011 gas, the rest split evenly with the pool
    assert_eq!(record.surplus, tenths(2));
    assert_eq!(record.split.collateral_to_caller, "1.0945".parse::<FixedPoint>().unwrap());
    assert_eq!(
        protocol.collateral_paid_to(&keeper()),
        "1.1055".parse::<FixedPoint>().unwrap()
    );
    protocol.check_invariants().unwrap();
}

#[test]
fn test_recovery_grace_period_delays_liquidation_above_mcr() {
    let (mut protocol, _, bob, carol) = recovery_scenario();
    protocol.set_time(1_000);
    protocol.price_feed_mut().set_price(units(1000));

    // The failed attempt still starts the clock
    assert_eq!(
        protocol.liquidate(keeper(), &bob).unwrap_err(),
        Error::RecoveryGracePeriodActive { remaining: 900 }
    );
    assert_eq!(protocol.grace_period().started_at(), Some(1_000));
    assert!(protocol.position(&bob).unwrap().is_active());

    // Positions below MCR are not held back, and the batch stops at Bob
    let outcome = protocol.liquidate_sequentially_in_recovery(keeper(), 10).unwrap();
    let liquidated: Vec<_> = outcome.records.iter().map(|r| r.position_id).collect();
    assert_eq!(liquidated, vec![carol]);
    assert!(protocol.is_recovery_mode().unwrap());

    protocol.advance_time(899);
    assert_eq!(
        protocol.liquidate(keeper(), &bob).unwrap_err(),
        Error::RecoveryGracePeriodActive { remaining: 1 }
    );

    protocol.advance_time(1);
    let record = protocol.liquidate(keeper(), &bob).unwrap();
    assert_eq!(record.mode, LiquidationMode::Recovery);
    assert_eq!(record.split.debt_to_offset, units(2000));
    protocol.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRONT END AND ISSUANCE TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_issuance_with_front_end_kickback() {
    let issuance = FixedRateIssuance::new(units(100), units(1_000_000));
    let mut protocol = Protocol::with_components(
        ProtocolParams::default(),
        FixedPriceFeed::new(units(2000)),
        SortedPositions::new(),
        DebtTokenLedger::default(),
        issuance,
    )
    .unwrap();
    protocol
        .open_position(account("alice"), units(3), units(2000), InsertHint::NONE)
        .unwrap();
    protocol
        .open_position(account("bob"), units(3), units(2000), InsertHint::NONE)
        .unwrap();

    let front_end = account("front-end");
    protocol
        .register_front_end(front_end, FixedPoint::from_percentage(60))
        .unwrap();
    protocol
        .provide_to_sp(account("alice"), units(1000), Some(front_end))
        .unwrap();
    // 100 accrues to Alice alone, then 100 shared equally
    protocol.provide_to_sp(account("bob"), units(1000), None).unwrap();
    protocol.claim_sp_gains(account("alice")).unwrap();

    assert_close(protocol.issuance().balance_of(&account("alice")), units(90));
    assert_close(protocol.issuance().balance_of(&front_end), units(60));
    assert_close(
        protocol.depositor_issuance_gain(&account("bob")).unwrap(),
        units(50),
    );
    assert_eq!(
        protocol.compounded_front_end_stake(&front_end).unwrap(),
        units(1000)
    );
    assert!(matches!(
        protocol.provide_to_sp(front_end, units(1), None),
        Err(Error::AlreadyFrontEnd(_)) | Err(Error::InsufficientBalance { .. })
    ));
}

#[test]
fn test_collateral_gain_moves_to_position() {
    let (mut protocol, alice, _, carol) = three_positions();
    protocol.provide_to_sp(account("alice"), units(2000), None).unwrap();
    protocol.price_feed_mut().set_price(units(1900));
    protocol.liquidate(keeper(), &carol).unwrap();

    let gain = protocol
        .depositor_collateral_gain(&account("alice"))
        .unwrap();
    let payout = protocol
        .withdraw_collateral_gain_to_position(account("alice"), &alice, InsertHint::NONE)
        .unwrap();

    assert_eq!(payout.collateral_gain, gain);
    assert_eq!(
        protocol.position(&alice).unwrap().collateral,
        units(3).checked_add(gain).unwrap()
    );
    assert_eq!(
        protocol.collateral_paid_to(&account("alice")),
        FixedPoint::ZERO
    );
    assert_eq!(
        protocol
            .withdraw_collateral_gain_to_position(account("alice"), &alice, InsertHint::NONE)
            .unwrap_err(),
        Error::NoCollateralGain
    );
    protocol.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATOMICITY TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ledger that refuses every burn
#[derive(Debug, Clone, Default)]
struct BurnRejectingToken {
    inner: DebtTokenLedger,
}

impl DebtToken for BurnRejectingToken {
    fn total_supply(&self) -> FixedPoint {
        self.inner.total_supply()
    }

    fn balance_of(&self, account: &AccountId) -> FixedPoint {
        self.inner.balance_of(account)
    }

    fn mint(&mut self, to: &AccountId, amount: FixedPoint) -> Result<()> {
        self.inner.mint(to, amount)
    }

    fn burn_from(&mut self, _from: &AccountId, _amount: FixedPoint) -> Result<()> {
        Err(Error::Internal("burn rejected".into()))
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: FixedPoint) -> Result<()> {
        self.inner.transfer(from, to, amount)
    }
}

#[test]
fn test_failed_burn_reverts_liquidation() {
    let mut protocol = Protocol::with_components(
        ProtocolParams::default(),
        FixedPriceFeed::new(units(2000)),
        SortedPositions::new(),
        BurnRejectingToken::default(),
        FixedRateIssuance::disabled(),
    )
    .unwrap();
    for (owner, coll, debt) in [("alice", 3, 2000), ("bob", 10, 5000), ("carol", 1, 1800)] {
        protocol
            .open_position(account(owner), units(coll), units(debt), InsertHint::NONE)
            .unwrap();
    }
    let carol = protocol.registry().last().unwrap();
    protocol.provide_to_sp(account("alice"), units(2000), None).unwrap();

    let events_before = protocol.events().len();
    let pool_hash_before = protocol.stability_pool().state_hash().unwrap();
    let active_before = protocol.active_pool().clone();

    protocol.price_feed_mut().set_price(units(1900));
    assert_eq!(
        protocol.liquidate(keeper(), &carol).unwrap_err(),
        Error::Internal("burn rejected".into())
    );

    assert!(protocol.position(&carol).unwrap().is_active());
    assert!(protocol.registry().contains(&carol));
    assert_eq!(protocol.events().len(), events_before);
    assert_eq!(protocol.stability_pool().state_hash().unwrap(), pool_hash_before);
    assert_eq!(protocol.active_pool(), &active_before);
    assert_eq!(protocol.collateral_paid_to(&keeper()), FixedPoint::ZERO);
    assert_eq!(protocol.stats().full_liquidations, 0);
    assert_eq!(
        protocol.token().balance_of(&stability_pool_account()),
        units(2000)
    );
    protocol.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTY TESTS
// ═══════════════════════════════════════════════════════════════════════════════

fn position_strategy() -> impl Strategy<Value = (u64, u64, u64)> {
    // collateral, debt, percentage of debt deposited
    (2u64..10, 1800u64..3000, 0u64..100)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_liquidations_conserve_value(
        positions in prop::collection::vec(position_strategy(), 3..7),
        price in 900u64..2000,
        batch in 1usize..6,
    ) {
        let mut protocol = protocol_at(2000);
        for (i, (coll, debt, deposit_pct)) in positions.iter().enumerate() {
            let owner = account(&format!("owner-{}", i));
            // Opens rejected in Recovery Mode simply leave no trace
            if protocol
                .open_position(owner, units(*coll), units(*debt), InsertHint::NONE)
                .is_err()
            {
                continue;
            }
            let deposit = units(*debt).mul_div(units(*deposit_pct), units(100)).unwrap();
            if !deposit.is_zero() {
                protocol.provide_to_sp(owner, deposit, None).unwrap();
            }
        }
        prop_assert!(protocol.check_invariants().is_ok());

        let pool = protocol.stability_pool();
        let (epoch, scale, p) = (pool.current_epoch(), pool.current_scale(), pool.p());
        let s = pool.sum_at(epoch, scale);

        protocol.price_feed_mut().set_price(units(price));
        let result = protocol.liquidate_sequentially(keeper(), batch);
        prop_assert!(matches!(result, Ok(_) | Err(Error::NothingToLiquidate)));
        prop_assert!(protocol.check_invariants().is_ok());

        let pool = protocol.stability_pool();
        prop_assert!(
            pool.current_epoch() > epoch || pool.current_scale() > scale || pool.p() <= p
        );
        prop_assert!(pool.sum_at(epoch, scale) >= s);
    }

    #[test]
    fn prop_compounded_deposits_never_rise(
        positions in prop::collection::vec(position_strategy(), 3..7),
        prices in prop::collection::vec(900u64..2000, 1..4),
    ) {
        let mut protocol = protocol_at(2000);
        let mut depositors = Vec::new();
        for (i, (coll, debt, deposit_pct)) in positions.iter().enumerate() {
            let owner = account(&format!("owner-{}", i));
            if protocol
                .open_position(owner, units(*coll), units(*debt), InsertHint::NONE)
                .is_err()
            {
                continue;
            }
            let deposit = units(*debt).mul_div(units(*deposit_pct), units(100)).unwrap();
            if !deposit.is_zero() {
                protocol.provide_to_sp(owner, deposit, None).unwrap();
                depositors.push(owner);
            }
        }

        let mut previous: Vec<FixedPoint> = depositors
            .iter()
            .map(|d| protocol.compounded_deposit(d).unwrap())
            .collect();
        let mut prices = prices;
        prices.sort_unstable_by(|a, b| b.cmp(a));

        for price in prices {
            protocol.price_feed_mut().set_price(units(price));
            let result = protocol.liquidate_sequentially(keeper(), 1);
            prop_assert!(matches!(result, Ok(_) | Err(Error::NothingToLiquidate)));
            let offset = result.map_or(false, |o| !o.totals.debt_offset.is_zero());

            for (depositor, before) in depositors.iter().zip(previous.iter_mut()) {
                let after = protocol.compounded_deposit(depositor).unwrap();
                prop_assert!(after <= *before);
                if offset && !before.is_zero() {
                    prop_assert!(after < *before);
                }
                *before = after;
            }
            prop_assert!(protocol.check_invariants().is_ok());
        }
    }

    #[test]
    fn prop_pending_rewards_are_idempotent(
        positions in prop::collection::vec(position_strategy(), 3..6),
    ) {
        let mut protocol = protocol_at(2000);
        let mut ids = Vec::new();
        for (i, (coll, debt, _)) in positions.iter().enumerate() {
            let owner = account(&format!("owner-{}", i));
            if let Ok(id) = protocol.open_position(owner, units(*coll), units(*debt), InsertHint::NONE) {
                ids.push(id);
            }
        }

        protocol.price_feed_mut().set_price(units(900));
        let _ = protocol.liquidate_sequentially(keeper(), 1);

        let active: Vec<PositionId> = ids
            .into_iter()
            .filter(|id| protocol.position(id).unwrap().is_active())
            .collect();
        for id in &active {
            let entire = protocol.entire_debt_and_coll(id).unwrap();
            protocol.apply_pending_rewards(id).unwrap();
            prop_assert!(protocol.apply_pending_rewards(id).unwrap().is_zero());
            let position = protocol.position(id).unwrap();
            prop_assert_eq!(position.debt, entire.debt);
            prop_assert_eq!(position.collateral, entire.collateral);
        }
        prop_assert!(protocol.check_invariants().is_ok());
    }
}
