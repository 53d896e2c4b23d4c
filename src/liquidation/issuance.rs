//! Community issuance for stability pool depositors.
//!
//! Each state-changing pool call asks the issuance source how many reward
//! tokens accrued since the last call and feeds the amount into `G`.
//! Depositors and front ends are later paid out of what was issued.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::ids::AccountId;
use crate::utils::math::FixedPoint;

/// Source of issuance rewards
pub trait CommunityIssuance {
    /// Issue the reward accrued since the previous call
    fn issue(&mut self) -> Result<FixedPoint>;

    /// Pay `amount` of already issued reward to `to`
    fn send(&mut self, to: &AccountId, amount: FixedPoint) -> Result<()>;

    /// Reward paid to `account` so far
    fn balance_of(&self, account: &AccountId) -> FixedPoint;
}

/// Issues a fixed amount per call until a supply cap is reached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedRateIssuance {
    per_call: FixedPoint,
    supply_cap: FixedPoint,
    total_issued: FixedPoint,
    total_sent: FixedPoint,
    balances: BTreeMap<AccountId, FixedPoint>,
}

impl FixedRateIssuance {
    /// Create a source issuing `per_call` up to `supply_cap`
    pub fn new(per_call: FixedPoint, supply_cap: FixedPoint) -> Self {
        Self {
            per_call,
            supply_cap,
            total_issued: FixedPoint::ZERO,
            total_sent: FixedPoint::ZERO,
            balances: BTreeMap::new(),
        }
    }

    /// A source that never issues anything
    pub fn disabled() -> Self {
        Self::new(FixedPoint::ZERO, FixedPoint::ZERO)
    }

    /// Total issued so far
    pub fn total_issued(&self) -> FixedPoint {
        self.total_issued
    }

    /// Total paid out so far
    pub fn total_sent(&self) -> FixedPoint {
        self.total_sent
    }

    /// Remaining supply
    pub fn remaining(&self) -> FixedPoint {
        self.supply_cap.saturating_sub(self.total_issued)
    }
}

impl CommunityIssuance for FixedRateIssuance {
    fn issue(&mut self) -> Result<FixedPoint> {
        let amount = self.per_call.min(self.remaining());
        self.total_issued = self.total_issued.checked_add(amount)?;
        if !amount.is_zero() {
            tracing::trace!(%amount, total = %self.total_issued, "issuance accrued");
        }
        Ok(amount)
    }

    fn send(&mut self, to: &AccountId, amount: FixedPoint) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let unsent = self.total_issued.saturating_sub(self.total_sent);
        if amount > unsent {
            return Err(Error::InsufficientBalance {
                account: "community-issuance".into(),
                required: amount,
                available: unsent,
            });
        }
        self.total_sent = self.total_sent.checked_add(amount)?;
        let balance = self.balances.entry(*to).or_default();
        *balance = balance.checked_add(amount)?;
        Ok(())
    }

    fn balance_of(&self, account: &AccountId) -> FixedPoint {
        self.balances.get(account).copied().unwrap_or_default()
    }
}
