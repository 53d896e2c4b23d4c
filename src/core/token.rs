//! Debt-token ledger.
//!
//! The engine consumes the debt token through the [`DebtToken`] trait:
//! liquidations burn the offset portion from the stability pool account,
//! deposits and withdrawals move tokens between depositors and the pool.
//! [`DebtTokenLedger`] is the in-memory implementation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::ids::AccountId;
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// DEBT TOKEN INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fungible debt-token ledger
pub trait DebtToken {
    /// Total tokens in circulation
    fn total_supply(&self) -> FixedPoint;

    /// Balance of `account`
    fn balance_of(&self, account: &AccountId) -> FixedPoint;

    /// Create `amount` tokens for `to`
    fn mint(&mut self, to: &AccountId, amount: FixedPoint) -> Result<()>;

    /// Destroy `amount` tokens held by `from`
    ///
    /// Fails with [`Error::InsufficientBalance`] if `from` holds less.
    fn burn_from(&mut self, from: &AccountId, amount: FixedPoint) -> Result<()>;

    /// Move `amount` tokens from `from` to `to`
    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: FixedPoint) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory debt-token ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtTokenLedger {
    /// Token symbol
    pub symbol: String,
    total_supply: FixedPoint,
    balances: BTreeMap<AccountId, FixedPoint>,
}

impl Default for DebtTokenLedger {
    fn default() -> Self {
        Self::new("USD")
    }
}

impl DebtTokenLedger {
    /// Create an empty ledger
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            total_supply: FixedPoint::ZERO,
            balances: BTreeMap::new(),
        }
    }

    /// Get number of token holders
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    fn debit(&mut self, from: &AccountId, amount: FixedPoint) -> Result<()> {
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(Error::InsufficientBalance {
                account: from.to_hex(),
                required: amount,
                available: balance,
            });
        }

        let remaining = balance.checked_sub(amount)?;
        if remaining.is_zero() {
            self.balances.remove(from);
        } else {
            self.balances.insert(*from, remaining);
        }
        Ok(())
    }

    fn credit(&mut self, to: &AccountId, amount: FixedPoint) -> Result<()> {
        let balance = self.balance_of(to).checked_add(amount)?;
        self.balances.insert(*to, balance);
        Ok(())
    }
}

impl DebtToken for DebtTokenLedger {
    fn total_supply(&self) -> FixedPoint {
        self.total_supply
    }

    fn balance_of(&self, account: &AccountId) -> FixedPoint {
        self.balances.get(account).copied().unwrap_or(FixedPoint::ZERO)
    }

    fn mint(&mut self, to: &AccountId, amount: FixedPoint) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        let new_supply = self.total_supply.checked_add(amount)?;
        self.credit(to, amount)?;
        self.total_supply = new_supply;
        Ok(())
    }

    fn burn_from(&mut self, from: &AccountId, amount: FixedPoint) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        self.debit(from, amount)?;
        self.total_supply = self.total_supply.checked_sub(amount)?;
        Ok(())
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: FixedPoint) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        if from == to {
            return Ok(());
        }
        self.debit(from, amount)?;
        self.credit(to, amount)
    }
}
