//! Risk-ordered position registry.
//!
//! Positions are ordered by nominal ICR (collateral / debt, independent of
//! price), which ranks them the same way ICR does at any single price. The
//! *first* position is the safest, the *last* the riskiest; batch
//! liquidation walks from the last entry towards the first.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::ids::PositionId;

/// Neighbour hints for an insertion
///
/// Hints let a registry with a linear search, such as a linked list, start
/// near the insertion point. They never change where a position ends up,
/// and [`SortedPositions`] ignores them since its ordered set finds the
/// insertion point in logarithmic time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertHint {
    /// Expected safer neighbour
    pub prev: Option<PositionId>,
    /// Expected riskier neighbour
    pub next: Option<PositionId>,
}

impl InsertHint {
    /// No hint
    pub const NONE: Self = Self { prev: None, next: None };
}

/// Registry of active positions sorted by risk
pub trait PositionRegistry {
    /// Insert `id` with nominal ICR `nicr`
    fn insert(&mut self, id: PositionId, nicr: U256, hint: InsertHint) -> Result<()>;

    /// Remove `id`
    fn remove(&mut self, id: &PositionId) -> Result<()>;

    /// Move `id` to the place matching its new nominal ICR
    fn reinsert(&mut self, id: PositionId, nicr: U256, hint: InsertHint) -> Result<()> {
        self.remove(&id)?;
        self.insert(id, nicr, hint)
    }

    /// Check whether `id` is registered
    fn contains(&self, id: &PositionId) -> bool;

    /// Number of registered positions
    fn len(&self) -> usize;

    /// Check whether the registry is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Safest position
    fn first(&self) -> Option<PositionId>;

    /// Riskiest position
    fn last(&self) -> Option<PositionId>;

    /// Next riskier position after `id`
    fn next(&self, id: &PositionId) -> Option<PositionId>;

    /// Next safer position before `id`
    fn prev(&self, id: &PositionId) -> Option<PositionId>;
}

/// Registry backed by an ordered set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortedPositions {
    order: BTreeSet<(U256, PositionId)>,
    keys: BTreeMap<PositionId, U256>,
}

impl SortedPositions {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Nominal ICR recorded for `id`
    pub fn nominal_icr(&self, id: &PositionId) -> Option<U256> {
        self.keys.get(id).copied()
    }

    /// Ids from riskiest to safest
    pub fn riskiest_first(&self) -> impl Iterator<Item = PositionId> + '_ {
        self.order.iter().map(|(_, id)| *id)
    }
}

impl PositionRegistry for SortedPositions {
    fn insert(&mut self, id: PositionId, nicr: U256, _hint: InsertHint) -> Result<()> {
        if self.keys.contains_key(&id) {
            return Err(Error::InvariantViolation(format!(
                "position {} already in registry",
                id
            )));
        }
        if nicr.is_zero() {
            return Err(Error::InvalidParameter {
                name: "nicr".into(),
                reason: "nominal ICR must be positive".into(),
            });
        }
        self.order.insert((nicr, id));
        self.keys.insert(id, nicr);
        Ok(())
    }

    fn remove(&mut self, id: &PositionId) -> Result<()> {
        let nicr = self.keys.remove(id).ok_or_else(|| {
            Error::InvariantViolation(format!("position {} not in registry", id))
        })?;
        self.order.remove(&(nicr, *id));
        Ok(())
    }

    fn contains(&self, id: &PositionId) -> bool {
        self.keys.contains_key(id)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn first(&self) -> Option<PositionId> {
        self.order.iter().next_back().map(|(_, id)| *id)
    }

    fn last(&self) -> Option<PositionId> {
        self.order.iter().next().map(|(_, id)| *id)
    }

    fn next(&self, id: &PositionId) -> Option<PositionId> {
        let nicr = *self.keys.get(id)?;
        self.order
            .range(..(nicr, *id))
            .next_back()
            .map(|(_, id)| *id)
    }

    fn prev(&self, id: &PositionId) -> Option<PositionId> {
        let nicr = *self.keys.get(id)?;
        self.order
            .range((Excluded((nicr, *id)), Unbounded))
            .next()
            .map(|(_, id)| *id)
    }
}
