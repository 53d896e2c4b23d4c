//! Protocol events for state change notifications.
//!
//! Events are emitted for every significant state change so clients can
//! follow liquidations and pool accounting without diffing state. The log
//! lives inside the transactional state: a reverted call leaves no events.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::liquidation::engine::{BatchTotals, LiquidationRecord};
use crate::liquidation::stability_pool::DepositorPayout;
use crate::utils::ids::{AccountId, PositionId};
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // Position Events
    /// Position was opened
    PositionOpened(PositionOpenedEvent),
    /// Pending redistribution rewards were folded into a position
    PendingRewardsApplied {
        /// Position
        position_id: PositionId,
        /// Collateral added
        collateral: FixedPoint,
        /// Debt added
        debt: FixedPoint,
    },

    // Liquidation Events
    /// Position was fully or partially liquidated
    Liquidation(LiquidationRecord),
    /// Batch liquidation completed
    BatchLiquidated(BatchTotals),
    /// Recovery Mode was first observed and its grace period began
    RecoveryGracePeriodStarted {
        /// Clock time the period began at
        timestamp: u64,
    },
    /// Normal Mode was observed again and the grace period was cleared
    RecoveryGracePeriodEnded {
        /// Clock time the period was cleared at
        timestamp: u64,
    },
    /// Surplus collateral was claimed by its owner
    SurplusClaimed {
        /// Owner
        owner: AccountId,
        /// Amount claimed
        amount: FixedPoint,
    },

    // Redistribution Events
    /// Reward-per-stake accumulators changed
    RewardTermsUpdated {
        /// Collateral reward per unit staked
        collateral: FixedPoint,
        /// Debt reward per unit staked
        debt: FixedPoint,
    },
    /// Stake snapshots were captured
    SystemSnapshotsUpdated {
        /// Total stakes
        total_stakes: FixedPoint,
        /// Active plus default collateral
        total_collateral: FixedPoint,
    },

    // Stability Pool Events
    /// Product P changed
    ProductUpdated {
        /// New P
        p: U256,
    },
    /// Collateral sum S changed
    SumUpdated {
        /// Epoch
        epoch: u64,
        /// Scale
        scale: u64,
        /// Increment applied
        increment: U256,
    },
    /// Issuance sum G changed
    IssuanceSumUpdated {
        /// Epoch
        epoch: u64,
        /// Scale
        scale: u64,
        /// New G
        g: U256,
    },
    /// Pool was drained and a new epoch began
    EpochUpdated {
        /// New epoch
        epoch: u64,
    },
    /// Scale changed
    ScaleUpdated {
        /// New scale
        scale: u64,
    },
    /// A depositor's deposit changed
    DepositUpdated {
        /// Depositor
        depositor: AccountId,
        /// Amounts paid and the new deposit
        payout: DepositorPayout,
    },
    /// Front end registered
    FrontEndRegistered {
        /// Front end
        front_end: AccountId,
        /// Kickback rate
        kickback_rate: FixedPoint,
    },
}

impl ProtocolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PositionOpened(_) => "PositionOpened",
            Self::PendingRewardsApplied { .. } => "PendingRewardsApplied",
            Self::Liquidation(_) => "Liquidation",
            Self::BatchLiquidated(_) => "BatchLiquidated",
            Self::RecoveryGracePeriodStarted { .. } => "RecoveryGracePeriodStarted",
            Self::RecoveryGracePeriodEnded { .. } => "RecoveryGracePeriodEnded",
            Self::SurplusClaimed { .. } => "SurplusClaimed",
            Self::RewardTermsUpdated { .. } => "RewardTermsUpdated",
            Self::SystemSnapshotsUpdated { .. } => "SystemSnapshotsUpdated",
            Self::ProductUpdated { .. } => "ProductUpdated",
            Self::SumUpdated { .. } => "SumUpdated",
            Self::IssuanceSumUpdated { .. } => "IssuanceSumUpdated",
            Self::EpochUpdated { .. } => "EpochUpdated",
            Self::ScaleUpdated { .. } => "ScaleUpdated",
            Self::DepositUpdated { .. } => "DepositUpdated",
            Self::FrontEndRegistered { .. } => "FrontEndRegistered",
        }
    }

    /// Compute event hash
    pub fn hash(&self) -> Result<[u8; 32]> {
        let data = bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))?;
        let digest = Sha256::digest(&data);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        Ok(hash)
    }
}

/// Event emitted when a position is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    /// Position identifier
    pub position_id: PositionId,
    /// Owner
    pub owner: AccountId,
    /// Initial collateral
    pub collateral: FixedPoint,
    /// Initial debt
    pub debt: FixedPoint,
    /// Initial stake
    pub stake: FixedPoint,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded collection of events, oldest dropped first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    events: VecDeque<ProtocolEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventLog {
    /// Create an empty log keeping at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Add an event to the log
    pub fn push(&mut self, event: ProtocolEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Iterate over retained events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &ProtocolEvent> {
        self.events.iter()
    }

    /// Most recent event
    pub fn last(&self) -> Option<&ProtocolEvent> {
        self.events.back()
    }

    /// Get events of a specific type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&ProtocolEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Liquidation records, oldest first
    pub fn liquidations(&self) -> impl Iterator<Item = &LiquidationRecord> {
        self.events.iter().filter_map(|e| match e {
            ProtocolEvent::Liquidation(record) => Some(record),
            _ => None,
        })
    }

    /// Get the number of retained events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events dropped to stay within capacity
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Remove and return all retained events
    pub fn drain(&mut self) -> Vec<ProtocolEvent> {
        self.events.drain(..).collect()
    }

    /// SHA-256 over the hashes of all retained events
    pub fn digest(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        for event in &self.events {
            hasher.update(event.hash()?);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        Ok(hash)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
