//! Error types for the CDP engine.
//!
//! Every public operation returns [`Result`]. Errors fall into four
//! kinds (see [`ErrorKind`]): validation failures are rejected before any
//! state is touched, solvency failures abort the whole transaction,
//! invariant violations mean the accounting model has been broken, and
//! internal errors cover locking and serialization.

use thiserror::Error;

use crate::utils::math::FixedPoint;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected precondition, nothing was mutated
    Validation,
    /// Operation aborted atomically because the system cannot honour it
    Solvency,
    /// Accounting model violated; unreachable under correct sequencing
    Invariant,
    /// Locking, serialization and other plumbing failures
    Internal,
}

/// Main error type for the engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Position Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Position not found
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    /// Position exists but is not active
    #[error("Position is not active: {0}")]
    PositionNotActive(String),

    /// Debt below the minimum net debt
    #[error("Debt amount {amount} below minimum {minimum}")]
    DebtBelowMinimum {
        /// Requested debt
        amount: FixedPoint,
        /// Minimum net debt
        minimum: FixedPoint,
    },

    /// Collateral ratio below the required minimum
    #[error("Collateral ratio {icr} below required {minimum}")]
    CollateralRatioBelowMinimum {
        /// Ratio of the position
        icr: FixedPoint,
        /// Required ratio
        minimum: FixedPoint,
    },

    /// Caller has no active position
    #[error("No active position owned by {0}")]
    NoActivePosition(String),

    // ═══════════════════════════════════════════════════════════════════
    // Liquidation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// ICR at or above the liquidation threshold
    #[error("ICR {icr} is not below liquidation threshold {threshold}")]
    IcrAboveThreshold {
        /// Position ICR
        icr: FixedPoint,
        /// Threshold in effect (MCR or TCR)
        threshold: FixedPoint,
    },

    /// The last active position can never be liquidated
    #[error("Cannot liquidate the last active position")]
    LastPositionCannotBeLiquidated,

    /// A batch liquidation liquidated nothing
    #[error("Nothing to liquidate")]
    NothingToLiquidate,

    /// Recovery-only operation outside recovery mode
    #[error("System is not in recovery mode")]
    NotInRecoveryMode,

    /// Stability pool and caller funds cannot cover a recovery-mode liquidation
    #[error("Insufficient stability pool and caller funds: required {required}, available {available}")]
    InsufficientStabilityPool {
        /// Required amount
        required: FixedPoint,
        /// Pool deposits plus the caller's debt-token balance
        available: FixedPoint,
    },

    /// Recovery Mode has not lasted long enough to liquidate above MCR
    #[error("Recovery Mode grace period has {remaining}s left")]
    RecoveryGracePeriodActive {
        /// Seconds until the grace period ends, or the full period if it never started
        remaining: u64,
    },

    /// Partial liquidation ratio outside [0, 1_000_000]
    #[error("Partial liquidation ratio {0} out of range")]
    InvalidPartialRatio(u32),

    /// Partial liquidation would leave less than the minimum net debt
    #[error("Partial liquidation leaves debt {remaining} below minimum {minimum}")]
    PartialLiquidationBelowMinDebt {
        /// Debt left on the position
        remaining: FixedPoint,
        /// Minimum net debt
        minimum: FixedPoint,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Stability Pool Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Caller is a registered front end
    #[error("Account {0} is a registered front end")]
    AlreadyFrontEnd(String),

    /// Tag does not reference a registered front end
    #[error("Unknown front end: {0}")]
    UnknownFrontEnd(String),

    /// Front end registration with an open deposit
    #[error("Account {0} has a stability pool deposit")]
    FrontEndHasDeposit(String),

    /// Kickback rate outside [0, 1]
    #[error("Kickback rate {0} outside [0, 1]")]
    InvalidKickbackRate(FixedPoint),

    /// Caller has no deposit
    #[error("No stability pool deposit for {0}")]
    NoDeposit(String),

    /// Nothing to claim
    #[error("No collateral gain to withdraw")]
    NoCollateralGain,

    /// Withdrawal blocked while a position is below MCR
    #[error("Cannot withdraw while there are undercollateralized positions")]
    UndercollateralizedPositions,

    // ═══════════════════════════════════════════════════════════════════
    // Token Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Debt-token balance too low
    #[error("Insufficient balance for {account}: required {required}, available {available}")]
    InsufficientBalance {
        /// Account debited
        account: String,
        /// Required amount
        required: FixedPoint,
        /// Available amount
        available: FixedPoint,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Oracle Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Oracle returned an unusable price
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    // ═══════════════════════════════════════════════════════════════════
    // Arithmetic Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    /// Division by zero
    #[error("Division by zero in {operation}")]
    DivisionByZero {
        /// Operation that divided
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Protocol Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    // ═══════════════════════════════════════════════════════════════════
    // Serialization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Lock acquisition failed
    #[error("Failed to acquire lock")]
    Lock,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ZeroAmount
            | Error::AlreadyFrontEnd(_)
            | Error::UnknownFrontEnd(_)
            | Error::FrontEndHasDeposit(_)
            | Error::InvalidKickbackRate(_)
            | Error::InvalidPartialRatio(_)
            | Error::PartialLiquidationBelowMinDebt { .. }
            | Error::DebtBelowMinimum { .. }
            | Error::CollateralRatioBelowMinimum { .. }
            | Error::PositionNotFound(_)
            | Error::PositionNotActive(_)
            | Error::NoActivePosition(_)
            | Error::NoDeposit(_)
            | Error::NoCollateralGain
            | Error::NotInRecoveryMode
            | Error::InvalidParameter { .. }
            | Error::InvalidPrice(_)
            | Error::Config(_) => ErrorKind::Validation,

            Error::IcrAboveThreshold { .. }
            | Error::LastPositionCannotBeLiquidated
            | Error::NothingToLiquidate
            | Error::InsufficientStabilityPool { .. }
            | Error::RecoveryGracePeriodActive { .. }
            | Error::UndercollateralizedPositions
            | Error::InsufficientBalance { .. } => ErrorKind::Solvency,

            Error::InvariantViolation(_)
            | Error::Overflow { .. }
            | Error::Underflow { .. }
            | Error::DivisionByZero { .. } => ErrorKind::Invariant,

            Error::Serialization(_)
            | Error::Deserialization(_)
            | Error::Internal(_)
            | Error::Lock => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller may fix the precondition and resubmit
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Solvency)
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(self.kind(), ErrorKind::Invariant) || matches!(self, Error::Internal(_))
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Position errors: 1xxx
            Error::PositionNotFound(_) => 1001,
            Error::PositionNotActive(_) => 1002,
            Error::DebtBelowMinimum { .. } => 1003,
            Error::CollateralRatioBelowMinimum { .. } => 1004,
            Error::NoActivePosition(_) => 1005,

            // Liquidation errors: 2xxx
            Error::IcrAboveThreshold { .. } => 2001,
            Error::LastPositionCannotBeLiquidated => 2002,
            Error::NothingToLiquidate => 2003,
            Error::NotInRecoveryMode => 2004,
            Error::InsufficientStabilityPool { .. } => 2005,
            Error::InvalidPartialRatio(_) => 2006,
            Error::PartialLiquidationBelowMinDebt { .. } => 2007,
            Error::RecoveryGracePeriodActive { .. } => 2008,

            // Stability pool errors: 3xxx
            Error::ZeroAmount => 3001,
            Error::AlreadyFrontEnd(_) => 3002,
            Error::UnknownFrontEnd(_) => 3003,
            Error::FrontEndHasDeposit(_) => 3004,
            Error::InvalidKickbackRate(_) => 3005,
            Error::NoDeposit(_) => 3006,
            Error::NoCollateralGain => 3007,
            Error::UndercollateralizedPositions => 3008,

            // Token errors: 4xxx
            Error::InsufficientBalance { .. } => 4001,

            // Oracle errors: 5xxx
            Error::InvalidPrice(_) => 5001,

            // Arithmetic errors: 6xxx
            Error::Overflow { .. } => 6001,
            Error::Underflow { .. } => 6002,
            Error::DivisionByZero { .. } => 6003,

            // Protocol errors: 7xxx
            Error::InvariantViolation(_) => 7001,
            Error::InvalidParameter { .. } => 7002,
            Error::Config(_) => 7003,

            // Serialization errors: 8xxx
            Error::Serialization(_) => 8001,
            Error::Deserialization(_) => 8002,

            // Internal errors: 9xxx
            Error::Internal(_) => 9001,
            Error::Lock => 9002,
        }
    }
}
