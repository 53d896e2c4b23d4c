//! Utility modules for the CDP engine.
//!
//! This module contains shared utilities used across the engine:
//! - Constants
//! - Fixed-point arithmetic
//! - Account and position identifiers
//! - Validation helpers
//! - Logging setup

pub mod constants;
pub mod ids;
pub mod logging;
pub mod math;
pub mod validation;

pub use constants::*;
pub use ids::*;
pub use logging::*;
pub use math::*;
pub use validation::*;
