//! Core modules for the CDP engine.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and protocol parameters
//! - Positions and the risk-ordered registry
//! - Debt-token ledger
//! - Collateral and debt fund pools

pub mod config;
pub mod pools;
pub mod position;
pub mod sorted;
pub mod token;

pub use config::*;
pub use pools::*;
pub use position::*;
pub use sorted::*;
pub use token::*;
