//! Protocol module - transactional orchestration of the engine.
//!
//! [`Protocol`] ties positions, pools and the debt token together and runs
//! every operation atomically. [`SharedProtocol`] wraps it for use across
//! threads; [`EventLog`] records what each operation changed.

pub mod events;
pub mod shared;
pub mod system;

pub use events::*;
pub use shared::*;
pub use system::*;
