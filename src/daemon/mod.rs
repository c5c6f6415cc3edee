//! Daemon Core - tick loop and crash recovery
//!
//! The daemon is the long-running process that:
//! - Recovers unfinished submissions from the durable store
//! - Keeps the evaluation worker running
//! - Picks up submissions persisted by other processes

pub mod recovery;
pub mod tick;

pub use recovery::*;
pub use tick::*;
