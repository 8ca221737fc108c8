//! Shared types for the funding reconciliation and bridge orchestration core.
//!
//! Every other crate in the workspace speaks in these types: token amounts,
//! wallets and chains, balance snapshots, requirement maps, bridge requests
//! and their statuses, display step descriptors and the events published on
//! the event bus.

pub mod amounts;
pub mod balances;
pub mod bridge;
pub mod cancel;
pub mod chains;
pub mod events;
pub mod requirements;
pub mod session;
pub mod steps;
pub mod targets;
pub mod validation;
pub mod wallet;

pub use amounts::*;
pub use balances::*;
pub use bridge::*;
pub use cancel::*;
pub use chains::*;
pub use events::*;
pub use requirements::*;
pub use session::*;
pub use steps::*;
pub use targets::*;
pub use validation::*;
pub use wallet::*;

pub use alloy_primitives::Address;
