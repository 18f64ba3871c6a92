//! Ricart-Agrawala Distributed Mutual Exclusion.
//!
//! This module implements permission-based mutual exclusion where:
//! - A process wanting the CS stamps a Lamport timestamp and broadcasts REQUEST
//! - Every peer answers with REPLY, immediately or after its own CS use
//! - The requester enters the CS once all N-1 peers have replied
//!
//! # Invariants
//!
//! 1. **Monotonic Clock**: A process's Lamport clock never decreases.
//! 2. **Safety**: At most one process is Held at any instant.
//! 3. **Deferral Rule**: A REPLY is deferred iff the local state is Wanted or
//!    Held and the local `(timestamp, id)` key is strictly smaller.
//! 4. **Grant Trigger**: The pending reply count reaches zero only while
//!    Wanted, and that is the only way to become Held.

pub mod clock;
pub mod coordinator;
pub mod deferral;
pub mod errors;
pub mod message;
pub mod network;
pub mod replies;
pub mod state;

#[cfg(test)]
mod tests;

pub use clock::{LogicalClock, ProcessId, RequestKey};
pub use coordinator::MutexCoordinator;
pub use deferral::DeferralSet;
pub use errors::MutexError;
pub use message::MutexMessage;
pub use network::{MessageChannel, MockNetwork, NetworkEndpoint};
pub use state::{CoreStats, Dispatch, MutexCore, MutexState, Outbound};
