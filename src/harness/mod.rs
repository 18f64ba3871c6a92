//! Test harness for the mutual-exclusion protocol.
//!
//! Two ways to drive a cluster:
//! - **Threaded**: one OS thread per process over a crossbeam network,
//!   optionally with injected latency (`runner`, `network`)
//! - **Simulated**: sans-IO cores under a seeded discrete-event scheduler
//!   (`sim`)
//!
//! Both record a [`History`] that the [`Checker`] verifies for mutual
//! exclusion, grant order, liveness and clock monotonicity.

pub mod checker;
pub mod errors;
pub mod network;
pub mod runner;
pub mod sim;

#[cfg(test)]
mod tests;

pub use checker::{CheckResult, Checker, Event, History, SharedHistory, Violation, ViolationKind};
pub use errors::HarnessError;
pub use network::{LatencyEndpoint, LatencyNetwork};
pub use runner::{run_cluster, ClusterManager, ClusterOutcome, ProcessReport};
pub use sim::{simulate, Action, SimOutcome, World};
