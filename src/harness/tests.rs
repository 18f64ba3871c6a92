//! Harness Integration Tests.
//!
//! Scripted traces and seeded simulations over the sans-IO cores, plus
//! threaded cluster runs over both networks.

use std::time::Duration;

use proptest::prelude::*;

use crate::config::{ClusterConfig, SimConfig};
use crate::mutex::{Dispatch, MutexMessage, MutexState, RequestKey};

use super::checker::Checker;
use super::errors::HarnessError;
use super::runner::run_cluster;
use super::sim::{simulate, World};

/// Test: test_three_process_scenario
///
/// 1. P0 and P1 request with keys (1,0) and (1,1)
/// 2. P0 defers P1, P1 replies to P0, P2 replies to both
/// 3. P0 enters first
/// 4. P1 enters only after P0's release flushes the deferred REPLY
#[test]
fn test_three_process_scenario() {
    let mut world = World::new(3, 0);

    assert_eq!(world.request(0).unwrap(), RequestKey::new(1, 0));
    assert_eq!(world.request(1).unwrap(), RequestKey::new(1, 1));

    assert_eq!(world.deliver(1, 0).unwrap(), Some(Dispatch::Deferred));
    assert!(matches!(world.deliver(0, 1).unwrap(), Some(Dispatch::Replied(_))));
    assert!(matches!(world.deliver(0, 2).unwrap(), Some(Dispatch::Replied(_))));
    assert!(matches!(world.deliver(1, 2).unwrap(), Some(Dispatch::Replied(_))));

    assert_eq!(world.deliver(1, 0).unwrap(), Some(Dispatch::Counted { remaining: 1 }));
    assert_eq!(world.deliver(2, 0).unwrap(), Some(Dispatch::Granted));
    assert_eq!(world.holders(), vec![0]);

    // P1 has P2's permission but not P0's.
    assert_eq!(world.deliver(2, 1).unwrap(), Some(Dispatch::Counted { remaining: 1 }));
    assert_eq!(world.core(1).state(), MutexState::Wanted);
    assert!(world.in_flight(0, 1).is_empty());

    assert_eq!(world.release(0).unwrap(), 1);
    assert_eq!(world.in_flight(0, 1), vec![MutexMessage::Reply { sender: 0 }]);
    assert_eq!(world.deliver(0, 1).unwrap(), Some(Dispatch::Granted));
    assert_eq!(world.holders(), vec![1]);
    world.release(1).unwrap();

    assert_eq!(
        world.history().grant_order(),
        vec![RequestKey::new(1, 0), RequestKey::new(1, 1)]
    );
    let result = Checker::empty().verify(world.history());
    assert!(result.passed, "Violations: {:?}", result.violations);
}

/// Test: test_tie_break_ignores_arrival_order
///
/// Equal timestamps: P0 wins whether P0 or P1 is the first to see the
/// other's REQUEST.
#[test]
fn test_tie_break_ignores_arrival_order() {
    // P0 hears P1's request first.
    let mut a = World::new(2, 0);
    a.request(0).unwrap();
    a.request(1).unwrap();
    assert_eq!(a.deliver(1, 0).unwrap(), Some(Dispatch::Deferred));
    a.deliver(0, 1).unwrap();
    assert_eq!(a.deliver(1, 0).unwrap(), Some(Dispatch::Granted));

    // P1 hears P0's request first.
    let mut b = World::new(2, 0);
    b.request(0).unwrap();
    b.request(1).unwrap();
    assert!(matches!(b.deliver(0, 1).unwrap(), Some(Dispatch::Replied(_))));
    assert_eq!(b.deliver(1, 0).unwrap(), Some(Dispatch::Deferred));
    assert_eq!(b.deliver(1, 0).unwrap(), Some(Dispatch::Granted));

    assert_eq!(a.holders(), vec![0]);
    assert_eq!(b.holders(), vec![0]);
    assert_eq!(a.core(1).pending_replies(), 1);
    assert_eq!(b.core(1).pending_replies(), 1);
}

/// Test: test_release_flushes_exactly_the_deferred
///
/// P0 holds; P1 and P2 request and are deferred. Release sends one REPLY to
/// each of them and nothing else.
#[test]
fn test_release_flushes_exactly_the_deferred() {
    let mut world = World::new(4, 0);

    world.request(0).unwrap();
    for peer in 1..4 {
        world.deliver(0, peer).unwrap();
    }
    for peer in 1..4 {
        world.deliver(peer, 0).unwrap();
    }
    assert_eq!(world.holders(), vec![0]);

    world.request(1).unwrap();
    world.request(2).unwrap();
    assert_eq!(world.deliver(1, 0).unwrap(), Some(Dispatch::Deferred));
    assert_eq!(world.deliver(2, 0).unwrap(), Some(Dispatch::Deferred));
    assert_eq!(world.core(0).deferred().len(), 2);

    assert_eq!(world.release(0).unwrap(), 2);
    assert!(world.core(0).deferred().is_empty());
    assert_eq!(world.in_flight(0, 1), vec![MutexMessage::Reply { sender: 0 }]);
    assert_eq!(world.in_flight(0, 2), vec![MutexMessage::Reply { sender: 0 }]);
    assert!(world.in_flight(0, 3).is_empty());
}

/// Test: test_simulation_is_reproducible
#[test]
fn test_simulation_is_reproducible() {
    let config = SimConfig {
        processes: 4,
        attempts: 3,
        seed: 42,
        ..SimConfig::default()
    };

    let first = simulate(&config).unwrap();
    let second = simulate(&config).unwrap();

    assert_eq!(first.steps, second.steps);
    assert_eq!(first.delivered, second.delivered);
    assert_eq!(first.history.grant_order(), second.history.grant_order());
}

/// Test: test_simulation_rejects_single_process
#[test]
fn test_simulation_rejects_single_process() {
    let config = SimConfig {
        processes: 1,
        ..SimConfig::default()
    };
    assert!(matches!(simulate(&config), Err(HarnessError::Config(_))));
}

/// Test: test_simulation_step_budget
#[test]
fn test_simulation_step_budget() {
    let config = SimConfig {
        processes: 3,
        attempts: 2,
        seed: 3,
        max_steps: 5,
    };
    assert!(matches!(
        simulate(&config),
        Err(HarnessError::StepBudgetExhausted { steps: 5 })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any seeded schedule ends with every grant made, no overlap, strictly
    /// increasing grant keys and monotonic clocks.
    #[test]
    fn prop_seeded_runs_pass_checker(
        seed in any::<u64>(),
        processes in 2u32..=6,
        attempts in 1u32..=4,
    ) {
        let config = SimConfig { processes, attempts, seed, max_steps: 100_000 };
        let outcome = simulate(&config).unwrap();

        let result = Checker::new(processes, attempts).verify(&outcome.history);
        prop_assert!(result.passed, "seed {}: {:?}", seed, result.violations);
        prop_assert_eq!(result.stats.entries, processes as u64 * attempts as u64);
        prop_assert_eq!(result.stats.max_concurrent, 1);
    }

    /// Simultaneous requests with equal timestamps are granted in rank
    /// order under every delivery schedule.
    #[test]
    fn prop_simultaneous_requests_granted_in_rank_order(
        seed in any::<u64>(),
        processes in 2u32..=5,
    ) {
        let mut world = World::new(processes, seed);
        for p in 0..processes {
            prop_assert_eq!(world.request(p).unwrap(), RequestKey::new(1, p));
        }
        while world.step().unwrap() {}

        let expected: Vec<RequestKey> = (0..processes).map(|p| RequestKey::new(1, p)).collect();
        prop_assert_eq!(world.history().grant_order(), expected);
        prop_assert!(world.holders().is_empty());
    }
}

/// Test: test_threaded_cluster_over_mock_network
#[test]
fn test_threaded_cluster_over_mock_network() {
    let config = ClusterConfig {
        processes: 3,
        attempts: 3,
        think_time: (Duration::ZERO, Duration::from_millis(2)),
        hold_time: (Duration::from_millis(1), Duration::from_millis(2)),
        latency_range: (Duration::ZERO, Duration::ZERO),
        seed: Some(1),
    };

    let outcome = run_cluster(&config).unwrap();
    assert!(outcome.check.passed, "Violations: {:?}", outcome.check.violations);
    assert_eq!(outcome.total_entries(), config.expected_entries());
    assert_eq!(outcome.reports.len(), 3);
    for report in &outcome.reports {
        assert_eq!(report.stats.grants, 3);
        assert_eq!(report.stats.requests_sent, 3 * 2);
    }
}

/// Test: test_threaded_cluster_with_latency
#[test]
fn test_threaded_cluster_with_latency() {
    let config = ClusterConfig {
        processes: 4,
        attempts: 2,
        think_time: (Duration::ZERO, Duration::from_millis(3)),
        hold_time: (Duration::ZERO, Duration::from_millis(1)),
        latency_range: (Duration::ZERO, Duration::from_millis(2)),
        seed: Some(9),
    };

    let outcome = run_cluster(&config).unwrap();
    assert!(outcome.check.passed, "Violations: {:?}", outcome.check.violations);
    assert_eq!(outcome.check.stats.entries, 8);
    assert_eq!(outcome.check.stats.max_concurrent, 1);
}

/// Test: test_cluster_rejects_invalid_config
#[test]
fn test_cluster_rejects_invalid_config() {
    let config = ClusterConfig {
        attempts: 0,
        ..ClusterConfig::default()
    };
    assert!(matches!(run_cluster(&config), Err(HarnessError::Config(_))));
}
