//! Coordinator integration tests over the crossbeam mock network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::clock::RequestKey;
use super::coordinator::MutexCoordinator;
use super::errors::MutexError;
use super::message::MutexMessage;
use super::network::{MessageChannel, MockNetwork, NetworkEndpoint};
use super::state::{Dispatch, MutexState};

fn coordinators(size: u32) -> Vec<MutexCoordinator<NetworkEndpoint>> {
    MockNetwork::new(size)
        .into_endpoints()
        .into_iter()
        .map(|ep| MutexCoordinator::with_cluster_size(ep, size))
        .collect()
}

/// Test: test_dispatcher_driven_handlers
///
/// An idle process driven only through the inbound handlers:
/// 1. REQUEST(1, 0) arrives -> REPLY goes straight back to P0
/// 2. The clock merged the remote timestamp
#[test]
fn test_dispatcher_driven_handlers() {
    let mut nodes = coordinators(3);
    let mut p2 = nodes.pop().unwrap();
    let p0 = nodes.remove(0);

    let dispatch = p2.on_receive_request(1, 0).unwrap();
    assert!(matches!(dispatch, Dispatch::Replied(_)));
    assert_eq!(p2.core().clock(), 2);

    let (from, msg) = p0.channel().poll_next().unwrap().unwrap();
    assert_eq!(from, 2);
    assert_eq!(msg, MutexMessage::Reply { sender: 2 });
}

/// Test: test_request_cs_returns_after_replies
///
/// P1 and P2 answer P0's request from their own threads; P0's request_cs
/// only returns once both REPLYs are in.
#[test]
fn test_request_cs_returns_after_replies() {
    let mut nodes = coordinators(3);
    let mut p2 = nodes.pop().unwrap();
    let mut p1 = nodes.pop().unwrap();
    let mut p0 = nodes.pop().unwrap();

    let h1 = thread::spawn(move || {
        let (from, msg) = p1.channel().recv().unwrap();
        p1.dispatch(from, msg).unwrap();
        p1
    });
    let h2 = thread::spawn(move || {
        let (from, msg) = p2.channel().recv().unwrap();
        p2.dispatch(from, msg).unwrap();
        p2
    });

    let key = p0.request_cs().unwrap();
    assert_eq!(key, RequestKey::new(1, 0));
    assert_eq!(p0.core().state(), MutexState::Held);

    h1.join().unwrap();
    h2.join().unwrap();

    assert_eq!(p0.release_cs().unwrap(), 0);
    assert_eq!(p0.core().state(), MutexState::Idle);
}

/// Test: test_waiting_process_services_requests
///
/// P0 holds the CS. P1 blocks in request_cs; while it waits it still has to
/// answer P2's REQUEST, otherwise P2 could never be granted either.
#[test]
fn test_waiting_process_services_requests() {
    let mut nodes = coordinators(3);
    let mut p2 = nodes.pop().unwrap();
    let mut p1 = nodes.pop().unwrap();
    let mut p0 = nodes.pop().unwrap();

    // P0 acquires first (P1 and P2 idle, answer from helper threads).
    let helper1 = thread::spawn(move || {
        let (from, msg) = p1.channel().recv().unwrap();
        p1.dispatch(from, msg).unwrap();
        p1
    });
    let helper2 = thread::spawn(move || {
        let (from, msg) = p2.channel().recv().unwrap();
        p2.dispatch(from, msg).unwrap();
        p2
    });
    p0.request_cs().unwrap();
    let mut p1 = helper1.join().unwrap();
    let mut p2 = helper2.join().unwrap();

    // P1 and P2 both queue behind P0 with equal timestamps; P1 wins on id.
    let waiter = thread::spawn(move || {
        let key = p1.request_cs().unwrap();
        p1.release_cs().unwrap();
        (p1, key)
    });
    let late = thread::spawn(move || {
        let key = p2.request_cs().unwrap();
        p2.release_cs().unwrap();
        (p2, key)
    });

    // P0 answers both requests only through deferral, then releases.
    while p0.core().deferred().len() < 2 {
        let (from, msg) = p0.channel().recv().unwrap();
        assert_eq!(p0.dispatch(from, msg).unwrap(), Dispatch::Deferred);
    }
    assert_eq!(p0.release_cs().unwrap(), 2);

    let (_, key1) = waiter.join().unwrap();
    let (_, key2) = late.join().unwrap();
    assert_eq!(key1, RequestKey::new(3, 1));
    assert_eq!(key2, RequestKey::new(3, 2));
}

/// Test: test_cluster_mutual_exclusion
///
/// Four processes, three attempts each, all running the full
/// think / request / hold / release / DONE cycle on their own threads.
/// A shared occupancy counter must never exceed one.
#[test]
fn test_cluster_mutual_exclusion() {
    let size = 4;
    let attempts = 3;
    let occupancy = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = coordinators(size)
        .into_iter()
        .map(|mut node| {
            let occupancy = occupancy.clone();
            let max_seen = max_seen.clone();
            let entries = entries.clone();
            thread::spawn(move || -> Result<(), MutexError> {
                for _ in 0..attempts {
                    node.service_for(Duration::from_millis(2))?;
                    let key = node.request_cs()?;

                    let inside = occupancy.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(inside, Ordering::SeqCst);
                    entries.lock().unwrap().push(key);
                    node.service_for(Duration::from_millis(1))?;
                    occupancy.fetch_sub(1, Ordering::SeqCst);

                    node.release_cs()?;
                }
                node.finish()?;
                assert!(node.core().deferred().is_empty());
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    let entries = entries.lock().unwrap();
    assert_eq!(entries.len(), (size * attempts) as usize);
    // Grants follow the total order of request keys.
    assert!(entries.windows(2).all(|w| w[0].precedes(&w[1])));
}

/// Test: test_release_without_hold_is_fatal
#[test]
fn test_release_without_hold_is_fatal() {
    let mut nodes = coordinators(2);
    let err = nodes[0].release_cs().unwrap_err();
    assert!(matches!(err, MutexError::ReleaseWithoutHold { process: 0, .. }));
}

/// Test: test_finish_while_holding_is_fatal
#[test]
fn test_finish_while_holding_is_fatal() {
    let ep = MockNetwork::new(1).into_endpoints().pop().unwrap();
    let mut solo = MutexCoordinator::with_cluster_size(ep, 1);

    solo.request_cs().unwrap();
    let err = solo.finish().unwrap_err();
    assert!(matches!(
        err,
        MutexError::FinishWhileBusy { process: 0, state: MutexState::Held }
    ));
    assert!(err.to_string().contains("announced DONE"));
}

/// Test: test_malformed_frame_is_fatal_to_waiter
///
/// A corrupt frame arriving while a process waits for REPLYs aborts the wait.
#[test]
fn test_malformed_frame_is_fatal_to_waiter() {
    let mut network = MockNetwork::new(2);
    let ep0 = network.create_endpoint(0).unwrap();
    let ep1 = network.create_endpoint(1).unwrap();

    ep1.send_frame(0, vec![0xff; 5]).unwrap();

    let mut p0 = MutexCoordinator::with_cluster_size(ep0, 2);
    let err = p0.request_cs().unwrap_err();
    assert!(matches!(err, MutexError::Malformed { len: 5, .. }));
}
