//! Ricart-Agrawala state machine, free of I/O.
//!
//! Every handler returns the messages it wants sent as [`Outbound`] values;
//! the caller owns delivery. The same core is driven by the threaded
//! [`MutexCoordinator`](super::coordinator::MutexCoordinator) and by the
//! deterministic simulator.
//!
//! ```text
//!   ┌──────┐ begin_request ┌────────┐ last REPLY ┌──────┐
//!   │ Idle │──────────────>│ Wanted │───────────>│ Held │
//!   └──────┘               └────────┘            └──────┘
//!       ^                                            │
//!       └──────────────── release (flush) ───────────┘
//! ```

use std::collections::BTreeSet;

use tracing::debug;

use super::clock::{LogicalClock, ProcessId, RequestKey};
use super::deferral::DeferralSet;
use super::errors::MutexError;
use super::message::MutexMessage;
use super::replies::{ReplyOutcome, ReplyTracker};

/// Local CS state of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    /// Not interested in the CS.
    Idle,
    /// Request broadcast, waiting for replies.
    Wanted,
    /// Inside the CS.
    Held,
}

/// A message the core wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbound {
    pub to: ProcessId,
    pub msg: MutexMessage,
}

/// What an inbound message did to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// REQUEST answered on the spot.
    Replied(Outbound),
    /// REQUEST deferred until release.
    Deferred,
    /// REPLY counted; more are needed.
    Counted { remaining: usize },
    /// REPLY was the last one; the CS is now held.
    Granted,
    /// Peer announced it has finished.
    PeerDone,
}

impl Dispatch {
    /// Messages this dispatch needs sent.
    pub fn outbound(&self) -> Option<Outbound> {
        match self {
            Dispatch::Replied(out) => Some(*out),
            _ => None,
        }
    }
}

/// Counters for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreStats {
    pub requests_sent: u64,
    pub replies_sent: u64,
    pub replies_deferred: u64,
    pub grants: u64,
}

/// Per-process mutual-exclusion state.
#[derive(Debug, Clone)]
pub struct MutexCore {
    /// This process.
    id: ProcessId,
    /// Every other member, in rank order.
    peers: Vec<ProcessId>,
    clock: LogicalClock,
    state: MutexState,
    /// Key of the outstanding request; `Some` exactly while Wanted or Held.
    request: Option<RequestKey>,
    replies: ReplyTracker,
    deferred: DeferralSet,
    /// Peers that announced DONE.
    finished_peers: BTreeSet<ProcessId>,
    stats: CoreStats,
}

impl MutexCore {
    /// Create the core for `id` in a cluster whose members are `members`.
    ///
    /// `members` may or may not include `id`; duplicates are ignored.
    pub fn new(id: ProcessId, members: impl IntoIterator<Item = ProcessId>) -> Self {
        let peers: BTreeSet<ProcessId> = members.into_iter().filter(|&p| p != id).collect();

        MutexCore {
            id,
            peers: peers.into_iter().collect(),
            clock: LogicalClock::new(),
            state: MutexState::Idle,
            request: None,
            replies: ReplyTracker::new(),
            deferred: DeferralSet::new(),
            finished_peers: BTreeSet::new(),
            stats: CoreStats::default(),
        }
    }

    /// Create the core for `id` in a cluster of ranks `0..size`.
    pub fn with_cluster_size(id: ProcessId, size: u32) -> Self {
        Self::new(id, 0..size)
    }

    // =========================================================================
    // LOCAL OPERATIONS
    // =========================================================================

    /// Start a CS attempt: stamp a key, arm the reply count, broadcast REQUEST.
    ///
    /// With no peers the CS is granted immediately.
    pub fn begin_request(&mut self) -> Result<(RequestKey, Vec<Outbound>), MutexError> {
        if self.state != MutexState::Idle {
            return Err(MutexError::RequestWhileBusy {
                process: self.id,
                state: self.state,
            });
        }

        let key = RequestKey::new(self.tick()?, self.id);
        self.request = Some(key);
        self.replies.arm(self.peers.len());
        self.state = MutexState::Wanted;

        debug!(process = self.id, key = %key, peers = self.peers.len(), "requesting CS");

        let request = MutexMessage::request(key);
        let out: Vec<Outbound> = self
            .peers
            .iter()
            .map(|&to| Outbound { to, msg: request })
            .collect();
        self.stats.requests_sent += out.len() as u64;

        if self.replies.pending() == 0 {
            self.grant();
        }

        Ok((key, out))
    }

    /// Leave the CS and flush every deferred REPLY.
    pub fn release(&mut self) -> Result<Vec<Outbound>, MutexError> {
        if self.state != MutexState::Held {
            return Err(MutexError::ReleaseWithoutHold {
                process: self.id,
                state: self.state,
            });
        }

        self.state = MutexState::Idle;
        self.request = None;
        self.replies.reset();

        let reply = MutexMessage::Reply { sender: self.id };
        let out: Vec<Outbound> = self
            .deferred
            .drain()
            .into_iter()
            .map(|to| Outbound { to, msg: reply })
            .collect();
        self.stats.replies_sent += out.len() as u64;

        debug!(process = self.id, flushed = out.len(), "released CS");
        Ok(out)
    }

    /// Announce that this process will make no further requests.
    pub fn finish(&self) -> Vec<Outbound> {
        let done = MutexMessage::Done { sender: self.id };
        self.peers
            .iter()
            .map(|&to| Outbound { to, msg: done })
            .collect()
    }

    // =========================================================================
    // INBOUND MESSAGES
    // =========================================================================

    /// Dispatch a message received from `from`.
    pub fn handle(&mut self, from: ProcessId, msg: MutexMessage) -> Result<Dispatch, MutexError> {
        if msg.sender() != from {
            return Err(MutexError::Malformed {
                len: msg.frame_len(),
                reason: format!(
                    "{} from process {} claims sender {}",
                    msg.kind(),
                    from,
                    msg.sender()
                ),
            });
        }

        match msg {
            MutexMessage::Request { timestamp, sender } => self.on_request(timestamp, sender),
            MutexMessage::Reply { sender } => self.on_reply(sender),
            MutexMessage::Done { sender } => self.on_done(sender),
        }
    }

    /// Answer a peer's REQUEST now, or defer it if our own request has priority.
    pub fn on_request(&mut self, timestamp: u64, sender: ProcessId) -> Result<Dispatch, MutexError> {
        self.check_peer(sender)?;
        self.clock
            .merge(timestamp)
            .ok_or(MutexError::ClockOverflow { process: self.id })?;

        let theirs = RequestKey::new(timestamp, sender);
        let ours_first = match (self.state, self.request) {
            (MutexState::Wanted | MutexState::Held, Some(ours)) => ours.precedes(&theirs),
            _ => false,
        };

        if ours_first {
            if !self.deferred.defer(sender) {
                return Err(MutexError::DuplicateRequest {
                    process: self.id,
                    from: sender,
                });
            }
            self.stats.replies_deferred += 1;
            debug!(
                process = self.id,
                from = sender,
                theirs = %theirs,
                state = ?self.state,
                "deferred REPLY"
            );
            return Ok(Dispatch::Deferred);
        }

        self.stats.replies_sent += 1;
        debug!(process = self.id, to = sender, theirs = %theirs, "sent immediate REPLY");
        Ok(Dispatch::Replied(Outbound {
            to: sender,
            msg: MutexMessage::Reply { sender: self.id },
        }))
    }

    /// Count a REPLY; the last one moves Wanted to Held.
    pub fn on_reply(&mut self, sender: ProcessId) -> Result<Dispatch, MutexError> {
        self.check_peer(sender)?;
        // REPLY carries no timestamp; its receipt is still a clock event.
        self.tick()?;

        if self.state != MutexState::Wanted {
            return Err(MutexError::UnexpectedReply {
                process: self.id,
                from: sender,
                state: self.state,
            });
        }

        match self.replies.record(sender) {
            ReplyOutcome::Pending { remaining } => {
                debug!(process = self.id, from = sender, remaining, "got REPLY");
                Ok(Dispatch::Counted { remaining })
            }
            ReplyOutcome::Complete => {
                self.grant();
                Ok(Dispatch::Granted)
            }
            ReplyOutcome::Duplicate => Err(MutexError::DuplicateReply {
                process: self.id,
                from: sender,
            }),
            ReplyOutcome::Excess => Err(MutexError::ExcessReply {
                process: self.id,
                received: self.replies.received() + 1,
                expected: self.replies.expected(),
            }),
        }
    }

    /// Record that a peer has finished all of its attempts.
    pub fn on_done(&mut self, sender: ProcessId) -> Result<Dispatch, MutexError> {
        self.check_peer(sender)?;
        self.tick()?;
        self.finished_peers.insert(sender);
        debug!(process = self.id, from = sender, "peer finished");
        Ok(Dispatch::PeerDone)
    }

    fn tick(&mut self) -> Result<u64, MutexError> {
        self.clock
            .tick()
            .ok_or(MutexError::ClockOverflow { process: self.id })
    }

    fn grant(&mut self) {
        self.state = MutexState::Held;
        self.stats.grants += 1;
        debug!(process = self.id, key = ?self.request, "granted CS");
    }

    fn check_peer(&self, from: ProcessId) -> Result<(), MutexError> {
        if self.peers.binary_search(&from).is_ok() {
            Ok(())
        } else {
            Err(MutexError::UnknownPeer {
                process: self.id,
                from,
            })
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn peers(&self) -> &[ProcessId] {
        &self.peers
    }

    pub fn state(&self) -> MutexState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state == MutexState::Held
    }

    pub fn clock(&self) -> u64 {
        self.clock.now()
    }

    /// Key of the outstanding request, if any.
    pub fn request_key(&self) -> Option<RequestKey> {
        self.request
    }

    /// Replies still required before the CS is granted.
    pub fn pending_replies(&self) -> usize {
        match self.state {
            MutexState::Wanted => self.replies.pending(),
            _ => 0,
        }
    }

    pub fn deferred(&self) -> &DeferralSet {
        &self.deferred
    }

    /// True once every peer has announced DONE.
    pub fn all_peers_finished(&self) -> bool {
        self.finished_peers.len() == self.peers.len()
    }

    pub fn stats(&self) -> CoreStats {
        self.stats
    }
}
