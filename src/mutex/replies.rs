//! Reply Tracker for a single CS attempt.
//!
//! Tracks which peers have granted permission for the outstanding request
//! and reports when every peer has answered.

use std::collections::BTreeSet;

use super::clock::ProcessId;

/// Outcome of recording one REPLY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Counted; `remaining` replies are still required.
    Pending { remaining: usize },
    /// This was the last required reply.
    Complete,
    /// Peer already replied for this attempt.
    Duplicate,
    /// Every required reply was already counted.
    Excess,
}

/// Counts REPLYs for the current attempt.
///
/// Unlike a majority quorum, a CS request needs a grant from every peer,
/// so the target is N-1. Replies are counted per distinct peer so a
/// duplicated delivery is caught instead of granting early.
#[derive(Debug, Clone, Default)]
pub struct ReplyTracker {
    /// Replies needed for this attempt.
    expected: usize,
    /// Peers that replied for this attempt.
    granted: BTreeSet<ProcessId>,
}

impl ReplyTracker {
    pub fn new() -> Self {
        ReplyTracker {
            expected: 0,
            granted: BTreeSet::new(),
        }
    }

    /// Start a fresh attempt needing `expected` replies.
    pub fn arm(&mut self, expected: usize) {
        self.expected = expected;
        self.granted.clear();
    }

    /// Forget the current attempt.
    pub fn reset(&mut self) {
        self.expected = 0;
        self.granted.clear();
    }

    /// Record a REPLY from `peer`.
    #[inline]
    pub fn record(&mut self, peer: ProcessId) -> ReplyOutcome {
        if self.granted.len() >= self.expected {
            return ReplyOutcome::Excess;
        }
        if !self.granted.insert(peer) {
            return ReplyOutcome::Duplicate;
        }

        match self.pending() {
            0 => ReplyOutcome::Complete,
            remaining => ReplyOutcome::Pending { remaining },
        }
    }

    /// Replies still required (PendingReplyCount).
    #[inline]
    pub fn pending(&self) -> usize {
        self.expected.saturating_sub(self.granted.len())
    }

    /// Replies counted so far.
    pub fn received(&self) -> usize {
        self.granted.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn has_replied(&self, peer: ProcessId) -> bool {
        self.granted.contains(&peer)
    }
}
