//! Deferred replies.
//!
//! A peer is in the set while it is owed a REPLY that this process withheld
//! because its own request had priority. The set is flushed exactly once, on
//! release.

use std::collections::BTreeSet;

use super::clock::ProcessId;

/// Set of peers owed a REPLY once the local CS use ends.
///
/// Backed by an ordered set so a flush always emits replies in rank order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferralSet {
    owed: BTreeSet<ProcessId>,
}

impl DeferralSet {
    pub fn new() -> Self {
        DeferralSet {
            owed: BTreeSet::new(),
        }
    }

    /// Record that `peer` is owed a REPLY.
    ///
    /// Returns false if it was already owed one. A peer has at most one
    /// outstanding request, so this would mean a duplicated REQUEST.
    pub fn defer(&mut self, peer: ProcessId) -> bool {
        self.owed.insert(peer)
    }

    pub fn contains(&self, peer: ProcessId) -> bool {
        self.owed.contains(&peer)
    }

    pub fn len(&self) -> usize {
        self.owed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owed.is_empty()
    }

    /// Take every owed peer, leaving the set empty.
    pub fn drain(&mut self) -> Vec<ProcessId> {
        std::mem::take(&mut self.owed).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_in_rank_order() {
        let mut set = DeferralSet::new();
        assert!(set.defer(4));
        assert!(set.defer(1));
        assert!(set.defer(3));

        assert_eq!(set.drain(), vec![1, 3, 4]);
        assert!(set.is_empty());
        assert!(set.drain().is_empty());
    }

    #[test]
    fn test_defer_twice_reports_duplicate() {
        let mut set = DeferralSet::new();
        assert!(set.defer(2));
        assert!(!set.defer(2));
        assert_eq!(set.len(), 1);
        assert!(set.contains(2));
    }
}
