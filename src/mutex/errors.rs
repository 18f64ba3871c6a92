use thiserror::Error;

use super::clock::ProcessId;
use super::state::MutexState;

/// Fatal conditions for a participating process.
///
/// Every variant means either the caller broke the request/release contract
/// or the channel broke its reliable-delivery contract. None of them are
/// retried; the process is expected to halt.
#[derive(Debug, Error)]
pub enum MutexError {
    /// `request_cs` called while an attempt is already in flight.
    #[error("FATAL: process {process} requested the CS while {state:?}")]
    RequestWhileBusy { process: ProcessId, state: MutexState },

    /// `finish` called with a request still in flight or the CS held.
    #[error("FATAL: process {process} announced DONE while {state:?}")]
    FinishWhileBusy { process: ProcessId, state: MutexState },

    /// `release_cs` called without holding the CS.
    #[error("FATAL: process {process} released the CS while {state:?}")]
    ReleaseWithoutHold { process: ProcessId, state: MutexState },

    /// REPLY arrived when no request is outstanding.
    #[error("FATAL: process {process} got REPLY from {from} while {state:?}")]
    UnexpectedReply {
        process: ProcessId,
        from: ProcessId,
        state: MutexState,
    },

    /// Second REPLY from the same peer within one attempt.
    #[error("FATAL: process {process} got a duplicate REPLY from {from}")]
    DuplicateReply { process: ProcessId, from: ProcessId },

    /// Second REQUEST from a peer that is already owed a deferred REPLY.
    #[error("FATAL: process {process} got a duplicate REQUEST from {from}")]
    DuplicateRequest { process: ProcessId, from: ProcessId },

    /// More REPLYs than peers.
    #[error("FATAL: process {process} got {received} REPLYs, expected at most {expected}")]
    ExcessReply {
        process: ProcessId,
        received: usize,
        expected: usize,
    },

    /// Message from a process outside the membership (or from ourselves).
    #[error("FATAL: process {process} got a message from unknown process {from}")]
    UnknownPeer { process: ProcessId, from: ProcessId },

    /// The Lamport clock cannot advance past `u64::MAX`.
    #[error("FATAL: process {process} clock exhausted")]
    ClockOverflow { process: ProcessId },

    /// Frame with the wrong size or an unknown tag.
    #[error("FATAL: malformed frame of {len} bytes: {reason}")]
    Malformed { len: usize, reason: String },

    /// The inbox was disconnected.
    #[error("channel closed for process {process}")]
    ChannelClosed { process: ProcessId },

    /// No outbound route to the destination.
    #[error("no route from process {from} to process {to}")]
    NoRoute { from: ProcessId, to: ProcessId },
}

impl From<bincode::Error> for MutexError {
    fn from(e: bincode::Error) -> Self {
        MutexError::Malformed {
            len: 0,
            reason: e.to_string(),
        }
    }
}
