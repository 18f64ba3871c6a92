//! Wire messages of the mutual-exclusion protocol and their fixed-size codec.

use serde::{Deserialize, Serialize};

use super::clock::{ProcessId, RequestKey};
use super::errors::MutexError;

/// Encoded size of a REQUEST frame (tag + timestamp + sender).
pub const REQUEST_FRAME_LEN: usize = 16;

/// Encoded size of a REPLY or DONE frame (tag + sender).
pub const SHORT_FRAME_LEN: usize = 8;

/// Mutual-exclusion protocol messages.
///
/// Encoded with bincode: a `u32` variant tag followed by fixed-width
/// integer fields, so every variant has a fixed frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutexMessage {
    /// Permission request broadcast when entering WANTED.
    Request {
        /// Lamport timestamp of the request.
        timestamp: u64,
        /// Requesting process.
        sender: ProcessId,
    },

    /// Permission grant, sent immediately or when a deferral is flushed.
    Reply {
        /// Granting process.
        sender: ProcessId,
    },

    /// Sender has finished all of its CS attempts.
    ///
    /// A process stops its event loop only after it has seen DONE from
    /// every peer, so no REQUEST can be left unanswered.
    Done {
        /// Finished process.
        sender: ProcessId,
    },
}

impl MutexMessage {
    /// Build the REQUEST for a request key.
    pub fn request(key: RequestKey) -> Self {
        MutexMessage::Request {
            timestamp: key.timestamp,
            sender: key.process,
        }
    }

    /// Process that produced this message.
    pub fn sender(&self) -> ProcessId {
        match self {
            MutexMessage::Request { sender, .. } => *sender,
            MutexMessage::Reply { sender } => *sender,
            MutexMessage::Done { sender } => *sender,
        }
    }

    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MutexMessage::Request { .. } => "REQUEST",
            MutexMessage::Reply { .. } => "REPLY",
            MutexMessage::Done { .. } => "DONE",
        }
    }

    /// Frame size this message encodes to.
    pub fn frame_len(&self) -> usize {
        match self {
            MutexMessage::Request { .. } => REQUEST_FRAME_LEN,
            MutexMessage::Reply { .. } | MutexMessage::Done { .. } => SHORT_FRAME_LEN,
        }
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Result<Vec<u8>, MutexError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a wire frame.
    ///
    /// Rejects unknown tags, truncated frames and frames with trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, MutexError> {
        let msg: MutexMessage = bincode::deserialize(bytes).map_err(|e| MutexError::Malformed {
            len: bytes.len(),
            reason: e.to_string(),
        })?;

        if bytes.len() != msg.frame_len() {
            return Err(MutexError::Malformed {
                len: bytes.len(),
                reason: format!("{} frame must be {} bytes", msg.kind(), msg.frame_len()),
            });
        }

        Ok(msg)
    }
}
