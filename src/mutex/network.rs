//! Message channel contract and an in-process mock network.
//!
//! Uses crossbeam channels to connect process endpoints. Frames travel
//! encoded and are decoded by the receiving endpoint.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::clock::ProcessId;
use super::errors::MutexError;
use super::message::MutexMessage;

/// An encoded frame tagged with the process that sent it.
pub type Envelope = (ProcessId, Vec<u8>);

/// Transport used by a coordinator.
///
/// Implementations must deliver every frame exactly once and preserve send
/// order per (sender, receiver) pair. Nothing is promised about ordering
/// across different senders.
pub trait MessageChannel {
    /// Identity of the process owning this endpoint.
    fn local_id(&self) -> ProcessId;

    /// Queue `msg` for `to`. Never blocks.
    fn send(&self, to: ProcessId, msg: &MutexMessage) -> Result<(), MutexError>;

    /// Next pending message, if one has already arrived.
    fn poll_next(&self) -> Result<Option<(ProcessId, MutexMessage)>, MutexError>;

    /// Block until a message arrives.
    fn recv(&self) -> Result<(ProcessId, MutexMessage), MutexError>;

    /// Block until a message arrives or `timeout` elapses.
    fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<(ProcessId, MutexMessage)>, MutexError>;
}

/// Decode a received envelope.
pub(crate) fn open_envelope((from, frame): Envelope) -> Result<(ProcessId, MutexMessage), MutexError> {
    Ok((from, MutexMessage::decode(&frame)?))
}

/// A network endpoint for a single process.
pub struct NetworkEndpoint {
    /// This process's ID.
    pub process_id: ProcessId,
    /// Receiver for incoming frames.
    rx: Receiver<Envelope>,
    /// Senders to other processes (keyed by process id).
    tx_map: HashMap<ProcessId, Sender<Envelope>>,
}

impl NetworkEndpoint {
    /// Send an already-encoded frame to a specific process.
    pub fn send_frame(&self, to: ProcessId, frame: Vec<u8>) -> Result<(), MutexError> {
        let tx = self.tx_map.get(&to).ok_or(MutexError::NoRoute {
            from: self.process_id,
            to,
        })?;
        tx.send((self.process_id, frame)).map_err(|_| MutexError::NoRoute {
            from: self.process_id,
            to,
        })
    }

    /// Processes this endpoint can reach.
    pub fn peers(&self) -> Vec<ProcessId> {
        let mut peers: Vec<ProcessId> = self.tx_map.keys().copied().collect();
        peers.sort_unstable();
        peers
    }
}

impl MessageChannel for NetworkEndpoint {
    fn local_id(&self) -> ProcessId {
        self.process_id
    }

    fn send(&self, to: ProcessId, msg: &MutexMessage) -> Result<(), MutexError> {
        self.send_frame(to, msg.encode()?)
    }

    fn poll_next(&self) -> Result<Option<(ProcessId, MutexMessage)>, MutexError> {
        match self.rx.try_recv() {
            Ok(envelope) => open_envelope(envelope).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(MutexError::ChannelClosed {
                process: self.process_id,
            }),
        }
    }

    fn recv(&self) -> Result<(ProcessId, MutexMessage), MutexError> {
        let envelope = self.rx.recv().map_err(|_| MutexError::ChannelClosed {
            process: self.process_id,
        })?;
        open_envelope(envelope)
    }

    fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<(ProcessId, MutexMessage)>, MutexError> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => open_envelope(envelope).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(MutexError::ChannelClosed {
                process: self.process_id,
            }),
        }
    }
}

/// Mock network that connects multiple processes via channels.
pub struct MockNetwork {
    /// Number of processes in the network.
    cluster_size: u32,
    /// Senders for each process's inbox.
    senders: HashMap<ProcessId, Sender<Envelope>>,
    /// Receivers for each process's inbox (taken when endpoint is created).
    receivers: HashMap<ProcessId, Receiver<Envelope>>,
}

impl MockNetwork {
    /// Create a new mock network for ranks `0..cluster_size`.
    pub fn new(cluster_size: u32) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();

        for id in 0..cluster_size {
            let (tx, rx) = unbounded();
            senders.insert(id, tx);
            receivers.insert(id, rx);
        }

        MockNetwork {
            cluster_size,
            senders,
            receivers,
        }
    }

    /// Create the endpoint for a specific process.
    ///
    /// This consumes the receiver for that process, so can only be called once per id.
    pub fn create_endpoint(&mut self, process_id: ProcessId) -> Option<NetworkEndpoint> {
        let rx = self.receivers.remove(&process_id)?;

        let tx_map = self
            .senders
            .iter()
            .filter(|(&id, _)| id != process_id)
            .map(|(&id, tx)| (id, tx.clone()))
            .collect();

        Some(NetworkEndpoint {
            process_id,
            rx,
            tx_map,
        })
    }

    /// Create every endpoint, in rank order.
    pub fn into_endpoints(mut self) -> Vec<NetworkEndpoint> {
        (0..self.cluster_size)
            .filter_map(|id| self.create_endpoint(id))
            .collect()
    }
}
