//! Latency-Injecting Network.
//!
//! Every frame goes through a single forwarding thread that sleeps for a
//! random latency before delivering it. One thread handles all frames in
//! arrival order, so per-pair FIFO still holds; only timing changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::mutex::network::{open_envelope, Envelope};
use crate::mutex::{MessageChannel, MutexError, MutexMessage, ProcessId};

/// A frame waiting for the forwarder: (from, to, bytes).
type Transit = (ProcessId, ProcessId, Vec<u8>);

/// Network endpoint for a single process behind the latency forwarder.
pub struct LatencyEndpoint {
    /// This process's ID.
    pub process_id: ProcessId,
    /// Receiver for delivered frames.
    rx: Receiver<Envelope>,
    /// Sender to the forwarding thread.
    tx_to_forwarder: Sender<Transit>,
    /// Ranks this endpoint may address.
    peers: Vec<ProcessId>,
    /// Statistics: frames handed to the forwarder.
    pub messages_sent: Arc<AtomicU64>,
}

impl MessageChannel for LatencyEndpoint {
    fn local_id(&self) -> ProcessId {
        self.process_id
    }

    fn send(&self, to: ProcessId, msg: &MutexMessage) -> Result<(), MutexError> {
        if self.peers.binary_search(&to).is_err() {
            return Err(MutexError::NoRoute {
                from: self.process_id,
                to,
            });
        }

        let frame = msg.encode()?;
        self.tx_to_forwarder
            .send((self.process_id, to, frame))
            .map_err(|_| MutexError::NoRoute {
                from: self.process_id,
                to,
            })?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
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

/// Network whose frames arrive after a random delay.
pub struct LatencyNetwork {
    cluster_size: u32,
    /// Receivers for each process's inbox (taken when endpoint is created).
    receivers: HashMap<ProcessId, Receiver<Envelope>>,
    forwarder_tx: Sender<Transit>,
    /// Frames delivered so far.
    delivered: Arc<AtomicU64>,
    _forwarder: Option<JoinHandle<()>>,
}

impl LatencyNetwork {
    /// Network for ranks `0..cluster_size` with latency drawn uniformly
    /// from `latency_range`. The forwarder RNG is seeded from `seed`.
    pub fn new(cluster_size: u32, latency_range: (Duration, Duration), seed: u64) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();

        for id in 0..cluster_size {
            let (tx, rx) = unbounded();
            senders.insert(id, tx);
            receivers.insert(id, rx);
        }

        let (forwarder_tx, forwarder_rx) = unbounded::<Transit>();
        let delivered = Arc::new(AtomicU64::new(0));
        let delivered_clone = delivered.clone();

        let handle = thread::spawn(move || {
            Self::forward(forwarder_rx, senders, latency_range, seed, delivered_clone);
        });

        LatencyNetwork {
            cluster_size,
            receivers,
            forwarder_tx,
            delivered,
            _forwarder: Some(handle),
        }
    }

    /// Forwarding loop. Exits once every endpoint and the network are dropped.
    fn forward(
        rx: Receiver<Transit>,
        senders: HashMap<ProcessId, Sender<Envelope>>,
        (min, max): (Duration, Duration),
        seed: u64,
        delivered: Arc<AtomicU64>,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        while let Ok((from, to, frame)) = rx.recv() {
            if max > Duration::ZERO {
                let latency = if min >= max {
                    min
                } else {
                    rng.gen_range(min..=max)
                };
                if latency > Duration::ZERO {
                    thread::sleep(latency);
                }
            }

            // A receiver that already exited just loses the frame.
            if let Some(tx) = senders.get(&to) {
                if tx.send((from, frame)).is_ok() {
                    delivered.fetch_add(1, Ordering::Relaxed);
                } else {
                    debug!(from, to, "dropping frame for departed process");
                }
            }
        }
    }

    /// Create the endpoint for a specific process. Only once per id.
    pub fn create_endpoint(&mut self, process_id: ProcessId) -> Option<LatencyEndpoint> {
        let rx = self.receivers.remove(&process_id)?;
        let peers = (0..self.cluster_size).filter(|&id| id != process_id).collect();

        Some(LatencyEndpoint {
            process_id,
            rx,
            tx_to_forwarder: self.forwarder_tx.clone(),
            peers,
            messages_sent: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Create every remaining endpoint, in rank order.
    pub fn endpoints(&mut self) -> Vec<LatencyEndpoint> {
        (0..self.cluster_size)
            .filter_map(|id| self.create_endpoint(id))
            .collect()
    }

    /// Frames the forwarder has delivered.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}
