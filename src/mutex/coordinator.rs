//! Event-driven coordinator: a [`MutexCore`] bound to a [`MessageChannel`].
//!
//! The coordinator never spins. Every wait is a blocking receive on the
//! channel, and every message received during a wait is dispatched to the
//! core, so peers' REQUESTs are answered (or deferred) while this process is
//! itself waiting for permission, holding the CS, or idling between attempts.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::clock::{ProcessId, RequestKey};
use super::errors::MutexError;
use super::message::MutexMessage;
use super::network::MessageChannel;
use super::state::{Dispatch, MutexCore, MutexState, Outbound};

/// One process's side of the mutual-exclusion protocol.
pub struct MutexCoordinator<C: MessageChannel> {
    core: MutexCore,
    channel: C,
}

impl<C: MessageChannel> MutexCoordinator<C> {
    /// Bind a fresh core to `channel`. `members` lists every rank in the cluster.
    pub fn new(channel: C, members: impl IntoIterator<Item = ProcessId>) -> Self {
        let core = MutexCore::new(channel.local_id(), members);
        MutexCoordinator { core, channel }
    }

    /// Convenience for ranks `0..size`.
    pub fn with_cluster_size(channel: C, size: u32) -> Self {
        Self::new(channel, 0..size)
    }

    /// Acquire the CS.
    ///
    /// Broadcasts REQUEST, then keeps receiving and dispatching until the
    /// last REPLY arrives. Returns the key the request was granted under.
    pub fn request_cs(&mut self) -> Result<RequestKey, MutexError> {
        let (key, out) = self.core.begin_request()?;
        self.send_all(&out)?;

        while !self.core.is_held() {
            let (from, msg) = self.channel.recv()?;
            self.dispatch(from, msg)?;
        }

        info!(process = self.core.id(), key = %key, "entered CS");
        Ok(key)
    }

    /// Leave the CS, sending every deferred REPLY. Returns how many were flushed.
    pub fn release_cs(&mut self) -> Result<usize, MutexError> {
        let out = self.core.release()?;
        self.send_all(&out)?;
        info!(process = self.core.id(), flushed = out.len(), "left CS");
        Ok(out.len())
    }

    /// Handle an inbound REQUEST.
    pub fn on_receive_request(&mut self, timestamp: u64, sender: ProcessId) -> Result<Dispatch, MutexError> {
        self.dispatch(sender, MutexMessage::Request { timestamp, sender })
    }

    /// Handle an inbound REPLY.
    pub fn on_receive_reply(&mut self, sender: ProcessId) -> Result<Dispatch, MutexError> {
        self.dispatch(sender, MutexMessage::Reply { sender })
    }

    /// Route one received message through the core and send what it asks for.
    pub fn dispatch(&mut self, from: ProcessId, msg: MutexMessage) -> Result<Dispatch, MutexError> {
        debug!(process = self.core.id(), from, kind = msg.kind(), "received");
        let dispatch = self.core.handle(from, msg)?;
        if let Some(out) = dispatch.outbound() {
            self.send_one(&out)?;
        }
        Ok(dispatch)
    }

    /// Dispatch every message that has already arrived. Returns how many.
    pub fn drain(&mut self) -> Result<usize, MutexError> {
        let mut handled = 0;
        while let Some((from, msg)) = self.channel.poll_next()? {
            self.dispatch(from, msg)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Service inbound messages for `duration` (think time, or work inside the CS).
    pub fn service_for(&mut self, duration: Duration) -> Result<usize, MutexError> {
        let deadline = Instant::now() + duration;
        let mut handled = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let Some((from, msg)) = self.channel.recv_timeout(deadline - now)? {
                self.dispatch(from, msg)?;
                handled += 1;
            }
        }

        Ok(handled + self.drain()?)
    }

    /// Announce DONE and keep servicing until every peer has announced DONE.
    ///
    /// Peers send DONE only after their last release, and per-pair delivery
    /// is ordered, so once every DONE is in no REQUEST can still be pending.
    pub fn finish(&mut self) -> Result<(), MutexError> {
        if self.core.state() != MutexState::Idle {
            return Err(MutexError::FinishWhileBusy {
                process: self.core.id(),
                state: self.core.state(),
            });
        }

        let out = self.core.finish();
        self.send_all(&out)?;
        debug!(process = self.core.id(), "announced DONE");

        while !self.core.all_peers_finished() {
            let (from, msg) = self.channel.recv()?;
            self.dispatch(from, msg)?;
        }
        Ok(())
    }

    fn send_one(&self, out: &Outbound) -> Result<(), MutexError> {
        debug!(process = self.core.id(), to = out.to, kind = out.msg.kind(), "sending");
        self.channel.send(out.to, &out.msg)
    }

    fn send_all(&self, out: &[Outbound]) -> Result<(), MutexError> {
        out.iter().try_for_each(|o| self.send_one(o))
    }

    pub fn core(&self) -> &MutexCore {
        &self.core
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn id(&self) -> ProcessId {
        self.core.id()
    }
}
