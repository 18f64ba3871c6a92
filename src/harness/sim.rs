//! Deterministic discrete-event simulation.
//!
//! Sans-IO cores exchange messages through per-pair FIFO links that the
//! simulator owns. Nothing happens unless a step is taken, so a test can
//! script an exact interleaving (`request`, `deliver`, `release`) or hand
//! the choice to a seeded scheduler (`step`, `run`). The same seed always
//! replays the same schedule.

use std::collections::{BTreeMap, VecDeque};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::config::SimConfig;
use crate::mutex::{Dispatch, MutexCore, MutexError, MutexMessage, MutexState, Outbound, ProcessId, RequestKey};

use super::checker::{Event, History};
use super::errors::HarnessError;

/// One schedulable action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Deliver the oldest message on the `from -> to` link.
    Deliver { from: ProcessId, to: ProcessId },
    /// Process starts its next CS attempt.
    Request(ProcessId),
    /// Process leaves the CS.
    Release(ProcessId),
    /// Process has no attempts left and announces DONE.
    Finish(ProcessId),
}

/// Summary of a completed simulation.
#[derive(Debug, Clone)]
pub struct SimOutcome {
    pub seed: u64,
    pub steps: u64,
    pub delivered: u64,
    pub history: History,
}

/// The simulated cluster.
pub struct World {
    cores: Vec<MutexCore>,
    /// In-flight messages, FIFO per (from, to).
    links: BTreeMap<(ProcessId, ProcessId), VecDeque<MutexMessage>>,
    /// Attempts each process has yet to start.
    remaining: Vec<u32>,
    done_sent: Vec<bool>,
    history: History,
    rng: ChaCha8Rng,
    seed: u64,
    steps: u64,
    delivered: u64,
}

impl World {
    /// Cluster of ranks `0..processes`. Scripted use only; no attempts are
    /// scheduled.
    pub fn new(processes: u32, seed: u64) -> Self {
        World {
            cores: (0..processes)
                .map(|id| MutexCore::with_cluster_size(id, processes))
                .collect(),
            links: BTreeMap::new(),
            remaining: vec![0; processes as usize],
            done_sent: vec![false; processes as usize],
            history: History::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            steps: 0,
            delivered: 0,
        }
    }

    /// World ready for a scheduled run with `attempts` per process.
    pub fn from_config(config: &SimConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let mut world = World::new(config.processes, config.seed);
        world.remaining = vec![config.attempts; config.processes as usize];
        Ok(world)
    }

    // =========================================================================
    // SCRIPTED STEPS
    // =========================================================================

    /// `process` broadcasts a REQUEST.
    pub fn request(&mut self, process: ProcessId) -> Result<RequestKey, MutexError> {
        let (key, out) = self.core_mut(process)?.begin_request()?;
        self.enqueue(out);
        if self.core(process).is_held() {
            self.history.record(Event::Enter { process, key });
        }
        self.sample_clock(process);
        Ok(key)
    }

    /// Deliver the oldest message on `from -> to`. `None` if the link is empty.
    pub fn deliver(&mut self, from: ProcessId, to: ProcessId) -> Result<Option<Dispatch>, MutexError> {
        let msg = match self.links.get_mut(&(from, to)).and_then(VecDeque::pop_front) {
            Some(msg) => msg,
            None => return Ok(None),
        };
        self.delivered += 1;

        let dispatch = self.core_mut(to)?.handle(from, msg)?;
        if let Some(out) = dispatch.outbound() {
            self.enqueue([out]);
        }
        if dispatch == Dispatch::Granted {
            if let Some(key) = self.core(to).request_key() {
                self.history.record(Event::Enter { process: to, key });
            }
        }
        self.sample_clock(to);
        Ok(Some(dispatch))
    }

    /// `process` leaves the CS. Returns how many deferred REPLYs were flushed.
    pub fn release(&mut self, process: ProcessId) -> Result<usize, MutexError> {
        let out = self.core_mut(process)?.release()?;
        self.history.record(Event::Exit { process });
        let flushed = out.len();
        self.enqueue(out);
        self.sample_clock(process);
        Ok(flushed)
    }

    /// `process` announces DONE to every peer.
    pub fn finish(&mut self, process: ProcessId) -> Result<(), MutexError> {
        let out = self.core_mut(process)?.finish();
        self.enqueue(out);
        if let Some(sent) = self.done_sent.get_mut(process as usize) {
            *sent = true;
        }
        Ok(())
    }

    // =========================================================================
    // SCHEDULED RUN
    // =========================================================================

    /// Every action currently possible, in a stable order.
    pub fn enabled_actions(&self) -> Vec<Action> {
        let mut actions: Vec<Action> = self
            .links
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(&(from, to), _)| Action::Deliver { from, to })
            .collect();

        for core in &self.cores {
            let id = core.id();
            let idx = id as usize;
            match core.state() {
                MutexState::Idle if self.remaining[idx] > 0 => actions.push(Action::Request(id)),
                MutexState::Idle if !self.done_sent[idx] => actions.push(Action::Finish(id)),
                MutexState::Held => actions.push(Action::Release(id)),
                _ => {}
            }
        }
        actions
    }

    /// Apply a single action.
    pub fn apply(&mut self, action: Action) -> Result<(), MutexError> {
        match action {
            Action::Deliver { from, to } => {
                self.deliver(from, to)?;
            }
            Action::Request(p) => {
                if let Some(left) = self.remaining.get_mut(p as usize) {
                    *left = left.saturating_sub(1);
                }
                self.request(p)?;
            }
            Action::Release(p) => {
                self.release(p)?;
            }
            Action::Finish(p) => self.finish(p)?,
        }
        Ok(())
    }

    /// Take one randomly chosen action. `Ok(false)` once nothing is enabled.
    pub fn step(&mut self) -> Result<bool, MutexError> {
        let actions = self.enabled_actions();
        if actions.is_empty() {
            return Ok(false);
        }
        let action = actions[self.rng.gen_range(0..actions.len())];
        debug!(step = self.steps, ?action, "sim step");
        self.apply(action)?;
        self.steps += 1;
        Ok(true)
    }

    /// Step until quiescent or `max_steps` is spent.
    ///
    /// Quiescence with any process still Wanted or Held is a deadlock.
    pub fn run(mut self, max_steps: u64) -> Result<SimOutcome, HarnessError> {
        while self.step()? {
            if self.steps >= max_steps {
                return Err(HarnessError::StepBudgetExhausted { steps: self.steps });
            }
        }

        let waiting: Vec<ProcessId> = self
            .cores
            .iter()
            .filter(|c| c.state() != MutexState::Idle || !c.all_peers_finished())
            .map(MutexCore::id)
            .collect();
        if !waiting.is_empty() {
            return Err(HarnessError::Deadlock { waiting });
        }

        Ok(SimOutcome {
            seed: self.seed,
            steps: self.steps,
            delivered: self.delivered,
            history: self.history,
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Core for `process`.
    ///
    /// # Panics
    /// If `process` is not a rank in this world.
    pub fn core(&self, process: ProcessId) -> &MutexCore {
        &self.cores[process as usize]
    }

    /// Processes currently inside the CS.
    pub fn holders(&self) -> Vec<ProcessId> {
        self.cores
            .iter()
            .filter(|c| c.is_held())
            .map(MutexCore::id)
            .collect()
    }

    /// Messages waiting on `from -> to`.
    pub fn in_flight(&self, from: ProcessId, to: ProcessId) -> Vec<MutexMessage> {
        self.links
            .get(&(from, to))
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    fn core_mut(&mut self, process: ProcessId) -> Result<&mut MutexCore, MutexError> {
        self.cores
            .get_mut(process as usize)
            .ok_or(MutexError::NoRoute {
                from: process,
                to: process,
            })
    }

    fn enqueue(&mut self, out: impl IntoIterator<Item = Outbound>) {
        for Outbound { to, msg } in out {
            self.links
                .entry((msg.sender(), to))
                .or_default()
                .push_back(msg);
        }
    }

    fn sample_clock(&mut self, process: ProcessId) {
        let value = self.core(process).clock();
        self.history.record(Event::Clock { process, value });
    }
}

/// Build a world from `config` and run it to completion.
pub fn simulate(config: &SimConfig) -> Result<SimOutcome, HarnessError> {
    World::from_config(config)?.run(config.max_steps)
}
