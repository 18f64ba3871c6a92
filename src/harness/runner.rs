//! Threaded Process Runner.
//!
//! Runs each process's coordinator on its own OS thread. A process thinks,
//! acquires the CS, holds it for a while, releases it, and repeats for the
//! configured number of attempts, then exchanges DONE with every peer.
//! Every wait services inbound messages.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::mutex::{CoreStats, MessageChannel, MockNetwork, MutexCoordinator, MutexError, ProcessId};

use super::checker::{CheckResult, Checker, Event, History, SharedHistory};
use super::errors::HarnessError;
use super::network::LatencyNetwork;

/// What a process did over its lifetime.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub process: ProcessId,
    /// CS executions completed.
    pub entries: u32,
    /// Clock value after the DONE exchange.
    pub final_clock: u64,
    pub stats: CoreStats,
}

/// Handle to a running process thread.
pub struct ProcessHandle {
    pub process_id: ProcessId,
    thread_handle: Option<JoinHandle<Result<ProcessReport, MutexError>>>,
}

impl ProcessHandle {
    /// Wait for the process to finish all attempts and the DONE exchange.
    pub fn join(mut self) -> Result<ProcessReport, HarnessError> {
        let handle = self.thread_handle.take().ok_or(HarnessError::Panicked {
            process: self.process_id,
        })?;
        match handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(HarnessError::Panicked {
                process: self.process_id,
            }),
        }
    }
}

/// The loop that executes in a process's own thread.
struct ProcessRunner<C: MessageChannel> {
    coordinator: MutexCoordinator<C>,
    attempts: u32,
    think_time: (Duration, Duration),
    hold_time: (Duration, Duration),
    rng: ChaCha8Rng,
    history: SharedHistory,
}

impl<C: MessageChannel> ProcessRunner<C> {
    fn new(
        coordinator: MutexCoordinator<C>,
        config: &ClusterConfig,
        seed: u64,
        history: SharedHistory,
    ) -> Self {
        ProcessRunner {
            coordinator,
            attempts: config.attempts,
            think_time: config.think_time,
            hold_time: config.hold_time,
            rng: ChaCha8Rng::seed_from_u64(seed),
            history,
        }
    }

    fn run(&mut self) -> Result<ProcessReport, MutexError> {
        let process = self.coordinator.id();

        for attempt in 1..=self.attempts {
            let think = sample(&mut self.rng, self.think_time);
            self.coordinator.service_for(think)?;

            let key = self.coordinator.request_cs()?;
            self.history.record(Event::Enter { process, key });
            self.sample_clock();
            info!(
                process,
                attempt,
                attempts = self.attempts,
                timestamp = key.timestamp,
                "executing CS"
            );

            let hold = sample(&mut self.rng, self.hold_time);
            self.coordinator.service_for(hold)?;

            // Exit is logged before any deferred REPLY leaves this process.
            self.history.record(Event::Exit { process });
            self.coordinator.release_cs()?;
            self.sample_clock();
        }

        self.coordinator.finish()?;
        self.sample_clock();
        debug!(process, "all peers finished");

        let core = self.coordinator.core();
        Ok(ProcessReport {
            process,
            entries: self.attempts,
            final_clock: core.clock(),
            stats: core.stats(),
        })
    }

    fn sample_clock(&self) {
        self.history.record(Event::Clock {
            process: self.coordinator.id(),
            value: self.coordinator.core().clock(),
        });
    }
}

/// Uniform draw from an inclusive duration range.
fn sample<R: Rng>(rng: &mut R, (min, max): (Duration, Duration)) -> Duration {
    if min >= max {
        min
    } else {
        rng.gen_range(min..=max)
    }
}

/// Spawn a process in its own thread.
pub fn spawn_process<C>(
    coordinator: MutexCoordinator<C>,
    config: &ClusterConfig,
    seed: u64,
    history: SharedHistory,
) -> ProcessHandle
where
    C: MessageChannel + Send + 'static,
{
    let process_id = coordinator.id();
    let mut runner = ProcessRunner::new(coordinator, config, seed, history);
    let thread_handle = thread::spawn(move || runner.run());

    ProcessHandle {
        process_id,
        thread_handle: Some(thread_handle),
    }
}

/// Outcome of a complete threaded run.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub reports: Vec<ProcessReport>,
    pub history: History,
    pub check: CheckResult,
}

impl ClusterOutcome {
    /// Total CS executions across every process.
    pub fn total_entries(&self) -> u64 {
        self.reports.iter().map(|r| r.entries as u64).sum()
    }
}

/// Cluster manager for spawning and joining every process.
pub struct ClusterManager {
    pub processes: Vec<ProcessHandle>,
    history: SharedHistory,
    checker: Checker,
}

impl ClusterManager {
    /// Validate `config`, build the network it asks for and spawn one
    /// thread per process.
    ///
    /// A zero latency range uses the direct crossbeam network; anything
    /// else routes frames through the latency forwarder.
    pub fn launch(config: &ClusterConfig) -> Result<Self, HarnessError> {
        config.validate()?;

        let seed = config.seed.unwrap_or_else(rand::random);
        info!(
            processes = config.processes,
            attempts = config.attempts,
            seed,
            "launching cluster"
        );

        if config.latency_range.1 > Duration::ZERO {
            let mut network = LatencyNetwork::new(config.processes, config.latency_range, seed);
            Ok(Self::spawn(network.endpoints(), config, seed))
        } else {
            let network = MockNetwork::new(config.processes);
            Ok(Self::spawn(network.into_endpoints(), config, seed))
        }
    }

    /// Spawn one process per endpoint. Endpoint ids must be `0..processes`.
    pub fn spawn<C>(endpoints: Vec<C>, config: &ClusterConfig, seed: u64) -> Self
    where
        C: MessageChannel + Send + 'static,
    {
        let history = SharedHistory::new();
        let processes = endpoints
            .into_iter()
            .map(|endpoint| {
                let id = endpoint.local_id();
                let coordinator = MutexCoordinator::with_cluster_size(endpoint, config.processes);
                spawn_process(
                    coordinator,
                    config,
                    seed.wrapping_add(id as u64),
                    history.clone(),
                )
            })
            .collect();

        ClusterManager {
            processes,
            history,
            checker: Checker::new(config.processes, config.attempts),
        }
    }

    /// Join every process and check the recorded history.
    ///
    /// Every thread is joined even after a failure; the first error wins.
    pub fn join(self) -> Result<ClusterOutcome, HarnessError> {
        let mut reports = Vec::with_capacity(self.processes.len());
        let mut first_error = None;

        for handle in self.processes {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let history = self.history.snapshot();
        let check = self.checker.verify(&history);
        Ok(ClusterOutcome {
            reports,
            history,
            check,
        })
    }
}

/// Launch a cluster and wait for it to finish.
pub fn run_cluster(config: &ClusterConfig) -> Result<ClusterOutcome, HarnessError> {
    ClusterManager::launch(config)?.join()
}
