//! History and Mutual-Exclusion Checker.
//!
//! Records every CS entry/exit and clock sample and verifies:
//! - Safety: no two processes are inside the CS at once
//! - Grant order: entries follow strictly increasing request keys
//! - Liveness: every process got every grant it asked for
//! - Clock monotonicity: no process's clock ever moves backwards

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::mutex::{ProcessId, RequestKey};

/// Observable protocol events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Process entered the CS under `key`.
    Enter { process: ProcessId, key: RequestKey },
    /// Process left the CS.
    Exit { process: ProcessId },
    /// Clock value observed after a step.
    Clock { process: ProcessId, value: u64 },
}

/// A single entry in the event history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// When the event was recorded.
    pub timestamp: Instant,
    /// What happened.
    pub event: Event,
}

/// Ordered event log.
#[derive(Debug, Default, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        History {
            entries: Vec::new(),
        }
    }

    /// Append an event.
    pub fn record(&mut self, event: Event) {
        self.entries.push(HistoryEntry {
            timestamp: Instant::now(),
            event,
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Request keys in the order they were granted.
    pub fn grant_order(&self) -> Vec<RequestKey> {
        self.entries
            .iter()
            .filter_map(|e| match e.event {
                Event::Enter { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Thread-safe history wrapper.
///
/// Events are appended under the lock, so the log order is the real order
/// in which recording threads passed through it.
#[derive(Clone, Default)]
pub struct SharedHistory {
    inner: Arc<Mutex<History>>,
}

impl SharedHistory {
    pub fn new() -> Self {
        SharedHistory {
            inner: Arc::new(Mutex::new(History::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        // A panicking recorder cannot leave the Vec half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, event: Event) {
        self.lock().record(event);
    }

    /// Copy of the history for analysis.
    pub fn snapshot(&self) -> History {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Result of a check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Whether all checks passed.
    pub passed: bool,
    /// List of violations found.
    pub violations: Vec<Violation>,
    /// Statistics about the history.
    pub stats: CheckStats,
}

/// A detected violation.
#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub description: String,
    /// Related history entries (by index).
    pub related_entries: Vec<usize>,
}

/// Types of violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Two processes inside the CS at once.
    MutualExclusion,
    /// A process got fewer grants than it requested.
    MissingGrant,
    /// A grant went to a key not larger than the previous grant's key.
    GrantOrder,
    /// Exit without a matching entry.
    UnbalancedExit,
    /// A clock moved backwards.
    ClockRegression,
}

/// Statistics gathered while checking.
#[derive(Debug, Clone, Default)]
pub struct CheckStats {
    pub total_events: usize,
    pub entries: u64,
    pub exits: u64,
    /// Largest number of processes seen inside at once.
    pub max_concurrent: usize,
    pub entries_per_process: BTreeMap<ProcessId, u64>,
    /// Highest clock value observed per process.
    pub final_clocks: BTreeMap<ProcessId, u64>,
}

/// The checker (Oracle).
pub struct Checker {
    /// Grants each process is expected to receive.
    expected_entries: BTreeMap<ProcessId, u64>,
}

impl Checker {
    /// Expect `attempts` grants for every rank in `0..processes`.
    pub fn new(processes: u32, attempts: u32) -> Self {
        Checker {
            expected_entries: (0..processes).map(|p| (p, attempts as u64)).collect(),
        }
    }

    /// Checker with no liveness expectations.
    pub fn empty() -> Self {
        Checker {
            expected_entries: BTreeMap::new(),
        }
    }

    /// Verify every invariant over `history`.
    pub fn verify(&self, history: &History) -> CheckResult {
        let mut violations = Vec::new();
        let mut stats = CheckStats::default();

        // Processes currently inside, with the index of their Enter.
        let mut inside: BTreeMap<ProcessId, usize> = BTreeMap::new();
        let mut last_grant: Option<(RequestKey, usize)> = None;
        let mut last_clock: BTreeMap<ProcessId, (u64, usize)> = BTreeMap::new();

        for (idx, entry) in history.entries().iter().enumerate() {
            stats.total_events += 1;

            match entry.event {
                Event::Enter { process, key } => {
                    stats.entries += 1;
                    *stats.entries_per_process.entry(process).or_insert(0) += 1;

                    if let Some((&holder, &holder_idx)) = inside.iter().next() {
                        violations.push(Violation {
                            kind: ViolationKind::MutualExclusion,
                            description: format!(
                                "Process {} entered the CS at entry {} while process {} was inside since entry {}",
                                process, idx, holder, holder_idx
                            ),
                            related_entries: vec![holder_idx, idx],
                        });
                    }
                    inside.insert(process, idx);
                    stats.max_concurrent = stats.max_concurrent.max(inside.len());

                    if let Some((prev, prev_idx)) = last_grant {
                        if !prev.precedes(&key) {
                            violations.push(Violation {
                                kind: ViolationKind::GrantOrder,
                                description: format!(
                                    "Grant {} at entry {} does not follow grant {} at entry {}",
                                    key, idx, prev, prev_idx
                                ),
                                related_entries: vec![prev_idx, idx],
                            });
                        }
                    }
                    last_grant = Some((key, idx));
                }
                Event::Exit { process } => {
                    stats.exits += 1;
                    if inside.remove(&process).is_none() {
                        violations.push(Violation {
                            kind: ViolationKind::UnbalancedExit,
                            description: format!(
                                "Process {} left the CS at entry {} without entering",
                                process, idx
                            ),
                            related_entries: vec![idx],
                        });
                    }
                }
                Event::Clock { process, value } => {
                    if let Some(&(prev, prev_idx)) = last_clock.get(&process) {
                        if value < prev {
                            violations.push(Violation {
                                kind: ViolationKind::ClockRegression,
                                description: format!(
                                    "Process {} clock went from {} (entry {}) to {} (entry {})",
                                    process, prev, prev_idx, value, idx
                                ),
                                related_entries: vec![prev_idx, idx],
                            });
                        }
                    }
                    last_clock.insert(process, (value, idx));
                    let max = stats.final_clocks.entry(process).or_insert(0);
                    *max = (*max).max(value);
                }
            }
        }

        for (&process, &expected) in &self.expected_entries {
            let got = stats.entries_per_process.get(&process).copied().unwrap_or(0);
            if got != expected {
                violations.push(Violation {
                    kind: ViolationKind::MissingGrant,
                    description: format!(
                        "Process {} entered the CS {} times, expected {}",
                        process, got, expected
                    ),
                    related_entries: vec![],
                });
            }
        }

        CheckResult {
            passed: violations.is_empty(),
            violations,
            stats,
        }
    }
}
