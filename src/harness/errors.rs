use thiserror::Error;

use crate::config::ConfigError;
use crate::mutex::{MutexError, ProcessId};

/// Failure of a whole run, threaded or simulated.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Protocol(#[from] MutexError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("process {process} thread panicked")]
    Panicked { process: ProcessId },

    #[error("simulation still running after {steps} steps")]
    StepBudgetExhausted { steps: u64 },

    #[error("deadlock: processes {waiting:?} are waiting with nothing in flight")]
    Deadlock { waiting: Vec<ProcessId> },
}
