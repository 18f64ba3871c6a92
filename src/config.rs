//! Run configuration for the threaded cluster and the deterministic simulator.

use std::time::Duration;

use thiserror::Error;

/// Rejected configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("need at least 2 processes for mutual exclusion, got {0}")]
    TooFewProcesses(u32),

    #[error("attempts per process must be at least 1")]
    NoAttempts,

    #[error("{name} range is inverted: {min:?} > {max:?}")]
    InvertedRange {
        name: &'static str,
        min: Duration,
        max: Duration,
    },

    #[error("step budget must be at least 1")]
    NoSteps,
}

/// Configuration for a threaded cluster run.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of processes (ranks `0..processes`).
    pub processes: u32,
    /// CS executions per process.
    pub attempts: u32,
    /// Random delay before each request, servicing messages meanwhile.
    pub think_time: (Duration, Duration),
    /// Random time spent inside the CS.
    pub hold_time: (Duration, Duration),
    /// Latency injected per message.
    pub latency_range: (Duration, Duration),
    /// RNG seed; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            processes: 4,
            attempts: 3,
            think_time: (Duration::ZERO, Duration::from_millis(200)),
            hold_time: (Duration::from_millis(50), Duration::from_millis(100)),
            latency_range: (Duration::ZERO, Duration::ZERO),
            seed: None,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_common(self.processes, self.attempts)?;
        check_range("think time", self.think_time)?;
        check_range("hold time", self.hold_time)?;
        check_range("latency", self.latency_range)?;
        Ok(())
    }

    /// Total CS executions the run should produce.
    pub fn expected_entries(&self) -> u64 {
        self.processes as u64 * self.attempts as u64
    }
}

/// Configuration for a deterministic simulation.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub processes: u32,
    pub attempts: u32,
    /// Schedule seed. The same seed always replays the same interleaving.
    pub seed: u64,
    /// Scheduler steps before the run is declared stuck.
    pub max_steps: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            processes: 3,
            attempts: 2,
            seed: 0,
            max_steps: 100_000,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_common(self.processes, self.attempts)?;
        if self.max_steps == 0 {
            return Err(ConfigError::NoSteps);
        }
        Ok(())
    }
}

fn validate_common(processes: u32, attempts: u32) -> Result<(), ConfigError> {
    if processes < 2 {
        return Err(ConfigError::TooFewProcesses(processes));
    }
    if attempts == 0 {
        return Err(ConfigError::NoAttempts);
    }
    Ok(())
}

fn check_range(name: &'static str, (min, max): (Duration, Duration)) -> Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::InvertedRange { name, min, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ClusterConfig::default().validate().is_ok());
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_single_process_rejected() {
        let config = ClusterConfig {
            processes: 1,
            ..ClusterConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TooFewProcesses(1)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let config = ClusterConfig {
            hold_time: (Duration::from_millis(10), Duration::from_millis(5)),
            ..ClusterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedRange { name: "hold time", .. })
        ));
    }

    #[test]
    fn test_sim_needs_steps_and_attempts() {
        let config = SimConfig {
            max_steps: 0,
            ..SimConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoSteps));

        let config = SimConfig {
            attempts: 0,
            ..SimConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoAttempts));
    }
}
