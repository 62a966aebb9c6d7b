//! Issuance scheduler settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest accepted tick interval
pub const MIN_INTERVAL_SECS: u64 = 60;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Seconds between periodic ticks
    pub interval_secs: u64,

    /// Maximum records processed per tick
    pub batch_size: usize,

    /// Delay before the first tick when `start_at_hour` is unset
    pub initial_delay_secs: u64,

    /// Local hour of day (0-23) at which the first tick runs
    pub start_at_hour: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            initial_delay_secs: default_initial_delay(),
            start_at_hour: None,
        }
    }
}

fn default_interval() -> u64 {
    30 * 60
}

fn default_batch_size() -> usize {
    10
}

fn default_initial_delay() -> u64 {
    10
}

impl SchedulerConfig {
    /// Tick interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Delay before the first tick
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid(
                "scheduler.batch_size",
                "must be at least 1",
            ));
        }
        if self.interval_secs < MIN_INTERVAL_SECS {
            return Err(ConfigError::invalid(
                "scheduler.interval_secs",
                format!("must be at least {MIN_INTERVAL_SECS}"),
            ));
        }
        if let Some(hour) = self.start_at_hour {
            if hour > 23 {
                return Err(ConfigError::invalid(
                    "scheduler.start_at_hour",
                    format!("{hour} is not an hour of the day"),
                ));
            }
        }
        Ok(())
    }
}
