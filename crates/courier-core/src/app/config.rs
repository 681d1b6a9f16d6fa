//! Scheduler configuration.
//!
//! Every field has a default, so a partial JSON document is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::CourierError;
use crate::queue::BackoffPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Failed attempts after which a deliverable is exhausted.
    pub max_attempts: u32,

    /// How long a dispatch may stay in flight before it counts as a
    /// transient failure.
    pub in_flight_timeout_ms: u64,

    /// Upper bound on the loop's sleep between cycles.
    pub poll_interval_ms: u64,

    pub backoff: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            in_flight_timeout_ms: 120_000,
            poll_interval_ms: 5_000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CourierError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CourierError::InvalidArgument(format!("scheduler config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn in_flight_timeout(&self) -> Duration {
        Duration::from_millis(self.in_flight_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), CourierError> {
        if self.max_attempts == 0 {
            return Err(CourierError::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.in_flight_timeout_ms == 0 {
            return Err(CourierError::InvalidArgument(
                "in_flight_timeout_ms must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(CourierError::InvalidArgument(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        self.backoff.validate()
    }
}
