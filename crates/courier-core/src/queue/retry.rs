//! Backoff policy: decides retry delays.
//!
//! Pure arithmetic. Knows nothing about exhaustion; `max_attempts` is enforced
//! by the tracker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::CourierError;

const MINUTE: u64 = 60;

/// Longest delay a policy may produce (30 days).
pub const MAX_DELAY_SECS: u64 = 30 * 24 * 60 * MINUTE;

/// Backoff policy for failed deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// `min(base * multiplier^n, cap)`.
    Exponential {
        base_delay_secs: u64,
        multiplier: u32,
        cap_delay_secs: u64,
    },

    /// Explicit delay per attempt. The last step repeats forever.
    Ladder { steps_secs: Vec<u64> },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::notification_ladder()
    }
}

impl BackoffPolicy {
    /// 5m, 15m, 45m, 2h, then 6h for every later attempt.
    pub fn notification_ladder() -> Self {
        BackoffPolicy::Ladder {
            steps_secs: vec![5 * MINUTE, 15 * MINUTE, 45 * MINUTE, 120 * MINUTE, 360 * MINUTE],
        }
    }

    pub fn exponential(base_delay: Duration, multiplier: u32, cap_delay: Duration) -> Self {
        BackoffPolicy::Exponential {
            base_delay_secs: base_delay.as_secs(),
            multiplier,
            cap_delay_secs: cap_delay.as_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), CourierError> {
        match self {
            BackoffPolicy::Exponential {
                base_delay_secs,
                multiplier,
                cap_delay_secs,
            } => {
                if *multiplier == 0 {
                    return Err(CourierError::InvalidArgument(
                        "backoff multiplier must be at least 1".to_string(),
                    ));
                }
                if cap_delay_secs < base_delay_secs {
                    return Err(CourierError::InvalidArgument(format!(
                        "backoff cap ({cap_delay_secs}s) is below base delay ({base_delay_secs}s)"
                    )));
                }
                check_bound("backoff cap", *cap_delay_secs)
            }
            BackoffPolicy::Ladder { steps_secs } if steps_secs.is_empty() => Err(
                CourierError::InvalidArgument("backoff ladder has no steps".to_string()),
            ),
            BackoffPolicy::Ladder { steps_secs } => steps_secs
                .iter()
                .try_for_each(|secs| check_bound("backoff ladder step", *secs)),
        }
    }

    /// Delay before the next retry.
    ///
    /// `attempt_number` is the count of prior failed attempts (0 for the retry
    /// after the first failure). Negative input is a caller bug and is
    /// rejected, not clamped.
    pub fn next_delay(&self, attempt_number: i64) -> Result<Duration, CourierError> {
        if attempt_number < 0 {
            return Err(CourierError::InvalidArgument(format!(
                "attempt number must be >= 0, got {attempt_number}"
            )));
        }

        let secs = match self {
            BackoffPolicy::Exponential {
                base_delay_secs,
                multiplier,
                cap_delay_secs,
            } => {
                let exp = u32::try_from(attempt_number).unwrap_or(u32::MAX);
                u64::from(*multiplier)
                    .checked_pow(exp)
                    .and_then(|factor| base_delay_secs.checked_mul(factor))
                    .map_or(*cap_delay_secs, |secs| secs.min(*cap_delay_secs))
            }
            BackoffPolicy::Ladder { steps_secs } => {
                let last = steps_secs.len().checked_sub(1).ok_or_else(|| {
                    CourierError::InvalidArgument("backoff ladder has no steps".to_string())
                })?;
                let idx = usize::try_from(attempt_number).unwrap_or(usize::MAX).min(last);
                steps_secs[idx]
            }
        };

        Ok(Duration::from_secs(secs))
    }
}

fn check_bound(what: &str, secs: u64) -> Result<(), CourierError> {
    if secs > MAX_DELAY_SECS {
        return Err(CourierError::InvalidArgument(format!(
            "{what} ({secs}s) exceeds the {MAX_DELAY_SECS}s limit"
        )));
    }
    Ok(())
}
