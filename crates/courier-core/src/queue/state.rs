//! Delivery state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deliverable state.
///
/// State transitions:
/// - Pending -> InFlight -> Succeeded
/// - Pending -> InFlight -> FailedRetrying -> InFlight (loop until max_attempts)
/// - Pending -> InFlight -> FailedExhausted (attempts used up, or permanent failure)
/// - Pending | FailedRetrying -> Cancelled
/// - InFlight -> Cancelled (cancel requested mid-flight, outcome would retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Created, never dispatched. Eligible immediately.
    Pending,

    /// Handed to the Sender, outcome not applied yet.
    InFlight,

    Succeeded,

    /// Waiting out the backoff delay.
    FailedRetrying,

    /// Gave up (max attempts reached or permanent failure).
    FailedExhausted,

    /// Withdrawn by the producer.
    Cancelled,
}

impl DeliveryState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryState::Succeeded | DeliveryState::FailedExhausted | DeliveryState::Cancelled
        )
    }

    /// May the scheduler pick this record up (given its instant has passed)?
    pub fn is_dispatchable(self) -> bool {
        matches!(self, DeliveryState::Pending | DeliveryState::FailedRetrying)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::InFlight => "in_flight",
            DeliveryState::Succeeded => "succeeded",
            DeliveryState::FailedRetrying => "failed_retrying",
            DeliveryState::FailedExhausted => "failed_exhausted",
            DeliveryState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
