use serde::{Deserialize, Serialize};

use crate::queue::DeliveryState;

/// Active-set counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed_retrying: usize,
    pub failed_exhausted: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    pub fn record(&mut self, state: DeliveryState) {
        match state {
            DeliveryState::Pending => self.pending += 1,
            DeliveryState::InFlight => self.in_flight += 1,
            DeliveryState::Succeeded => self.succeeded += 1,
            DeliveryState::FailedRetrying => self.failed_retrying += 1,
            DeliveryState::FailedExhausted => self.failed_exhausted += 1,
            DeliveryState::Cancelled => self.cancelled += 1,
        }
    }

    /// Records that still need work from the scheduler.
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_flight + self.failed_retrying
    }
}
