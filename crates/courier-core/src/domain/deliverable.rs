//! Deliverable record: payload + delivery bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::RetryAttemptRecord;
use super::ids::DeliverableId;
use crate::queue::DeliveryState;

/// Opaque content handed to the Sender as-is.
pub type Payload = serde_json::Value;

/// One outbound notification awaiting a successful send.
///
/// Design:
/// - Created `Pending` by an external producer.
/// - Every field below `payload` is owned by the tracker; callers only ever
///   see clones.
/// - Terminal records are kept (marked, never deleted) until acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: DeliverableId,
    pub payload: Payload,

    pub state: DeliveryState,

    /// Number of failed attempts so far. A success does not bump it.
    pub attempt_count: u32,

    /// Set only while `FailedRetrying`.
    pub next_eligible_at: Option<DateTime<Utc>>,

    /// Set only while `InFlight`.
    pub in_flight_since: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    #[serde(default)]
    pub history: Vec<RetryAttemptRecord>,

    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deliverable {
    pub fn new(id: DeliverableId, payload: Payload, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            state: DeliveryState::Pending,
            attempt_count: 0,
            next_eligible_at: None,
            in_flight_since: None,
            last_error: None,
            history: Vec::new(),
            enqueued_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Operator-facing explanation of a failed delivery.
    pub fn failure_summary(&self) -> Option<String> {
        if self.state != DeliveryState::FailedExhausted {
            return None;
        }
        let reasons: Vec<&str> = self
            .history
            .iter()
            .filter_map(|a| a.outcome.reason())
            .collect();
        Some(format!(
            "delivery failed after {} attempts: {}",
            self.attempt_count,
            reasons.join("; ")
        ))
    }
}
