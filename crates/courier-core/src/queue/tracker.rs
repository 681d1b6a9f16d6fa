//! Per-deliverable attempt tracker.
//!
//! Single owner of every state transition on a `Deliverable`. The scheduler
//! wraps each tracker in its own lock, so methods here assume exclusive
//! access and never block.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{BackoffPolicy, DeliveryState};
use crate::domain::{
    AttemptTicket, CourierError, Deliverable, DeliverableId, RetryAttemptRecord, SendOutcome,
};

/// What applying an outcome did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Succeeded,
    Retrying { next_eligible_at: DateTime<Utc> },
    Exhausted,
    /// Cancel was requested while in flight and the outcome would have retried.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDisposition {
    /// Record is now `Cancelled`.
    Cancelled,
    /// Record is in flight; the pending outcome decides, then no more retries.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct DeliveryAttemptTracker {
    deliverable: Deliverable,
    max_attempts: u32,
    cancel_requested: bool,
}

impl DeliveryAttemptTracker {
    pub fn new(deliverable: Deliverable, max_attempts: u32) -> Self {
        Self {
            deliverable,
            max_attempts,
            cancel_requested: false,
        }
    }

    pub fn id(&self) -> DeliverableId {
        self.deliverable.id
    }

    pub fn state(&self) -> DeliveryState {
        self.deliverable.state
    }

    pub fn deliverable(&self) -> &Deliverable {
        &self.deliverable
    }

    pub fn snapshot(&self) -> Deliverable {
        self.deliverable.clone()
    }

    /// Instant from which the record may be dispatched, if it is waiting at all.
    pub fn eligible_at(&self) -> Option<DateTime<Utc>> {
        match self.deliverable.state {
            DeliveryState::Pending => Some(self.deliverable.enqueued_at),
            DeliveryState::FailedRetrying => Some(
                self.deliverable
                    .next_eligible_at
                    .unwrap_or(self.deliverable.updated_at),
            ),
            _ => None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.eligible_at().is_some_and(|at| at <= now)
    }

    /// Pending | FailedRetrying (due) -> InFlight.
    pub fn begin_dispatch(&mut self, now: DateTime<Utc>) -> Result<AttemptTicket, CourierError> {
        if !self.is_due(now) {
            return Err(self.invalid("dispatch"));
        }

        let d = &mut self.deliverable;
        d.state = DeliveryState::InFlight;
        d.next_eligible_at = None;
        d.in_flight_since = Some(now);
        d.updated_at = now;

        Ok(AttemptTicket {
            deliverable_id: d.id,
            attempt_number: d.attempt_count + 1,
            started_at: now,
        })
    }

    /// Apply a Sender outcome to the attempt identified by `ticket`.
    pub fn apply_outcome(
        &mut self,
        ticket: &AttemptTicket,
        outcome: SendOutcome,
        now: DateTime<Utc>,
        policy: &BackoffPolicy,
    ) -> Result<Transition, CourierError> {
        let current_attempt = self.deliverable.attempt_count + 1;
        if self.deliverable.state != DeliveryState::InFlight
            || ticket.deliverable_id != self.deliverable.id
            || ticket.attempt_number != current_attempt
        {
            return Err(CourierError::StaleOutcome {
                id: self.deliverable.id,
                attempt: ticket.attempt_number,
            });
        }

        // A retry instant that cannot be computed ends the record instead of
        // leaving it in flight.
        let mut backoff_error = None;
        let transition = match &outcome {
            SendOutcome::Success => Transition::Succeeded,
            SendOutcome::PermanentFailure(_) => Transition::Exhausted,
            SendOutcome::TransientFailure(_) if current_attempt >= self.max_attempts => {
                Transition::Exhausted
            }
            SendOutcome::TransientFailure(_) if self.cancel_requested => Transition::Cancelled,
            SendOutcome::TransientFailure(_) => {
                match retry_at(policy, self.deliverable.attempt_count, now) {
                    Ok(next_eligible_at) => Transition::Retrying { next_eligible_at },
                    Err(err) => {
                        backoff_error = Some(err);
                        Transition::Exhausted
                    }
                }
            }
        };

        let d = &mut self.deliverable;
        d.history.push(RetryAttemptRecord {
            deliverable_id: d.id,
            attempt_number: ticket.attempt_number,
            started_at: ticket.started_at,
            finished_at: now,
            outcome: outcome.clone(),
        });
        d.in_flight_since = None;
        d.updated_at = now;
        if let Some(reason) = outcome.reason() {
            d.attempt_count += 1;
            d.last_error = Some(match &backoff_error {
                Some(err) => format!("{reason}; retry not scheduled: {err}"),
                None => reason.to_string(),
            });
        }

        match transition {
            Transition::Succeeded => d.state = DeliveryState::Succeeded,
            Transition::Exhausted => d.state = DeliveryState::FailedExhausted,
            Transition::Cancelled => d.state = DeliveryState::Cancelled,
            Transition::Retrying { next_eligible_at } => {
                d.state = DeliveryState::FailedRetrying;
                d.next_eligible_at = Some(next_eligible_at);
            }
        }

        Ok(transition)
    }

    /// Force a transient failure if the current dispatch outlived `timeout`.
    ///
    /// Returns `None` when the record is not in flight or still within budget.
    pub fn expire_if_overdue(
        &mut self,
        now: DateTime<Utc>,
        timeout: Duration,
        policy: &BackoffPolicy,
    ) -> Result<Option<Transition>, CourierError> {
        if self.deliverable.state != DeliveryState::InFlight {
            return Ok(None);
        }
        let since = self
            .deliverable
            .in_flight_since
            .unwrap_or(self.deliverable.updated_at);
        let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
        if elapsed < timeout {
            return Ok(None);
        }

        let ticket = AttemptTicket {
            deliverable_id: self.deliverable.id,
            attempt_number: self.deliverable.attempt_count + 1,
            started_at: since,
        };
        let reason = CourierError::SchedulerInternalTimeout {
            id: self.deliverable.id,
            elapsed,
            timeout,
        };
        self.apply_outcome(&ticket, SendOutcome::transient(reason.to_string()), now, policy)
            .map(Some)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<CancelDisposition, CourierError> {
        match self.deliverable.state {
            DeliveryState::Pending | DeliveryState::FailedRetrying => {
                let d = &mut self.deliverable;
                d.state = DeliveryState::Cancelled;
                d.next_eligible_at = None;
                d.updated_at = now;
                Ok(CancelDisposition::Cancelled)
            }
            DeliveryState::InFlight => {
                self.cancel_requested = true;
                Ok(CancelDisposition::Deferred)
            }
            _ => Err(self.invalid("cancel")),
        }
    }

    fn invalid(&self, action: &'static str) -> CourierError {
        CourierError::InvalidTransition {
            id: self.deliverable.id,
            from: self.deliverable.state,
            action,
        }
    }
}

fn retry_at(
    policy: &BackoffPolicy,
    failed_attempts: u32,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, CourierError> {
    let delay = policy.next_delay(i64::from(failed_attempts))?;
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| CourierError::InvalidArgument(format!("backoff delay {delay:?} out of range")))
}
