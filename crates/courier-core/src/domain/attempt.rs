//! Attempt history for deliverables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::DeliverableId;
use super::outcome::SendOutcome;

/// One dispatch of a deliverable and how it ended.
///
/// Records are appended to the owning `Deliverable` so an operator surface can
/// explain "delivery failed after N attempts" with every reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttemptRecord {
    pub deliverable_id: DeliverableId,

    /// 1-based dispatch number.
    pub attempt_number: u32,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: SendOutcome,
}

/// Proof that a dispatch was started. Outcomes are applied against it so that
/// a late reply cannot land on a newer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTicket {
    pub deliverable_id: DeliverableId,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
}
