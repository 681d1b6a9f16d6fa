//! Outcome model: what the Sender reports back for one dispatch.
//!
//! Classification into transient/permanent is owned by the Sender. The engine
//! never inspects reasons to reclassify a failure.

use serde::{Deserialize, Serialize};

use super::errors::CourierError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum SendOutcome {
    Success,

    /// Expected to succeed if retried later (timeout, rate limit, ...).
    TransientFailure(String),

    /// Will not succeed on retry (invalid recipient, rejected template, ...).
    PermanentFailure(String),
}

impl SendOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        SendOutcome::TransientFailure(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        SendOutcome::PermanentFailure(reason.into())
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SendOutcome::Success => None,
            SendOutcome::TransientFailure(r) | SendOutcome::PermanentFailure(r) => Some(r),
        }
    }

    /// The failure as an error value, for callers that prefer `Result`.
    pub fn into_result(self) -> Result<(), CourierError> {
        match self {
            SendOutcome::Success => Ok(()),
            SendOutcome::TransientFailure(r) => Err(CourierError::TransientSendFailure(r)),
            SendOutcome::PermanentFailure(r) => Err(CourierError::PermanentSendFailure(r)),
        }
    }
}
