//! Errors - エラー型と分類

use std::time::Duration;

use thiserror::Error;

use super::ids::DeliverableId;
use crate::queue::DeliveryState;

/// ErrorKind は運用上の分類
///
/// - Transient: 時間をおけば成功しうる（リトライ推奨）
/// - Permanent: リトライしても無意味
/// - Infrastructure: store などの障害
/// - Caller: 呼び出し側のバグ（引数・状態遷移の誤り）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
    Caller,
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transient send failure: {0}")]
    TransientSendFailure(String),

    #[error("permanent send failure: {0}")]
    PermanentSendFailure(String),

    #[error("deliverable {id} stayed in flight for {elapsed:?} (timeout {timeout:?})")]
    SchedulerInternalTimeout {
        id: DeliverableId,
        elapsed: Duration,
        timeout: Duration,
    },

    #[error("cannot {action} deliverable {id} in state {from}")]
    InvalidTransition {
        id: DeliverableId,
        from: DeliveryState,
        action: &'static str,
    },

    #[error("stale outcome for deliverable {id}: attempt {attempt} is no longer in flight")]
    StaleOutcome { id: DeliverableId, attempt: u32 },

    #[error("deliverable not found: {0}")]
    NotFound(DeliverableId),

    #[error("deliverable already tracked: {0}")]
    DuplicateDeliverable(DeliverableId),

    #[error("store error: {0}")]
    Store(String),
}

impl CourierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::TransientSendFailure(_) | CourierError::SchedulerInternalTimeout { .. } => {
                ErrorKind::Transient
            }
            CourierError::PermanentSendFailure(_) => ErrorKind::Permanent,
            CourierError::Store(_) => ErrorKind::Infrastructure,
            CourierError::InvalidArgument(_)
            | CourierError::InvalidTransition { .. }
            | CourierError::StaleOutcome { .. }
            | CourierError::NotFound(_)
            | CourierError::DuplicateDeliverable(_) => ErrorKind::Caller,
        }
    }
}
