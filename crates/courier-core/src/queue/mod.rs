//! Queue module: delivery state machine, backoff, per-record tracker and the
//! eligibility heap.

mod ready;
mod retry;
mod state;
mod tracker;

pub use ready::{ReadyEntry, ReadyQueue};
pub use retry::BackoffPolicy;
pub use state::DeliveryState;
pub use tracker::{CancelDisposition, DeliveryAttemptTracker, Transition};
