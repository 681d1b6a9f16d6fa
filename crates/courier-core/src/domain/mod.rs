//! Domain model (ids, items, deliverables, outcomes, errors).

pub mod attempt;
pub mod deliverable;
pub mod errors;
pub mod ids;
pub mod item;
pub mod outcome;

pub use attempt::{AttemptTicket, RetryAttemptRecord};
pub use deliverable::{Deliverable, Payload};
pub use errors::{CourierError, ErrorKind};
pub use ids::{DeliverableId, ItemId};
pub use item::{ItemStatus, ScheduledItem, resolve};
pub use outcome::SendOutcome;
