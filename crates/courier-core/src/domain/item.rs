//! Scheduled content items and their lifecycle status.
//!
//! Status is never stored. It is a projection of `activate_at` against the
//! current instant and must be recomputed on every read.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CourierError;
use super::ids::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Activation instant is still in the future.
    Scheduled,
    /// Publicly visible.
    Live,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Scheduled => f.write_str("scheduled"),
            ItemStatus::Live => f.write_str("live"),
        }
    }
}

/// Map an activation instant to a status. The boundary is inclusive:
/// `activate_at == now` is already live.
pub fn resolve(activate_at: DateTime<Utc>, now: DateTime<Utc>) -> ItemStatus {
    if activate_at <= now {
        ItemStatus::Live
    } else {
        ItemStatus::Scheduled
    }
}

/// Any entity with an activation instant.
///
/// `activate_at` is optional on the wire because records coming from the
/// store may lack it; such records cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub id: ItemId,
    #[serde(default)]
    pub activate_at: Option<DateTime<Utc>>,
}

impl ScheduledItem {
    pub fn new(id: ItemId, activate_at: DateTime<Utc>) -> Self {
        Self {
            id,
            activate_at: Some(activate_at),
        }
    }

    fn activation(&self) -> Result<DateTime<Utc>, CourierError> {
        self.activate_at.ok_or_else(|| {
            CourierError::InvalidArgument(format!("item {} has no activate_at", self.id))
        })
    }

    pub fn status(&self, now: DateTime<Utc>) -> Result<ItemStatus, CourierError> {
        Ok(resolve(self.activation()?, now))
    }

    /// Remaining time before the item goes live. `None` once live.
    pub fn time_until_live(&self, now: DateTime<Utc>) -> Result<Option<Duration>, CourierError> {
        let activate_at = self.activation()?;
        if activate_at <= now {
            return Ok(None);
        }
        Ok((activate_at - now).to_std().ok())
    }
}
