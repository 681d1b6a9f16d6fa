//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type で型付けしています。
//! - 時刻でソート可能（生成順 ≒ 投入順）
//! - DeliverableId と ItemId は別の型なので混同できない

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID kind. Provides the Display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id. `T` only exists at compile time.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Build an id from a raw u128. Handy for fixtures where the value matters.
    pub fn from_u128(value: u128) -> Self {
        Self::from_ulid(Ulid::from(value))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Marker for outbound notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Deliverable {}

impl IdMarker for Deliverable {
    fn prefix() -> &'static str {
        "dlv-"
    }
}

/// Marker for scheduled content items (quotes, templates, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Item {}

impl IdMarker for Item {
    fn prefix() -> &'static str {
        "item-"
    }
}

/// Identifier of a Deliverable (one message awaiting a successful send).
pub type DeliverableId = Id<Deliverable>;

/// Identifier of a ScheduledItem.
pub type ItemId = Id<Item>;
