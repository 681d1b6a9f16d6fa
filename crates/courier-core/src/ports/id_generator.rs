//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース。timestamp 部分は Clock から取るので、
//!   FixedClock を使うと生成時刻が決定的になる。

use ulid::Ulid;

use crate::domain::{DeliverableId, ItemId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_deliverable_id(&self) -> DeliverableId;

    fn generate_item_id(&self) -> ItemId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_deliverable_id(&self) -> DeliverableId {
        DeliverableId::from(self.next_ulid())
    }

    fn generate_item_id(&self) -> ItemId {
        ItemId::from(self.next_ulid())
    }
}
