//! Status - 公開予約アイテムのステータス解決
//!
//! 状態は保存せず、問い合わせのたびに `activate_at` と現在時刻から導く。
//! Clock を差し替えればテストで任意の時点を再現できる。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{CourierError, ItemId, ItemStatus, ScheduledItem};
use crate::ports::{Clock, ItemStore};

/// Items split by derived status, each side in store order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusPartition {
    pub scheduled: Vec<ScheduledItem>,
    pub live: Vec<ScheduledItem>,
}

pub struct StatusResolver<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: ItemStore> StatusResolver<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// `Ok(None)` when the store has no such item.
    pub async fn status_of(&self, id: ItemId) -> Result<Option<ItemStatus>, CourierError> {
        let Some(item) = self.store.get(id).await? else {
            return Ok(None);
        };
        item.status(self.clock.now()).map(Some)
    }

    pub async fn time_until_live(&self, id: ItemId) -> Result<Option<Duration>, CourierError> {
        let item = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| CourierError::InvalidArgument(format!("unknown item {id}")))?;
        item.time_until_live(self.clock.now())
    }

    /// Every stored item, resolved against a single instant.
    pub async fn partition(&self) -> Result<StatusPartition, CourierError> {
        let now = self.clock.now();
        let mut out = StatusPartition::default();
        for item in self.store.list().await? {
            match item.status(now)? {
                ItemStatus::Scheduled => out.scheduled.push(item),
                ItemStatus::Live => out.live.push(item),
            }
        }
        Ok(out)
    }
}
