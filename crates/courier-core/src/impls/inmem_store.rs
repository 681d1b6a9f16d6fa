//! In-memory stores - 開発・テスト用
//!
//! - InMemoryDeliverableStore: DeliverableStore の HashMap 実装
//! - InMemoryItemStore: ItemStore の HashMap 実装

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{CourierError, Deliverable, DeliverableId, ItemId, ScheduledItem};
use crate::ports::{DeliverableStore, ItemStore};

#[derive(Debug, Default)]
pub struct InMemoryDeliverableStore {
    records: RwLock<HashMap<DeliverableId, Deliverable>>,
    unavailable: AtomicBool,
}

impl InMemoryDeliverableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `CourierError::Store`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), CourierError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CourierError::Store("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeliverableStore for InMemoryDeliverableStore {
    async fn save(&self, deliverable: &Deliverable) -> Result<(), CourierError> {
        self.check_available()?;
        self.records
            .write()
            .await
            .insert(deliverable.id, deliverable.clone());
        Ok(())
    }

    async fn get(&self, id: DeliverableId) -> Result<Option<Deliverable>, CourierError> {
        self.check_available()?;
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn load_non_terminal(&self) -> Result<Vec<Deliverable>, CourierError> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|d| !d.is_terminal())
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    items: RwLock<HashMap<ItemId, ScheduledItem>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, item: ScheduledItem) {
        self.items.write().await.insert(item.id, item);
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, id: ItemId) -> Result<Option<ScheduledItem>, CourierError> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<ScheduledItem>, CourierError> {
        let mut items: Vec<ScheduledItem> = self.items.read().await.values().cloned().collect();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }
}
