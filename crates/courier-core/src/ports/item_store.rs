//! ItemStore port - 公開予約されたコンテンツの読み取り専用アクセス

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{CourierError, ItemId, ScheduledItem};

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get(&self, id: ItemId) -> Result<Option<ScheduledItem>, CourierError>;

    async fn list(&self) -> Result<Vec<ScheduledItem>, CourierError>;
}

#[async_trait]
impl<T: ItemStore + ?Sized> ItemStore for Arc<T> {
    async fn get(&self, id: ItemId) -> Result<Option<ScheduledItem>, CourierError> {
        (**self).get(id).await
    }

    async fn list(&self) -> Result<Vec<ScheduledItem>, CourierError> {
        (**self).list().await
    }
}
