//! DeliverableStore port - 配送レコードの永続化
//!
//! プロセス再起動後に active set を復元するための正本（source of truth）。
//! engine はレコードを削除しない。終端状態をマークするだけ。

use async_trait::async_trait;

use crate::domain::{CourierError, Deliverable, DeliverableId};

#[async_trait]
pub trait DeliverableStore: Send + Sync {
    /// Insert or overwrite the record with the same id.
    async fn save(&self, deliverable: &Deliverable) -> Result<(), CourierError>;

    async fn get(&self, id: DeliverableId) -> Result<Option<Deliverable>, CourierError>;

    /// Every record that is not in a terminal state.
    async fn load_non_terminal(&self) -> Result<Vec<Deliverable>, CourierError>;
}
