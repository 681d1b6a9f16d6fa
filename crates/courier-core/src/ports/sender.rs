//! Sender port - 外部チャネル（WhatsApp など）への送信
//!
//! # 設計原則
//! - 並行に呼ばれても安全であること（Send + Sync）
//! - 失敗の分類（transient / permanent）は Sender の責務
//! - scheduler のループ内では呼ばれない（独立した task として実行）

use async_trait::async_trait;

use crate::domain::{Payload, SendOutcome};

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, payload: &Payload) -> SendOutcome;
}
