//! Impls - ports の開発・テスト用実装
//!
//! # 含まれる実装
//! - **InMemoryDeliverableStore** / **InMemoryItemStore**: HashMap ベースの store
//! - **ScriptedSender**: 台本どおりに SendOutcome を返す Sender
//!
//! # 将来の実装
//! - DB バックエンドの store は host 側のクレートで実装する

pub mod inmem_store;
pub mod scripted_sender;

pub use self::inmem_store::{InMemoryDeliverableStore, InMemoryItemStore};
pub use self::scripted_sender::ScriptedSender;
