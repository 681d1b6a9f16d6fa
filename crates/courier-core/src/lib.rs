//! courier-core
//!
//! Scheduled publication status and retrying notification delivery.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, item, deliverable, outcome, attempt, errors）
//! - **queue**: 配送状態機械（DeliveryState, BackoffPolicy, DeliveryAttemptTracker, ReadyQueue）
//! - **ports**: 抽象化レイヤー（Clock, Sender, DeliverableStore, ItemStore, IdGenerator）
//! - **app**: RetryScheduler / StatusResolver / SchedulerConfig
//! - **impls**: 開発・テスト用実装（in-memory store, ScriptedSender）
//! - **observability**: 状態別カウント

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{RetryScheduler, SchedulerConfig, StatusResolver};
pub use domain::{CourierError, Deliverable, DeliverableId, ItemStatus, SendOutcome};
pub use queue::{BackoffPolicy, DeliveryState};
