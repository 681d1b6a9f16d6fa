//! App - アプリケーション層
//!
//! ports を組み合わせて engine を組み立てる。
//!
//! # 主要コンポーネント
//! - **RetryScheduler**: 配送レコードの dispatch / retry / timeout 回収
//! - **StatusResolver**: 公開予約アイテムの Scheduled / Live 判定
//! - **SchedulerConfig**: 上記の設定値

pub mod config;
pub mod scheduler;
pub mod status;

// 主要な型を再エクスポート
pub use self::config::SchedulerConfig;
pub use self::scheduler::{DispatchBatch, RetryScheduler, SchedulerHandle};
pub use self::status::{StatusPartition, StatusResolver};
