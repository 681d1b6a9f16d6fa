//! Ports - 抽象化レイヤー
//!
//! engine が外部と接する境界（Hexagonal Architecture の「ポート」）。
//! - Clock: 現在時刻
//! - Sender: 外部チャネルへの送信
//! - DeliverableStore: 配送レコードの永続化
//! - ItemStore: 公開予約コンテンツの読み取り
//! - IdGenerator: ID 生成

pub mod clock;
pub mod deliverable_store;
pub mod id_generator;
pub mod item_store;
pub mod sender;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::deliverable_store::DeliverableStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::item_store::ItemStore;
pub use self::sender::Sender;
