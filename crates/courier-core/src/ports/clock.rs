//! Clock port - 時刻の抽象化
//!
//! - SystemClock（本番用）
//! - FixedClock（テスト用、set/advance で手動で進める）

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Clock は現在時刻を提供
///
/// # テスト容易性
/// - trait により時刻を差し替え可能
/// - テストでは FixedClock を使用し、実時間のタイマーに依存しない
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock. Shared via `Arc` between the test and the engine.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = guard.checked_add_signed(delta).unwrap_or(*guard);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}
