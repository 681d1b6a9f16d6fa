//! ScriptedSender - 結果を台本どおりに返す Sender
//!
//! payload の `"key"` フィールドごとに SendOutcome のキューを持つ。
//! 台本が尽きたら Success を返す。呼び出し順と、key ごとの同時実行数の
//! 最大値を記録するので、二重送信の検出にも使える。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Payload, SendOutcome};
use crate::ports::Sender;

#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<String, VecDeque<SendOutcome>>,
    calls: Vec<String>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct ScriptedSender {
    state: Mutex<ScriptState>,
    delay: Option<Duration>,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send sleeps for `delay` before replying.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            delay: Some(delay),
        }
    }

    /// Queue outcomes for payloads whose `"key"` equals `key`.
    pub async fn script(&self, key: &str, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.state
            .lock()
            .await
            .scripts
            .entry(key.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Keys in the order `send` was called.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|k| k.as_str() == key)
            .count()
    }

    /// Highest number of overlapping sends observed for `key`.
    pub async fn max_in_flight(&self, key: &str) -> usize {
        self.state
            .lock()
            .await
            .max_in_flight
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn key_of(payload: &Payload) -> String {
        payload
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl Sender for ScriptedSender {
    async fn send(&self, payload: &Payload) -> SendOutcome {
        let key = Self::key_of(payload);
        let outcome = {
            let mut state = self.state.lock().await;
            state.calls.push(key.clone());
            let current = {
                let n = state.in_flight.entry(key.clone()).or_default();
                *n += 1;
                *n
            };
            let max = state.max_in_flight.entry(key.clone()).or_default();
            *max = (*max).max(current);
            state
                .scripts
                .get_mut(&key)
                .and_then(|q| q.pop_front())
                .unwrap_or(SendOutcome::Success)
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if let Some(n) = state.in_flight.get_mut(&key) {
            *n = n.saturating_sub(1);
        }
        outcome
    }
}
