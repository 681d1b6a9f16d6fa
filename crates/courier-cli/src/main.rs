use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_core::domain::{ItemId, Payload, ScheduledItem, SendOutcome};
use courier_core::impls::{InMemoryDeliverableStore, InMemoryItemStore};
use courier_core::ports::{Sender, SystemClock};
use courier_core::{BackoffPolicy, CourierError, RetryScheduler, SchedulerConfig, StatusResolver};

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    recipient: String,
    #[serde(default)]
    mode: String,
}

/// "flaky" は数回 transient で失敗、"reject" は即 permanent、それ以外は成功
struct DemoSender {
    remaining_failures: AtomicU32,
}

impl DemoSender {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Sender for DemoSender {
    async fn send(&self, payload: &Payload) -> SendOutcome {
        let p: NotificationPayload = match serde_json::from_value(payload.clone()) {
            Ok(p) => p,
            Err(e) => return SendOutcome::permanent(format!("json decode: {e}")),
        };

        match p.mode.as_str() {
            "reject" => SendOutcome::permanent(format!("recipient {} unsubscribed", p.recipient)),
            "flaky" => {
                let claimed = self.remaining_failures.fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |left| left.checked_sub(1),
                );
                if let Ok(left) = claimed {
                    return SendOutcome::transient(format!("gateway busy (left={left})"));
                }
                println!("delivered to {}", p.recipient);
                SendOutcome::Success
            }
            _ => {
                println!("delivered to {}", p.recipient);
                SendOutcome::Success
            }
        }
    }
}

fn load_config() -> Result<SchedulerConfig, CourierError> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| CourierError::InvalidArgument(format!("read {path}: {e}")))?;
            SchedulerConfig::from_json_str(&json)
        }
        // デモ用に backoff を短くする
        None => Ok(SchedulerConfig {
            poll_interval_ms: 50,
            backoff: BackoffPolicy::exponential(
                Duration::from_millis(0),
                2,
                Duration::from_secs(1),
            ),
            ..SchedulerConfig::default()
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), CourierError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 公開予約のステータス
    let clock = Arc::new(SystemClock);
    let items = Arc::new(InMemoryItemStore::new());
    let now = Utc::now();
    items
        .insert(ScheduledItem::new(ItemId::from_u128(1), now - chrono::Duration::minutes(10)))
        .await;
    items
        .insert(ScheduledItem::new(ItemId::from_u128(2), now + chrono::Duration::hours(2)))
        .await;
    let resolver = StatusResolver::new(items.clone(), clock.clone());
    let partition = resolver.partition().await?;
    println!(
        "items: live={} scheduled={}",
        partition.live.len(),
        partition.scheduled.len()
    );
    if let Some(wait) = resolver.time_until_live(ItemId::from_u128(2)).await? {
        println!("item 2 goes live in {}s", wait.as_secs());
    }

    // (B) scheduler を起動
    let config = load_config()?;
    info!(?config, "starting scheduler");
    let store = Arc::new(InMemoryDeliverableStore::new());
    let scheduler = RetryScheduler::new(
        config,
        clock.clone(),
        Arc::new(DemoSender::new(2)),
        store.clone(),
    )?;
    scheduler.rehydrate().await?;
    let handle = scheduler.spawn();

    // (C) 通知を投入
    let mut ids = Vec::new();
    for (recipient, mode) in [("alice", "flaky"), ("bob", "reject"), ("carol", "")] {
        let payload = serde_json::json!({ "recipient": recipient, "mode": mode });
        ids.push(scheduler.enqueue(payload).await?);
    }

    // (D) 全件が終端状態になるまでポーリング
    loop {
        if scheduler.counts_by_state().await.outstanding() == 0 {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    for id in ids {
        let Some(d) = scheduler.get(id).await else {
            warn!(deliverable_id = %id, "deliverable disappeared");
            continue;
        };
        println!(
            "final status: id={} state={} failed_attempts={} last_error={:?}",
            d.id, d.state, d.attempt_count, d.last_error
        );
        if let Some(summary) = d.failure_summary() {
            println!("  {summary}");
        }
        scheduler.acknowledge(id).await?;
    }
    println!("counts: {:?}", scheduler.counts_by_state().await);

    handle.shutdown_and_join().await;
    Ok(())
}
