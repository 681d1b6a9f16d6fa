//! Eligibility queue: min-heap of (eligible_at, enqueue order).
//!
//! The heap holds ids only. Entries can go stale (cancelled, already
//! dispatched); the scheduler re-checks the tracker under its lock before
//! dispatching, so a stale entry is simply dropped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::domain::DeliverableId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEntry {
    pub eligible_at: DateTime<Utc>,
    /// Position in original enqueue order. Tie-break for equal instants.
    pub seq: u64,
    pub id: DeliverableId,
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: earlier instant, then earlier enqueue, comes first
        other
            .eligible_at
            .cmp(&self.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<ReadyEntry>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ReadyEntry) {
        self.heap.push(entry);
    }

    /// Pop every entry whose instant has passed, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<ReadyEntry> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|e| e.eligible_at <= now) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|e| e.eligible_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
