//! In-process [`WorkQueue`] with delay and visibility timeout semantics.

use super::errors::{MessagingError, MessagingResult};
use super::queue::WorkQueue;
use super::work_item::{ReceivedWorkItem, WorkItem};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct QueuedEntry {
    body: Value,
    visible_at: Instant,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    entries: BTreeMap<i64, QueuedEntry>,
}

#[derive(Debug)]
pub struct InMemoryWorkQueue {
    name: String,
    state: Mutex<QueueState>,
}

impl InMemoryWorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Items still on the queue, visible or not
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Decoded snapshot of every queued item in enqueue order
    pub fn pending_items(&self) -> Vec<WorkItem> {
        self.state
            .lock()
            .entries
            .values()
            .filter_map(|entry| serde_json::from_value(entry.body.clone()).ok())
            .collect()
    }

    /// Enqueue an arbitrary body, bypassing [`WorkItem`] encoding
    pub fn send_raw(&self, body: Value) -> i64 {
        self.push(body, Duration::ZERO)
    }

    fn push(&self, body: Value, delay: Duration) -> i64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.insert(
            id,
            QueuedEntry {
                body,
                visible_at: Instant::now() + delay,
                receive_count: 0,
            },
        );
        id
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn send(&self, item: &WorkItem, delay: Option<Duration>) -> MessagingResult<i64> {
        let id = self.push(item.to_body()?, delay.unwrap_or_default());
        debug!(queue = %self.name, id, kind = item.kind(), "📤 Work item enqueued");
        Ok(id)
    }

    async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedWorkItem>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut received = Vec::new();
        for (id, entry) in state.entries.iter_mut() {
            if received.len() >= max {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            entry.visible_at = now + visibility_timeout;
            entry.receive_count += 1;
            received.push(ReceivedWorkItem {
                receipt: *id,
                receive_count: entry.receive_count,
                body: entry.body.clone(),
            });
        }
        Ok(received)
    }

    async fn delete(&self, receipt: i64) -> MessagingResult<()> {
        match self.state.lock().entries.remove(&receipt) {
            Some(_) => Ok(()),
            None => Err(MessagingError::queue_operation(
                self.name.clone(),
                "delete",
                format!("unknown receipt {receipt}"),
            )),
        }
    }
}
