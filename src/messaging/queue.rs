//! Queue abstraction used for batch fan-out and delayed retries.

use super::errors::MessagingResult;
use super::work_item::{ReceivedWorkItem, WorkItem};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Enqueue an item, optionally hidden from consumers for `delay`
    async fn send(&self, item: &WorkItem, delay: Option<Duration>) -> MessagingResult<i64>;

    /// Claim up to `max` visible items, hiding them for `visibility_timeout`
    async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedWorkItem>>;

    /// Acknowledge a claimed item so it is never redelivered
    async fn delete(&self, receipt: i64) -> MessagingResult<()>;
}
