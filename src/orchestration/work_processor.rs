//! # Work Item Processor
//!
//! Polls the work queue and runs each item as one step. Items are processed
//! concurrently up to `max_concurrent_items`. An item is deleted once its
//! step returns; items that fail to decode or whose step errors are left to
//! reappear after the visibility timeout.

use super::workflow::{StepOutcome, WorkflowOrchestrator};
use crate::config::QueueConfig;
use crate::error::CommanderResult;
use crate::messaging::{ReceivedWorkItem, WorkItem, WorkQueue};
use crate::services::CommandService;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

pub struct WorkItemProcessor {
    queue: Arc<dyn WorkQueue>,
    orchestrator: Arc<WorkflowOrchestrator>,
    commands: Arc<CommandService>,
    config: QueueConfig,
    permits: Arc<Semaphore>,
}

impl WorkItemProcessor {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        orchestrator: Arc<WorkflowOrchestrator>,
        commands: Arc<CommandService>,
        config: QueueConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_items.max(1)));
        Self {
            queue,
            orchestrator,
            commands,
            config,
            permits,
        }
    }

    /// Poll until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue.queue_name(), "🚀 Work item processor started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let processed = match self.poll_once().await {
                Ok(count) => count,
                Err(e) => {
                    error!(error = %e, "❌ Failed to receive work items");
                    0
                }
            };
            if processed == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(queue = %self.queue.queue_name(), "🛑 Work item processor stopped");
    }

    /// Process visible items until the queue yields none; returns how many ran
    pub async fn process_available(&self) -> CommanderResult<usize> {
        let mut total = 0;
        loop {
            let processed = self.poll_once().await?;
            if processed == 0 {
                return Ok(total);
            }
            total += processed;
        }
    }

    async fn poll_once(&self) -> CommanderResult<usize> {
        let received = self
            .queue
            .receive(self.config.receive_batch_size, self.config.visibility_timeout())
            .await?;
        let count = received.len();
        if count > 0 {
            debug!(count, "📥 Received work items");
        }
        join_all(received.into_iter().map(|item| self.handle(item))).await;
        Ok(count)
    }

    async fn handle(&self, received: ReceivedWorkItem) {
        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };

        let item = match received.decode() {
            Ok(item) => item,
            Err(e) => {
                warn!(
                    receipt = received.receipt,
                    receive_count = received.receive_count,
                    error = %e,
                    "⚠️ Undecodable work item left for redelivery"
                );
                return;
            }
        };

        let kind = item.kind();
        let result = match item {
            WorkItem::MessageStep { message, command } => self
                .orchestrator
                .process_step(*message, *command)
                .await
                .map(|outcome| {
                    if let StepOutcome::Failed(e) = outcome {
                        debug!(error = %e, "Step failed and was recorded");
                    }
                }),
            WorkItem::DeleteCommand { command_id } => self
                .commands
                .process_deletion(&command_id)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.delete(received.receipt).await {
                    error!(receipt = received.receipt, error = %e, "❌ Failed to delete work item");
                }
            }
            Err(e) => {
                error!(
                    kind,
                    receipt = received.receipt,
                    receive_count = received.receive_count,
                    error = %e,
                    "❌ Work item failed; leaving for redelivery"
                );
            }
        }
    }
}
