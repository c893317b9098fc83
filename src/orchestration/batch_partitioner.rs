//! # Batch Partitioner
//!
//! Splits resolved targets into contiguous batches sized per delivery
//! method, records the batch total and fans out one work item per batch.
//! Batches are numbered from zero; the number is what completion counts.

use crate::config::DeliveryConfig;
use crate::error::CommanderResult;
use crate::messaging::{WorkItem, WorkQueue};
use crate::models::{Command, DeliveryMethodType, Message};
use crate::repositories::MessageRepository;
use crate::state_machine::MessageStatus;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct BatchPartitioner {
    messages: MessageRepository,
    queue: Arc<dyn WorkQueue>,
    config: DeliveryConfig,
}

/// Batch size configured for a delivery method
pub fn batch_size_for(config: &DeliveryConfig, method: DeliveryMethodType) -> usize {
    let size = match method {
        DeliveryMethodType::Topic => config.topic_batch_size,
        DeliveryMethodType::Shadow => config.shadow_batch_size,
        DeliveryMethodType::Job => config.job_batch_size,
    };
    size.max(1)
}

/// Number of batches for `target_count` targets; an empty target set is one empty batch
pub fn batch_count(target_count: usize, batch_size: usize) -> usize {
    target_count.div_ceil(batch_size.max(1)).max(1)
}

impl BatchPartitioner {
    pub fn new(messages: MessageRepository, queue: Arc<dyn WorkQueue>, config: DeliveryConfig) -> Self {
        Self {
            messages,
            queue,
            config,
        }
    }

    /// Persist progress counters, enter `sending`, then enqueue every batch
    ///
    /// Returns the number of batches enqueued; zero when a replay finds the
    /// message already partitioned.
    #[instrument(skip_all, fields(message_id = %message.id, targets = message.resolved_targets.len()))]
    pub async fn partition(&self, message: &Message, command: &Command) -> CommanderResult<usize> {
        let size = batch_size_for(&self.config, command.delivery_method.method_type());
        let total = batch_count(message.resolved_targets.len(), size);

        if !self.messages.start_sending(&message.id, total as u64).await? {
            warn!("Message already left identifying_targets; skipping partition");
            return Ok(0);
        }

        let mut template = message.clone();
        template.status = MessageStatus::Sending;
        template.batches_total = total as u64;
        template.batches_complete = 0;

        let batches: Vec<Message> = if message.resolved_targets.is_empty() {
            vec![template.with_batch(0, &[])]
        } else {
            message
                .resolved_targets
                .chunks(size)
                .zip(0u64..)
                .map(|(slice, index)| template.with_batch(index, slice))
                .collect()
        };

        for batch in batches {
            self.queue
                .send(&WorkItem::message_step(batch, command.clone()), None)
                .await?;
        }
        info!(batches = total, batch_size = size, "📤 Batches enqueued");
        Ok(total)
    }
}
