//! Polling of ephemeral group provisioning tasks.
//!
//! Each overflowing batch carries its own task id on its work item. The poll
//! is a delayed re-enqueue of that work item, so a pending task never holds
//! a worker. Batches without a task pass straight through.

use crate::config::DeliveryConfig;
use crate::error::{CommanderError, CommanderResult};
use crate::fleet::{BulkProvisionStatus, BulkProvisioner};
use crate::messaging::{WorkItem, WorkQueue};
use crate::models::{Command, Message};
use crate::repositories::message_repository::STATUS_FIELD;
use crate::repositories::MessageRepository;
use crate::state_machine::MessageStatus;
use crate::storage::AttributeCondition;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What the orchestrator should do after a provisioning poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    /// Group membership is in place; continue to job dispatch
    Ready,
    /// Still running; the work item has been re-enqueued
    Pending,
}

pub struct ProvisioningMonitor {
    provisioner: Arc<dyn BulkProvisioner>,
    messages: MessageRepository,
    queue: Arc<dyn WorkQueue>,
    config: DeliveryConfig,
}

impl ProvisioningMonitor {
    pub fn new(
        provisioner: Arc<dyn BulkProvisioner>,
        messages: MessageRepository,
        queue: Arc<dyn WorkQueue>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            provisioner,
            messages,
            queue,
            config,
        }
    }

    #[instrument(skip_all, fields(message_id = %message.id, batch_index = ?message.batch_index))]
    pub async fn check(
        &self,
        message: &mut Message,
        command: &Command,
    ) -> CommanderResult<ProvisioningState> {
        let Some(task_id) = message.bulk_provisioning_task_id.clone() else {
            return Ok(ProvisioningState::Ready);
        };

        let task = self.provisioner.get_bulk_provision_task(&task_id).await?;
        match task.status {
            BulkProvisionStatus::Completed => {
                let condition = AttributeCondition::equals(
                    STATUS_FIELD,
                    MessageStatus::AwaitingProvisioning.as_str(),
                );
                if self
                    .messages
                    .update_status(&message.id, MessageStatus::Sending, None, Some(&condition))
                    .await?
                {
                    message.status = MessageStatus::Sending;
                }
                info!(task_id = %task_id, "✅ Ephemeral group provisioned");
                Ok(ProvisioningState::Ready)
            }
            BulkProvisionStatus::InProgress => {
                self.queue
                    .send(
                        &WorkItem::message_step(message.clone(), command.clone()),
                        Some(self.config.provisioning_poll_delay()),
                    )
                    .await?;
                debug!(task_id = %task_id, "Provisioning still in progress; poll re-enqueued");
                Ok(ProvisioningState::Pending)
            }
            status => Err(CommanderError::Provisioning(format!(
                "bulk provisioning task {task_id} ended {status}{}",
                task.message
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default()
            ))),
        }
    }
}
