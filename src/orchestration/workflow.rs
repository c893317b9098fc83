//! # Workflow Orchestrator
//!
//! Runs one workflow step for a work item: re-reads the message, selects
//! the actions for its stored `(status, delivery method)` and executes them
//! in order, stopping at the first failure or deferral.
//!
//! Work items are delivered at least once, so a step may be a replay:
//!
//! - a step for a message that is gone, or a pre-batching step for a message
//!   already partitioned, is dropped
//! - a batch that was already counted only re-attempts settling, which
//!   finishes a final status write an earlier attempt did not make
//! - targets already stored as delivered keep their correlation ids and are
//!   not dispatched again
//!
//! Failures are caught here. When the step includes batch completion, the
//! failure is accounted for there so batch counters stay consistent;
//! otherwise the message is failed directly. Errors from batch accounting
//! itself, or raised while recording a failure, escape to the caller and
//! leave the work item for redelivery.

use super::actions::{actions_for, WorkflowAction};
use super::batch_completion::BatchCompletion;
use super::batch_partitioner::BatchPartitioner;
use super::delivery::{DeliveryOutcome, DeliveryStrategy};
use super::provisioning::{ProvisioningMonitor, ProvisioningState};
use super::target_resolver::TargetResolver;
use crate::error::{CommanderError, CommanderResult};
use crate::logging::log_message_operation;
use crate::models::{Command, Message};
use crate::repositories::MessageRepository;
use crate::state_machine::{MessageStatus, RecipientStatus};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// How a workflow step ended
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Every action ran
    Completed,
    /// An action postponed the step and re-enqueued it
    Deferred,
    /// An action failed and the failure was recorded on the message
    Failed(CommanderError),
    /// The step had already been applied, or its message is gone
    Skipped,
}

enum ActionResult {
    Continue,
    Deferred,
}

pub struct WorkflowOrchestrator {
    resolver: TargetResolver,
    partitioner: BatchPartitioner,
    topic: Arc<dyn DeliveryStrategy>,
    shadow: Arc<dyn DeliveryStrategy>,
    job: Arc<dyn DeliveryStrategy>,
    provisioning: ProvisioningMonitor,
    completion: BatchCompletion,
    messages: MessageRepository,
}

impl WorkflowOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: TargetResolver,
        partitioner: BatchPartitioner,
        topic: Arc<dyn DeliveryStrategy>,
        shadow: Arc<dyn DeliveryStrategy>,
        job: Arc<dyn DeliveryStrategy>,
        provisioning: ProvisioningMonitor,
        completion: BatchCompletion,
        messages: MessageRepository,
    ) -> Self {
        Self {
            resolver,
            partitioner,
            topic,
            shadow,
            job,
            provisioning,
            completion,
            messages,
        }
    }

    #[instrument(skip_all, fields(message_id = %batch.id, batch_index = ?batch.batch_index))]
    pub async fn process_step(
        &self,
        batch: Message,
        command: Command,
    ) -> CommanderResult<StepOutcome> {
        let Some(stored) = self.messages.get_message(&batch.id).await? else {
            warn!("Message no longer exists; dropping step");
            return Ok(StepOutcome::Skipped);
        };
        let mut message = stored.joined_with_batch(batch);

        if message.batch_index.is_none() && message.status != MessageStatus::IdentifyingTargets {
            debug!(status = %message.status, "Targets already partitioned; dropping step");
            return Ok(StepOutcome::Skipped);
        }
        if message.batch_counted() {
            info!("Batch already counted; re-attempting settle");
            self.completion.settle(&message.id, &command).await?;
            return Ok(StepOutcome::Skipped);
        }

        let actions = actions_for(
            Self::step_status(&message),
            command.delivery_method.method_type(),
        );
        log_message_operation(
            "workflow_step",
            &message.id,
            Some(&command.id),
            message.status.as_str(),
            Some(&format!("{actions:?}")),
        );

        for action in &actions {
            match self.run_action(*action, &mut message, &command).await {
                Ok(ActionResult::Continue) => {}
                Ok(ActionResult::Deferred) => return Ok(StepOutcome::Deferred),
                // Accounting itself failed; redelivery retries the step
                Err(failure) if *action == WorkflowAction::CompleteBatch => return Err(failure),
                Err(failure) => {
                    error!(action = %action, error = %failure, "❌ Workflow action failed");
                    self.record_failure(&message, &command, &actions, &failure)
                        .await?;
                    return Ok(StepOutcome::Failed(failure));
                }
            }
        }
        Ok(StepOutcome::Completed)
    }

    /// Status the step's actions are chosen by
    ///
    /// A batch still uncounted on a failed message is delivered and counted
    /// like any other; the failure stays recorded.
    fn step_status(message: &Message) -> MessageStatus {
        match message.status {
            MessageStatus::Failed if message.batch_index.is_some() => MessageStatus::Sending,
            status => status,
        }
    }

    /// Replace batch targets with their stored state when already delivered
    async fn restore_delivered(&self, message: &mut Message) -> CommanderResult<()> {
        let stored = self
            .messages
            .get_recipients(&message.id, &message.resolved_targets)
            .await?;
        for target in message.resolved_targets.iter_mut() {
            if let Some(delivered) = stored.iter().find(|r| {
                r.id == target.id
                    && r.target_type == target.target_type
                    && r.status == RecipientStatus::Success
            }) {
                *target = delivered.clone();
            }
        }
        Ok(())
    }

    async fn run_action(
        &self,
        action: WorkflowAction,
        message: &mut Message,
        command: &Command,
    ) -> CommanderResult<ActionResult> {
        match action {
            WorkflowAction::ResolveTargets => {
                self.resolver.resolve(message, command).await?;
                Ok(ActionResult::Continue)
            }
            WorkflowAction::PartitionBatches => {
                self.partitioner.partition(message, command).await?;
                Ok(ActionResult::Continue)
            }
            WorkflowAction::TopicDispatch => self.dispatch(&self.topic, message, command).await,
            WorkflowAction::ShadowDispatch => self.dispatch(&self.shadow, message, command).await,
            WorkflowAction::JobDispatch => self.dispatch(&self.job, message, command).await,
            WorkflowAction::ProvisioningCheck => {
                match self.provisioning.check(message, command).await? {
                    ProvisioningState::Ready => Ok(ActionResult::Continue),
                    ProvisioningState::Pending => Ok(ActionResult::Deferred),
                }
            }
            WorkflowAction::CompleteBatch => {
                self.completion.complete(message, command, None).await?;
                Ok(ActionResult::Continue)
            }
            WorkflowAction::InvalidTransition => Err(CommanderError::UnsupportedMessageType {
                status: message.status.to_string(),
                delivery_method: command.delivery_method.method_type().to_string(),
            }),
        }
    }

    async fn dispatch(
        &self,
        strategy: &Arc<dyn DeliveryStrategy>,
        message: &mut Message,
        command: &Command,
    ) -> CommanderResult<ActionResult> {
        self.restore_delivered(message).await?;
        match strategy.process(message, command).await? {
            DeliveryOutcome::Dispatched => Ok(ActionResult::Continue),
            DeliveryOutcome::Deferred => Ok(ActionResult::Deferred),
        }
    }

    async fn record_failure(
        &self,
        message: &Message,
        command: &Command,
        actions: &[WorkflowAction],
        failure: &CommanderError,
    ) -> CommanderResult<()> {
        if actions.contains(&WorkflowAction::CompleteBatch) {
            self.completion
                .complete(message, command, Some(failure))
                .await?;
        } else {
            self.messages
                .update_status(
                    &message.id,
                    MessageStatus::Failed,
                    Some(&failure.to_string()),
                    Some(&BatchCompletion::not_settled()),
                )
                .await?;
        }
        log_message_operation(
            "workflow_failed",
            &message.id,
            Some(&command.id),
            MessageStatus::Failed.as_str(),
            Some(&failure.to_string()),
        );
        Ok(())
    }
}
