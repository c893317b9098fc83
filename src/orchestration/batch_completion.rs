//! # Batch Completion Accounting
//!
//! The only place a message's final dispatch status is decided. Batches may
//! complete in any order and concurrently; correctness comes from an atomic
//! counter plus conditional status writes rather than locking.
//!
//! A failing batch writes `failed` *before* it is counted, so whichever
//! batch performs the final count always observes every earlier failure.
//! Each batch index is counted at most once, and settling re-runs from the
//! stored counters, so a redelivered batch can finish a settle that an
//! earlier attempt was interrupted in.

use crate::error::{CommanderError, CommanderResult};
use crate::models::{Command, Message};
use crate::repositories::message_repository::STATUS_FIELD;
use crate::repositories::MessageRepository;
use crate::state_machine::MessageStatus;
use crate::storage::AttributeCondition;
use tracing::{debug, info, instrument};

pub struct BatchCompletion {
    messages: MessageRepository,
}

impl BatchCompletion {
    pub fn new(messages: MessageRepository) -> Self {
        Self { messages }
    }

    /// Account for one finished batch; returns the message status afterwards
    #[instrument(skip_all, fields(message_id = %batch.id, batch_index = ?batch.batch_index, failed = error.is_some()))]
    pub async fn complete(
        &self,
        batch: &Message,
        command: &Command,
        error: Option<&CommanderError>,
    ) -> CommanderResult<MessageStatus> {
        let failed_targets = batch.failed_target_count();
        crate::logging::log_batch_outcome(
            &command.delivery_method.method_type().to_string(),
            &batch.id,
            batch.resolved_targets.len(),
            failed_targets,
        );

        let failure = match error {
            Some(error) => Some(error.to_string()),
            None if failed_targets > 0 => Some(format!(
                "{failed_targets} target(s) failed in batch"
            )),
            None => None,
        };
        if let Some(reason) = failure.as_deref() {
            self.messages
                .update_status(
                    &batch.id,
                    MessageStatus::Failed,
                    Some(reason),
                    Some(&Self::not_settled()),
                )
                .await?;
        }

        if self
            .messages
            .record_batch_complete(&batch.id, batch.batch_index)
            .await?
            .is_none()
        {
            debug!("Batch was already counted");
        }
        self.settle(&batch.id, command).await
    }

    /// Write the final status once every batch is counted
    ///
    /// A no-op until the counters meet, and for messages that have already
    /// settled. Returns the message status afterwards.
    #[instrument(skip(self, command))]
    pub async fn settle(&self, message_id: &str, command: &Command) -> CommanderResult<MessageStatus> {
        let current = self.messages.require_message(message_id).await?;
        if current.batches_complete < current.batches_total || !current.status.is_dispatching() {
            return Ok(current.status);
        }

        let final_status = if command.delivery_method.expect_reply() {
            MessageStatus::AwaitingReplies
        } else {
            MessageStatus::Success
        };
        if self
            .messages
            .update_status(
                message_id,
                final_status,
                None,
                Some(&MessageRepository::dispatching()),
            )
            .await?
        {
            info!(status = %final_status, batches_total = current.batches_total, "✅ All batches complete");
            Ok(final_status)
        } else {
            let current = self.messages.require_message(message_id).await?;
            Ok(current.status)
        }
    }

    /// Guard for failure writes: never overwrite a settled status
    pub(crate) fn not_settled() -> AttributeCondition {
        AttributeCondition::not_in(
            STATUS_FIELD,
            [
                MessageStatus::Success.as_str(),
                MessageStatus::AwaitingReplies.as_str(),
                MessageStatus::Failed.as_str(),
            ],
        )
    }
}
