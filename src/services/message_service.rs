//! # Message Service
//!
//! Creating a message validates it against its command, persists it in
//! `identifying_targets` and enqueues the first workflow step. Everything
//! else here is read access to messages, recipients and replies, plus
//! deletion.

use super::page_count;
use crate::config::{DeletionConfig, StorageConfig};
use crate::error::{CommanderError, CommanderResult};
use crate::logging::log_message_operation;
use crate::messaging::{WorkItem, WorkQueue};
use crate::models::{
    Message, MessageListPaginationKey, NewMessage, Page, Recipient, RecipientListPaginationKey,
    Reply, ReplyListPaginationKey, TargetType,
};
use crate::repositories::{CommandRepository, MessageRepository};
use crate::validation::validate_message;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub struct MessageService {
    commands: CommandRepository,
    messages: MessageRepository,
    queue: Arc<dyn WorkQueue>,
    storage: StorageConfig,
    deletion: DeletionConfig,
}

impl MessageService {
    pub fn new(
        commands: CommandRepository,
        messages: MessageRepository,
        queue: Arc<dyn WorkQueue>,
        storage: StorageConfig,
        deletion: DeletionConfig,
    ) -> Self {
        Self {
            commands,
            messages,
            queue,
            storage,
            deletion,
        }
    }

    #[instrument(skip_all, fields(command_id = %new_message.command_id))]
    pub async fn create(&self, new_message: NewMessage) -> CommanderResult<Message> {
        let command = self
            .commands
            .get(&new_message.command_id)
            .await?
            .ok_or_else(|| {
                CommanderError::not_found(format!("command {}", new_message.command_id))
            })?;

        let message = Message::from_new(Uuid::new_v4().to_string(), new_message);
        validate_message(&message, &command)?;
        self.messages.save_message(&message).await?;
        self.queue
            .send(&WorkItem::message_step(message.clone(), command), None)
            .await?;

        log_message_operation(
            "message_created",
            &message.id,
            Some(&message.command_id),
            message.status.as_str(),
            None,
        );
        Ok(message)
    }

    pub async fn get(&self, message_id: &str) -> CommanderResult<Message> {
        self.messages.require_message(message_id).await
    }

    /// A command's messages, oldest first
    pub async fn list(
        &self,
        command_id: &str,
        pagination: Option<&MessageListPaginationKey>,
        count: Option<usize>,
    ) -> CommanderResult<Page<Message, MessageListPaginationKey>> {
        let count = page_count(count, self.storage.default_list_count);
        self.messages
            .list_messages(command_id, pagination, count)
            .await
    }

    pub async fn list_recipients(
        &self,
        message_id: &str,
        pagination: Option<&RecipientListPaginationKey>,
        count: Option<usize>,
    ) -> CommanderResult<Page<Recipient, RecipientListPaginationKey>> {
        self.messages.require_message(message_id).await?;
        let count = page_count(count, self.storage.default_list_count);
        self.messages
            .list_recipients(message_id, pagination, count)
            .await
    }

    pub async fn get_recipient(
        &self,
        message_id: &str,
        target_type: TargetType,
        target_id: &str,
    ) -> CommanderResult<Recipient> {
        self.messages
            .get_recipient(message_id, target_type, target_id)
            .await?
            .ok_or_else(|| {
                CommanderError::not_found(format!(
                    "{target_type} recipient {target_id} of message {message_id}"
                ))
            })
    }

    /// Replies from one device, in arrival order
    pub async fn list_replies(
        &self,
        message_id: &str,
        device_name: &str,
        pagination: Option<&ReplyListPaginationKey>,
        count: Option<usize>,
    ) -> CommanderResult<Page<Reply, ReplyListPaginationKey>> {
        self.get_recipient(message_id, TargetType::Device, device_name)
            .await?;
        let count = page_count(count, self.storage.default_list_count);
        self.messages
            .list_replies(message_id, device_name, pagination, count)
            .await
    }

    /// Delete a message together with its recipients and replies
    #[instrument(skip(self))]
    pub async fn delete_message(&self, message_id: &str) -> CommanderResult<()> {
        self.messages.require_message(message_id).await?;
        self.messages
            .delete_message(
                message_id,
                self.deletion.page_size,
                self.deletion.max_concurrency,
            )
            .await?;
        Ok(())
    }
}
