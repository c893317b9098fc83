//! # Command Service
//!
//! Create, update, read, list and delete commands. Deletion is asynchronous:
//! the caller's request only enqueues a work item, and the processor later
//! removes every message of the command before the command itself.
//!
//! ```rust
//! use commander_core::config::{DeletionConfig, StorageConfig};
//! use commander_core::messaging::InMemoryWorkQueue;
//! use commander_core::models::{DeliveryMethod, NewCommand, ShadowDeliveryMethod};
//! use commander_core::repositories::{CommandRepository, MessageRepository};
//! use commander_core::services::CommandService;
//! use commander_core::storage::{InMemoryItemStore, StorageDao};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let dao = StorageDao::new(Arc::new(InMemoryItemStore::new()), StorageConfig::default());
//! let commands = CommandService::new(
//!     CommandRepository::new(dao.clone()),
//!     MessageRepository::new(dao),
//!     Arc::new(InMemoryWorkQueue::new("commands")),
//!     StorageConfig::default(),
//!     DeletionConfig::default(),
//! );
//! let command = commands
//!     .create(NewCommand {
//!         operation: "reboot".to_string(),
//!         payload_template: None,
//!         payload_params: Vec::new(),
//!         delivery_method: DeliveryMethod::Shadow(ShadowDeliveryMethod { expect_reply: false }),
//!         enabled: None,
//!         tags: BTreeMap::from([("site".to_string(), "north".to_string())]),
//!     })
//!     .await?;
//! assert!(command.enabled);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

use super::page_count;
use crate::config::{DeletionConfig, StorageConfig};
use crate::error::{CommanderError, CommanderResult};
use crate::messaging::{WorkItem, WorkQueue};
use crate::models::{Command, CommandListPaginationKey, CommandPatch, NewCommand, Page};
use crate::repositories::{CommandRepository, MessageRepository};
use crate::validation::validate_command;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct CommandService {
    commands: CommandRepository,
    messages: MessageRepository,
    queue: Arc<dyn WorkQueue>,
    storage: StorageConfig,
    deletion: DeletionConfig,
}

impl CommandService {
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

    #[instrument(skip_all, fields(operation = %new_command.operation))]
    pub async fn create(&self, new_command: NewCommand) -> CommanderResult<Command> {
        let command = Command::from_new(Uuid::new_v4().to_string(), new_command);
        validate_command(&command)?;
        self.commands.save(&command).await?;
        info!(command_id = %command.id, "✅ Command created");
        Ok(command)
    }

    /// Merge `patch` onto the stored command and persist it
    #[instrument(skip(self, patch))]
    pub async fn update(&self, command_id: &str, patch: CommandPatch) -> CommanderResult<Command> {
        let mut command = self.require(command_id).await?;
        let previous_tags = command.tags.clone();
        command.apply_patch(patch);
        validate_command(&command)?;
        self.commands.update(&command, &previous_tags).await?;
        info!(command_id = %command.id, "✅ Command updated");
        Ok(command)
    }

    pub async fn get(&self, command_id: &str) -> CommanderResult<Command> {
        self.require(command_id).await
    }

    /// Fetch several commands; unknown ids are skipped
    pub async fn get_many(&self, command_ids: &[String]) -> CommanderResult<Vec<Command>> {
        self.commands.get_many(command_ids).await
    }

    pub async fn list(
        &self,
        tags: Option<&BTreeMap<String, String>>,
        pagination: Option<&CommandListPaginationKey>,
        count: Option<usize>,
    ) -> CommanderResult<Page<Command, CommandListPaginationKey>> {
        let count = page_count(count, self.storage.default_list_count);
        self.commands.list(tags, pagination, count).await
    }

    /// Queue the command for deletion
    #[instrument(skip(self))]
    pub async fn delete_command(&self, command_id: &str) -> CommanderResult<()> {
        self.require(command_id).await?;
        self.queue
            .send(&WorkItem::delete_command(command_id), None)
            .await?;
        info!(command_id = %command_id, "📤 Command deletion queued");
        Ok(())
    }

    /// Delete every message of the command, then the command and its tags
    ///
    /// Safe to replay: a command that is already gone is treated as deleted.
    #[instrument(skip(self))]
    pub async fn process_deletion(&self, command_id: &str) -> CommanderResult<usize> {
        let mut deleted_messages = 0;
        loop {
            // Deleted messages drop out of the listing, so the first page is always fresh
            let page = self
                .messages
                .list_messages(command_id, None, self.deletion.page_size)
                .await?;
            if page.items.is_empty() {
                break;
            }
            for message in &page.items {
                self.messages
                    .delete_message(
                        &message.id,
                        self.deletion.page_size,
                        self.deletion.max_concurrency,
                    )
                    .await?;
                deleted_messages += 1;
            }
        }

        self.commands.delete(command_id).await?;
        info!(command_id = %command_id, deleted_messages, "🗑️ Command deleted");
        Ok(deleted_messages)
    }

    async fn require(&self, command_id: &str) -> CommanderResult<Command> {
        self.commands
            .get(command_id)
            .await?
            .ok_or_else(|| CommanderError::not_found(format!("command {command_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryWorkQueue;
    use crate::models::{DeliveryMethod, ShadowDeliveryMethod, TopicDeliveryMethod};
    use crate::storage::{InMemoryItemStore, StorageDao};

    fn service() -> (CommandService, Arc<InMemoryWorkQueue>) {
        let dao = StorageDao::new(Arc::new(InMemoryItemStore::new()), StorageConfig::default());
        let queue = Arc::new(InMemoryWorkQueue::new("test"));
        let service = CommandService::new(
            CommandRepository::new(dao.clone()),
            MessageRepository::new(dao),
            queue.clone(),
            StorageConfig::default(),
            DeletionConfig::default(),
        );
        (service, queue)
    }

    fn new_command(tags: &[(&str, &str)]) -> NewCommand {
        NewCommand {
            operation: "reboot".to_string(),
            payload_template: None,
            payload_params: Vec::new(),
            delivery_method: DeliveryMethod::Shadow(ShadowDeliveryMethod { expect_reply: true }),
            enabled: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_validates() {
        let (service, _) = service();
        let command = service.create(new_command(&[])).await.unwrap();
        assert!(!command.id.is_empty());
        assert_eq!(service.get(&command.id).await.unwrap(), command);

        let mut invalid = new_command(&[]);
        invalid.delivery_method = DeliveryMethod::Topic(TopicDeliveryMethod {
            topic: "broadcast".to_string(),
            expect_reply: true,
        });
        let err = service.create(invalid).await.unwrap_err();
        assert_eq!(err.error_code(), "FAILED_VALIDATION");
    }

    #[tokio::test]
    async fn test_update_rewrites_tag_index() {
        let (service, _) = service();
        let command = service.create(new_command(&[("site", "north")])).await.unwrap();
        service
            .update(
                &command.id,
                CommandPatch {
                    tags: Some(BTreeMap::from([("site".to_string(), "south".to_string())])),
                    ..CommandPatch::default()
                },
            )
            .await
            .unwrap();

        let north = BTreeMap::from([("site".to_string(), "north".to_string())]);
        let south = BTreeMap::from([("site".to_string(), "south".to_string())]);
        assert!(service.list(Some(&north), None, None).await.unwrap().items.is_empty());
        assert_eq!(service.list(Some(&south), None, None).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_command_is_not_found() {
        let (service, _) = service();
        let err = service
            .update("missing", CommandPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommanderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_enqueues_then_processes() {
        let (service, queue) = service();
        let command = service.create(new_command(&[("site", "north")])).await.unwrap();

        service.delete_command(&command.id).await.unwrap();
        assert_eq!(queue.pending_items(), vec![WorkItem::delete_command(&command.id)]);
        assert!(service.get(&command.id).await.is_ok());

        service.process_deletion(&command.id).await.unwrap();
        assert!(matches!(
            service.get(&command.id).await,
            Err(CommanderError::NotFound(_))
        ));
        let north = BTreeMap::from([("site".to_string(), "north".to_string())]);
        assert!(service.list(Some(&north), None, None).await.unwrap().items.is_empty());

        // Replay is harmless
        assert_eq!(service.process_deletion(&command.id).await.unwrap(), 0);
    }
}
