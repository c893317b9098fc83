//! # Target Resolver
//!
//! Expands a message's target specification into a deduplicated recipient
//! list and persists it before any dispatch. A replayed step finds the
//! persisted recipients and reuses them, so group membership changes after
//! the first resolution never alter an in-flight message.

use crate::error::{CommanderError, CommanderResult};
use crate::fleet::{FleetDirectory, ListThingsRequest};
use crate::models::{Command, Message, Recipient, TargetType};
use crate::repositories::MessageRepository;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct TargetResolver {
    directory: Arc<dyn FleetDirectory>,
    messages: MessageRepository,
}

impl TargetResolver {
    pub fn new(directory: Arc<dyn FleetDirectory>, messages: MessageRepository) -> Self {
        Self {
            directory,
            messages,
        }
    }

    /// Populate `message.resolved_targets`, persisting them on first resolution
    #[instrument(skip_all, fields(message_id = %message.id))]
    pub async fn resolve(&self, message: &mut Message, command: &Command) -> CommanderResult<()> {
        let existing = self.messages.all_recipients(&message.id).await?;
        if !existing.is_empty() {
            debug!(count = existing.len(), "Reusing previously resolved targets");
            message.resolved_targets = existing;
            return Ok(());
        }

        let resolved = self.expand(message, command).await?;
        if resolved.is_empty() && !command.delivery_method.is_shared_topic() {
            return Err(CommanderError::validation("no targets resolved"));
        }

        self.messages.save_recipients(&message.id, &resolved).await?;
        info!(count = resolved.len(), "✅ Targets resolved");
        message.resolved_targets = resolved;
        Ok(())
    }

    async fn expand(&self, message: &Message, command: &Command) -> CommanderResult<Vec<Recipient>> {
        let Some(targets) = message.targets.as_ref() else {
            return Ok(Vec::new());
        };

        let keep_unexpanded_groups = !command.delivery_method.requires_devices();
        let mut request = ListThingsRequest {
            query: targets.query.clone(),
            ..ListThingsRequest::default()
        };
        let mut groups = Vec::new();
        if let Some(aws) = targets.aws_iot.as_ref() {
            request.thing_names = aws.thing_names.clone();
            for group in &aws.thing_group_names {
                if group.expand || !keep_unexpanded_groups {
                    request.thing_group_names.push(group.name.clone());
                } else {
                    groups.push(group.name.clone());
                }
            }
        }

        let devices = if request.is_empty() {
            Vec::new()
        } else {
            self.directory.list_things(&request).await?
        };

        let mut seen = HashSet::new();
        let recipients = devices
            .into_iter()
            .map(Recipient::device)
            .chain(groups.into_iter().map(Recipient::group))
            .filter(|r| seen.insert((r.target_type, r.id.clone())))
            .collect::<Vec<_>>();
        debug!(
            devices = recipients.iter().filter(|r| r.target_type == TargetType::Device).count(),
            groups = recipients.iter().filter(|r| r.target_type == TargetType::Group).count(),
            "Targets expanded"
        );
        Ok(recipients)
    }
}
