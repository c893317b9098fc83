//! Work items carried by the queue.
//!
//! Each item drives exactly one orchestration step. A `MessageStep` carries
//! the message (with `resolved_targets` narrowed to one batch, plus the
//! batch index and any provisioning handles, once batching has happened)
//! together with its command, so a step never re-reads the command
//! definition mid-workflow. Status and counters on the carried message are
//! a snapshot; the step re-reads them from storage.

use crate::models::{Command, Message};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{MessagingError, MessagingResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkItem {
    MessageStep {
        message: Box<Message>,
        command: Box<Command>,
    },
    DeleteCommand {
        command_id: String,
    },
}

impl WorkItem {
    pub fn message_step(message: Message, command: Command) -> Self {
        Self::MessageStep {
            message: Box::new(message),
            command: Box::new(command),
        }
    }

    pub fn delete_command(command_id: impl Into<String>) -> Self {
        Self::DeleteCommand {
            command_id: command_id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageStep { .. } => "message_step",
            Self::DeleteCommand { .. } => "delete_command",
        }
    }

    pub fn to_body(&self) -> MessagingResult<Value> {
        serde_json::to_value(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }
}

/// A work item claimed from the queue, invisible to other consumers until
/// its visibility timeout lapses or it is deleted
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedWorkItem {
    pub receipt: i64,
    pub receive_count: u32,
    pub body: Value,
}

impl ReceivedWorkItem {
    pub fn decode(&self) -> MessagingResult<WorkItem> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}
