//! # Message Model
//!
//! One dispatch of a command against a target specification. The message
//! owns the workflow status, the batch progress counters and its resolved
//! targets (persisted separately as recipients).

use crate::state_machine::{MessageStatus, RecipientStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub command_id: String,
    #[serde(default)]
    pub payload_param_values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Targets>,
    /// Only the current batch's slice while a batch work item is in flight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_targets: Vec<Recipient>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default)]
    pub batches_total: u64,
    #[serde(default)]
    pub batches_complete: u64,
    /// Indexes of the batches already counted into `batches_complete`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_batches: Vec<u64>,
    /// Position of the batch a work item carries; absent on the message item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<u64>,
    /// Provisioning task of the batch's ephemeral group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_provisioning_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_group_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn from_new(id: impl Into<String>, new_message: NewMessage) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            command_id: new_message.command_id,
            payload_param_values: new_message.payload_param_values,
            targets: new_message.targets,
            resolved_targets: Vec::new(),
            status: MessageStatus::IdentifyingTargets,
            status_message: None,
            batches_total: 0,
            batches_complete: 0,
            completed_batches: Vec::new(),
            batch_index: None,
            bulk_provisioning_task_id: None,
            ephemeral_group_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_targets(&self) -> bool {
        self.targets.as_ref().is_some_and(Targets::is_specified)
    }

    pub fn failed_target_count(&self) -> usize {
        self.resolved_targets
            .iter()
            .filter(|t| t.status == RecipientStatus::Failed)
            .count()
    }

    /// Copy of this message carrying batch `index` with `slice` as its resolved targets
    pub fn with_batch(&self, index: u64, slice: &[Recipient]) -> Self {
        let mut batch = self.clone();
        batch.batch_index = Some(index);
        batch.resolved_targets = slice.to_vec();
        batch
    }

    /// Stored workflow state joined with the batch context a work item carries
    ///
    /// Status, counters and text come from `self`; the target slice, batch
    /// index and provisioning handles come from `batch`.
    pub fn joined_with_batch(mut self, batch: Message) -> Self {
        self.resolved_targets = batch.resolved_targets;
        self.batch_index = batch.batch_index;
        self.bulk_provisioning_task_id = batch.bulk_provisioning_task_id;
        self.ephemeral_group_name = batch.ephemeral_group_name;
        self
    }

    /// Whether this batch has already been counted into the progress counters
    pub fn batch_counted(&self) -> bool {
        self.batch_index
            .is_some_and(|index| self.completed_batches.contains(&index))
    }
}

/// Input for creating a message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub command_id: String,
    #[serde(default)]
    pub payload_param_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub targets: Option<Targets>,
}

/// Raw target specification as supplied by the caller
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Targets {
    #[serde(rename = "awsIoT", default, skip_serializing_if = "Option::is_none")]
    pub aws_iot: Option<AwsIotTargets>,
    /// Saved fleet index query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
}

impl Targets {
    pub fn things(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            aws_iot: Some(AwsIotTargets {
                thing_names: names.into_iter().map(Into::into).collect(),
                thing_group_names: Vec::new(),
            }),
            query: None,
        }
    }

    pub fn is_specified(&self) -> bool {
        let named = self
            .aws_iot
            .as_ref()
            .is_some_and(|t| !t.thing_names.is_empty() || !t.thing_group_names.is_empty());
        named || self.query.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsIotTargets {
    #[serde(default)]
    pub thing_names: Vec<String>,
    #[serde(default)]
    pub thing_group_names: Vec<ThingGroupTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingGroupTarget {
    pub name: String,
    #[serde(default)]
    pub expand: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Device,
    Group,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(Self::Device),
            "group" => Ok(Self::Group),
            _ => Err(format!("Invalid target type: {s}")),
        }
    }
}

/// One resolved target of a message and its delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    #[serde(default)]
    pub status: RecipientStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl Recipient {
    pub fn device(id: impl Into<String>) -> Self {
        Self::new(id, TargetType::Device)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(id, TargetType::Group)
    }

    fn new(id: impl Into<String>, target_type: TargetType) -> Self {
        Self {
            id: id.into(),
            target_type,
            status: RecipientStatus::Pending,
            status_message: None,
            correlation_id: None,
            job_id: None,
        }
    }

    pub fn mark_success(&mut self, correlation_id: Option<String>) {
        self.status = RecipientStatus::Success;
        self.status_message = None;
        self.correlation_id = correlation_id;
    }

    pub fn mark_failed(&mut self, status_message: impl Into<String>) {
        self.status = RecipientStatus::Failed;
        self.status_message = Some(status_message.into());
    }
}
