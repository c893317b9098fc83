//! # Command Model
//!
//! A command is a reusable operation template: the operation name devices
//! interpret, a payload template with `${token}` placeholders, and the
//! delivery method used to reach devices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder a per-device topic must contain
pub const DEVICE_NAME_TOKEN: &str = "${deviceName}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_template: Option<String>,
    #[serde(default)]
    pub payload_params: Vec<String>,
    pub delivery_method: DeliveryMethod,
    pub enabled: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Command {
    pub fn from_new(id: impl Into<String>, new_command: NewCommand) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            operation: new_command.operation,
            payload_template: new_command.payload_template,
            payload_params: new_command.payload_params,
            delivery_method: new_command.delivery_method,
            enabled: new_command.enabled.unwrap_or(true),
            tags: new_command.tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a partial update field by field
    ///
    /// Present fields replace the existing value wholesale; arrays and maps
    /// are never merged element-wise.
    pub fn apply_patch(&mut self, patch: CommandPatch) {
        if let Some(operation) = patch.operation {
            self.operation = operation;
        }
        if let Some(template) = patch.payload_template {
            self.payload_template = Some(template);
        }
        if let Some(params) = patch.payload_params {
            self.payload_params = params;
        }
        if let Some(delivery_method) = patch.delivery_method {
            self.delivery_method = delivery_method;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        self.updated_at = Utc::now();
    }
}

/// Input for creating a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommand {
    pub operation: String,
    #[serde(default)]
    pub payload_template: Option<String>,
    #[serde(default)]
    pub payload_params: Vec<String>,
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Partial update for a command
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPatch {
    pub operation: Option<String>,
    pub payload_template: Option<String>,
    pub payload_params: Option<Vec<String>>,
    pub delivery_method: Option<DeliveryMethod>,
    pub enabled: Option<bool>,
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethodType {
    Topic,
    Shadow,
    Job,
}

impl fmt::Display for DeliveryMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic => write!(f, "TOPIC"),
            Self::Shadow => write!(f, "SHADOW"),
            Self::Job => write!(f, "JOB"),
        }
    }
}

/// How a command reaches devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    Topic(TopicDeliveryMethod),
    Shadow(ShadowDeliveryMethod),
    Job(JobDeliveryMethod),
}

impl DeliveryMethod {
    pub fn method_type(&self) -> DeliveryMethodType {
        match self {
            Self::Topic(_) => DeliveryMethodType::Topic,
            Self::Shadow(_) => DeliveryMethodType::Shadow,
            Self::Job(_) => DeliveryMethodType::Job,
        }
    }

    pub fn expect_reply(&self) -> bool {
        match self {
            Self::Topic(topic) => topic.expect_reply,
            Self::Shadow(shadow) => shadow.expect_reply,
            Self::Job(job) => job.expect_reply,
        }
    }

    /// Whether dispatch needs individual devices rather than groups
    pub fn requires_devices(&self) -> bool {
        !matches!(self, Self::Job(_))
    }

    /// Shared-topic mode publishes once, unaddressed
    pub fn is_shared_topic(&self) -> bool {
        matches!(self, Self::Topic(topic) if topic.is_shared())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDeliveryMethod {
    pub topic: String,
    #[serde(default)]
    pub expect_reply: bool,
}

impl TopicDeliveryMethod {
    /// A topic without any `${...}` placeholder is shared by all devices
    pub fn is_shared(&self) -> bool {
        !self.topic.contains("${")
    }

    pub fn device_topic(&self, device_name: &str) -> String {
        self.topic.replace(DEVICE_NAME_TOKEN, device_name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowDeliveryMethod {
    #[serde(default)]
    pub expect_reply: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDeliveryMethod {
    #[serde(default)]
    pub expect_reply: bool,
    #[serde(default)]
    pub target_selection: TargetSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_url_config: Option<PresignedUrlConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_executions_rollout_config: Option<RolloutConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_config: Option<AbortConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_config: Option<TimeoutConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetSelection {
    #[default]
    Snapshot,
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    pub expires_in_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutConfig {
    pub maximum_per_minute: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exponential_rate: Option<ExponentialRolloutRate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExponentialRolloutRate {
    pub base_rate_per_minute: u32,
    pub increment_factor: f64,
    pub number_of_notified_things: Option<u32>,
    pub number_of_succeeded_things: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortConfig {
    pub criteria_list: Vec<AbortCriteria>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortCriteria {
    pub failure_type: String,
    pub action: String,
    pub threshold_percentage: f64,
    pub min_number_of_executed_things: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    pub in_progress_timeout_in_minutes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_command() -> Command {
        Command::from_new(
            "c1",
            NewCommand {
                operation: "reboot".to_string(),
                payload_template: Some(r#"{"delay":${delay}}"#.to_string()),
                payload_params: vec!["delay".to_string()],
                delivery_method: DeliveryMethod::Shadow(ShadowDeliveryMethod { expect_reply: true }),
                enabled: None,
                tags: BTreeMap::from([("site".to_string(), "north".to_string())]),
            },
        )
    }

    #[test]
    fn test_delivery_method_wire_format() {
        let method: DeliveryMethod = serde_json::from_value(json!({
            "type": "TOPIC",
            "topic": "cmd/${deviceName}/reboot",
            "expectReply": true
        }))
        .unwrap();
        assert_eq!(method.method_type(), DeliveryMethodType::Topic);
        assert!(method.expect_reply());
        assert!(!method.is_shared_topic());

        let job: DeliveryMethod = serde_json::from_value(json!({"type": "JOB"})).unwrap();
        assert!(!job.requires_devices());
        assert!(!job.expect_reply());
    }

    #[test]
    fn test_device_topic_substitution() {
        let topic = TopicDeliveryMethod {
            topic: "cmd/${deviceName}/ops".to_string(),
            expect_reply: false,
        };
        assert_eq!(topic.device_topic("d1"), "cmd/d1/ops");
    }

    #[test]
    fn test_new_command_defaults_to_enabled() {
        assert!(sample_command().enabled);
    }

    #[test]
    fn test_patch_replaces_arrays_and_maps() {
        let mut command = sample_command();
        command.apply_patch(CommandPatch {
            payload_params: Some(vec!["mode".to_string()]),
            tags: Some(BTreeMap::from([("kind".to_string(), "fw".to_string())])),
            ..CommandPatch::default()
        });

        assert_eq!(command.payload_params, vec!["mode"]);
        assert_eq!(command.tags.len(), 1);
        assert_eq!(command.tags.get("kind").map(String::as_str), Some("fw"));
        assert_eq!(command.operation, "reboot");
    }

    #[test]
    fn test_patch_can_change_delivery_variant() {
        let mut command = sample_command();
        command.apply_patch(CommandPatch {
            delivery_method: Some(DeliveryMethod::Job(JobDeliveryMethod::default())),
            ..CommandPatch::default()
        });
        assert_eq!(command.delivery_method.method_type(), DeliveryMethodType::Job);
    }
}
