//! # Delivery Strategies
//!
//! One [`DeliveryStrategy`] per delivery method. A strategy dispatches the
//! batch slice carried in `message.resolved_targets`, records each target's
//! outcome on the target itself and persists the updated recipients. Targets
//! that arrive already marked delivered are left as they are. A strategy
//! never decides the message's final status; batch completion does.

pub mod job;
pub mod shadow;
pub mod topic;

use crate::error::CommanderResult;
use crate::models::{Command, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

pub use job::JobDelivery;
pub use shadow::ShadowDelivery;
pub use topic::TopicDelivery;

/// Result of a dispatch that did not error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The batch was dispatched; per-target results are on the targets
    Dispatched,
    /// Dispatch was postponed and the work item re-enqueued
    Deferred,
}

#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    async fn process(
        &self,
        message: &mut Message,
        command: &Command,
    ) -> CommanderResult<DeliveryOutcome>;
}

/// Fresh token a device echoes back with its reply
pub fn mint_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Substitute every `${key}` in the command's template with the message's values
///
/// Tokens without a value stay as literal text. The result is parsed as
/// JSON when possible and otherwise carried as a string.
pub fn build_payload(template: Option<&str>, values: &BTreeMap<String, Value>) -> Value {
    let Some(template) = template else {
        return Value::Null;
    };
    let mut rendered = template.to_string();
    for (key, value) in values {
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&format!("${{{key}}}"), &replacement);
    }
    serde_json::from_str(&rendered).unwrap_or(Value::String(rendered))
}

/// `"{code}: {message}"` form recorded on a failed target
pub(crate) fn failure_message(error: &crate::fleet::FleetError) -> String {
    match error {
        crate::fleet::FleetError::Service { .. } => error.to_string(),
        other => format!("{}: {}", other.code(), other),
    }
}
