//! Shadow delivery: write the operation into each device's named shadow.

use super::{build_payload, failure_message, mint_correlation_id, DeliveryOutcome, DeliveryStrategy};
use crate::config::DeliveryConfig;
use crate::error::CommanderResult;
use crate::fleet::ShadowClient;
use crate::models::{Command, Message, TargetType};
use crate::repositories::MessageRepository;
use crate::state_machine::RecipientStatus;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct ShadowDelivery {
    shadows: Arc<dyn ShadowClient>,
    messages: MessageRepository,
    config: DeliveryConfig,
}

impl ShadowDelivery {
    pub fn new(
        shadows: Arc<dyn ShadowClient>,
        messages: MessageRepository,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            shadows,
            messages,
            config,
        }
    }

    /// `{"state": {"desired": {operation: payload}}, "clientToken": correlationId}`
    pub fn shadow_document(operation: &str, payload: &Value, correlation_id: &str) -> Value {
        let mut desired = Map::new();
        desired.insert(operation.to_string(), payload.clone());
        json!({
            "state": { "desired": desired },
            "clientToken": correlation_id,
        })
    }
}

#[async_trait]
impl DeliveryStrategy for ShadowDelivery {
    #[instrument(skip_all, fields(message_id = %message.id, batch_size = message.resolved_targets.len()))]
    async fn process(
        &self,
        message: &mut Message,
        command: &Command,
    ) -> CommanderResult<DeliveryOutcome> {
        let payload = build_payload(
            command.payload_template.as_deref(),
            &message.payload_param_values,
        );

        for target in message.resolved_targets.iter_mut() {
            if target.status == RecipientStatus::Success {
                continue;
            }
            if target.target_type == TargetType::Group {
                target.mark_failed("group targets cannot receive shadow deliveries");
                continue;
            }

            let correlation_id = mint_correlation_id();
            let document = Self::shadow_document(&command.operation, &payload, &correlation_id);
            match self
                .shadows
                .update_thing_shadow(&target.id, &self.config.shadow_name, &document)
                .await
            {
                Ok(()) => {
                    debug!(device = %target.id, shadow = %self.config.shadow_name, "📤 Shadow updated");
                    target.mark_success(Some(correlation_id));
                }
                Err(error) => {
                    warn!(device = %target.id, error = %error, "⚠️ Shadow update failed");
                    target.mark_failed(failure_message(&error));
                }
            }
        }

        self.messages
            .save_recipients(&message.id, &message.resolved_targets)
            .await?;
        Ok(DeliveryOutcome::Dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_document_shape() {
        let doc = ShadowDelivery::shadow_document("reboot", &json!({"delay": 5}), "corr-1");
        assert_eq!(
            doc,
            json!({
                "state": {"desired": {"reboot": {"delay": 5}}},
                "clientToken": "corr-1"
            })
        );
    }
}
