//! Topic delivery: publish to a per-device or shared pub/sub topic.

use super::{build_payload, failure_message, mint_correlation_id, DeliveryOutcome, DeliveryStrategy};
use crate::config::DeliveryConfig;
use crate::correlation::ReplyTopics;
use crate::error::{CommanderError, CommanderResult};
use crate::fleet::DevicePublisher;
use crate::models::{Command, DeliveryMethod, Message, TargetType, TopicDeliveryMethod};
use crate::repositories::MessageRepository;
use crate::state_machine::RecipientStatus;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct TopicDelivery {
    publisher: Arc<dyn DevicePublisher>,
    messages: MessageRepository,
    config: DeliveryConfig,
}

impl TopicDelivery {
    pub fn new(
        publisher: Arc<dyn DevicePublisher>,
        messages: MessageRepository,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            publisher,
            messages,
            config,
        }
    }

    /// One unaddressed publish; the topic cannot carry replies or targets
    async fn publish_shared(
        &self,
        message: &Message,
        command: &Command,
        topic: &TopicDeliveryMethod,
        payload: Value,
    ) -> CommanderResult<DeliveryOutcome> {
        if topic.expect_reply {
            return Err(CommanderError::validation(format!(
                "shared topic '{}' cannot expect replies",
                topic.topic
            )));
        }
        if !message.resolved_targets.is_empty() {
            return Err(CommanderError::validation(format!(
                "shared topic '{}' cannot be addressed to targets",
                topic.topic
            )));
        }

        let envelope = json!({
            "operation": command.operation,
            "payload": payload,
        });
        self.publisher
            .publish(&topic.topic, &envelope, self.config.publish_qos)
            .await?;
        info!(message_id = %message.id, topic = %topic.topic, "📤 Published to shared topic");
        Ok(DeliveryOutcome::Dispatched)
    }
}

#[async_trait]
impl DeliveryStrategy for TopicDelivery {
    #[instrument(skip_all, fields(message_id = %message.id, batch_size = message.resolved_targets.len()))]
    async fn process(
        &self,
        message: &mut Message,
        command: &Command,
    ) -> CommanderResult<DeliveryOutcome> {
        let DeliveryMethod::Topic(topic) = &command.delivery_method else {
            return Err(CommanderError::UnsupportedMessageType {
                status: message.status.to_string(),
                delivery_method: command.delivery_method.method_type().to_string(),
            });
        };
        let payload = build_payload(
            command.payload_template.as_deref(),
            &message.payload_param_values,
        );

        if topic.is_shared() {
            return self.publish_shared(message, command, topic, payload).await;
        }

        for target in message.resolved_targets.iter_mut() {
            if target.status == RecipientStatus::Success {
                continue;
            }
            if target.target_type == TargetType::Group {
                target.mark_failed("group targets cannot receive topic deliveries");
                continue;
            }

            let correlation_id = mint_correlation_id();
            let device_topic = topic.device_topic(&target.id);
            let mut envelope = json!({
                "correlationId": correlation_id,
                "operation": command.operation,
                "payload": payload,
            });
            if topic.expect_reply {
                let topics = ReplyTopics::new(
                    &self.config.reply_topic_prefix,
                    &target.id,
                    &correlation_id,
                );
                envelope["topics"] = serde_json::to_value(topics)?;
            }

            match self
                .publisher
                .publish(&device_topic, &envelope, self.config.publish_qos)
                .await
            {
                Ok(()) => {
                    debug!(device = %target.id, topic = %device_topic, "📤 Published");
                    target.mark_success(Some(correlation_id));
                }
                Err(error) => {
                    warn!(device = %target.id, error = %error, "⚠️ Publish failed");
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
