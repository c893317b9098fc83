//! # Response Correlator
//!
//! Appends inbound device replies to the reply log of the recipient that
//! owns the correlation id. Replies for unknown correlation ids are stale
//! and dropped without error. Reply arrival never changes message status.

use super::reply_topic::parse_reply_topic;
use crate::error::CommanderResult;
use crate::models::{Reply, ReplyAction};
use crate::repositories::MessageRepository;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct ResponseCorrelator {
    messages: MessageRepository,
    reply_topic_prefix: String,
}

impl ResponseCorrelator {
    pub fn new(messages: MessageRepository, reply_topic_prefix: impl Into<String>) -> Self {
        Self {
            messages,
            reply_topic_prefix: reply_topic_prefix.into(),
        }
    }

    /// Record a reply; `None` when no recipient holds the correlation id
    #[instrument(skip(self, payload))]
    pub async fn process_reply(
        &self,
        correlation_id: &str,
        device_name: &str,
        action: ReplyAction,
        payload: Option<Value>,
    ) -> CommanderResult<Option<Reply>> {
        let Some(owner) = self
            .messages
            .find_by_correlation(correlation_id, device_name)
            .await?
        else {
            debug!("Discarding reply for unknown correlation id");
            return Ok(None);
        };

        let reply = Reply {
            received_at: Utc::now(),
            action,
            payload,
        };
        self.messages
            .save_reply(&owner.message_id, &owner.recipient.id, &reply)
            .await?;
        info!(
            message_id = %owner.message_id,
            action = %action,
            "📋 Reply recorded"
        );
        Ok(Some(reply))
    }

    /// Parse an inbound reply topic and record the reply it carries
    pub async fn process_topic_reply(
        &self,
        topic: &str,
        payload: Option<Value>,
    ) -> CommanderResult<Option<Reply>> {
        let parsed = parse_reply_topic(&self.reply_topic_prefix, topic)?;
        self.process_reply(
            &parsed.correlation_id,
            &parsed.device_name,
            parsed.action,
            payload,
        )
        .await
    }
}
