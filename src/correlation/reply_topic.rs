//! Reply topics for per-device topic delivery.
//!
//! A dispatch that expects a reply embeds three topics in its payload:
//! `{prefix}/{deviceName}/{correlationId}/{accepted|rejected|reply}`.

use crate::error::{CommanderError, CommanderResult};
use crate::models::ReplyAction;
use serde::{Deserialize, Serialize};

/// The three topics a device may answer on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTopics {
    pub accepted: String,
    pub rejected: String,
    pub reply: String,
}

impl ReplyTopics {
    pub fn new(prefix: &str, device_name: &str, correlation_id: &str) -> Self {
        let base = format!("{}/{device_name}/{correlation_id}", prefix.trim_end_matches('/'));
        Self {
            accepted: format!("{base}/{}", ReplyAction::Accepted),
            rejected: format!("{base}/{}", ReplyAction::Rejected),
            reply: format!("{base}/{}", ReplyAction::Reply),
        }
    }
}

/// Device, correlation id and action recovered from an inbound reply topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReplyTopic {
    pub device_name: String,
    pub correlation_id: String,
    pub action: ReplyAction,
}

/// Parse a topic in the format `{prefix}/{deviceName}/{correlationId}/{action}`
///
/// # Examples
/// ```
/// use commander_core::correlation::parse_reply_topic;
/// use commander_core::models::ReplyAction;
///
/// let parsed = parse_reply_topic("cmd/replies", "cmd/replies/d1/abc/accepted").unwrap();
/// assert_eq!(parsed.device_name, "d1");
/// assert_eq!(parsed.action, ReplyAction::Accepted);
/// ```
pub fn parse_reply_topic(prefix: &str, topic: &str) -> CommanderResult<ParsedReplyTopic> {
    let prefix = prefix.trim_end_matches('/');
    let rest = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| {
            CommanderError::validation(format!(
                "Invalid reply topic '{topic}': expected prefix '{prefix}/'"
            ))
        })?;

    let parts: Vec<&str> = rest.split('/').collect();
    if parts.len() != 3 {
        return Err(CommanderError::validation(format!(
            "Invalid reply topic '{topic}': expected '{prefix}/{{deviceName}}/{{correlationId}}/{{action}}'"
        )));
    }

    let device_name = parts[0].trim();
    let correlation_id = parts[1].trim();
    if device_name.is_empty() {
        return Err(CommanderError::validation(
            "Device name cannot be empty in reply topic",
        ));
    }
    if correlation_id.is_empty() {
        return Err(CommanderError::validation(
            "Correlation id cannot be empty in reply topic",
        ));
    }
    let action = parts[2]
        .parse::<ReplyAction>()
        .map_err(CommanderError::validation)?;

    Ok(ParsedReplyTopic {
        device_name: device_name.to_string(),
        correlation_id: correlation_id.to_string(),
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_round_trip_through_parser() {
        let topics = ReplyTopics::new("cmd/replies/", "d1", "corr-1");
        assert_eq!(topics.rejected, "cmd/replies/d1/corr-1/rejected");

        let parsed = parse_reply_topic("cmd/replies", &topics.reply).unwrap();
        assert_eq!(parsed.device_name, "d1");
        assert_eq!(parsed.correlation_id, "corr-1");
        assert_eq!(parsed.action, ReplyAction::Reply);
    }

    #[test]
    fn test_wrong_prefix() {
        assert!(parse_reply_topic("cmd/replies", "other/d1/c/reply").is_err());
        assert!(parse_reply_topic("cmd/replies", "cmd/repliesx/d1/c/reply").is_err());
    }

    #[test]
    fn test_too_many_segments() {
        assert!(parse_reply_topic("cmd/replies", "cmd/replies/d1/c/reply/extra").is_err());
    }

    #[test]
    fn test_unknown_action() {
        let err = parse_reply_topic("cmd/replies", "cmd/replies/d1/c/delta").unwrap_err();
        assert_eq!(err.error_code(), "FAILED_VALIDATION");
    }

    #[test]
    fn test_empty_device() {
        assert!(parse_reply_topic("cmd/replies", "cmd/replies//c/reply").is_err());
    }
}
