//! Input validation for commands and messages
//!
//! Structural rules that depend on the delivery method are checked here, at
//! creation time, so that dispatch never has to reject a malformed command.
//! Caller-supplied JSON is also bounded in size and depth.

use crate::error::{CommanderError, CommanderResult};
use crate::models::{Command, DeliveryMethod, Message, DEVICE_NAME_TOKEN};
use serde_json::Value;

/// Maximum allowed size for caller-supplied JSON (256KB)
const MAX_JSON_SIZE_BYTES: usize = 256 * 1024;

/// Maximum nesting depth for JSON objects/arrays
const MAX_JSON_DEPTH: usize = 10;

/// Maximum number of keys in a JSON object or items in an array
const MAX_JSON_KEYS: usize = 1000;

/// Names of every `${token}` placeholder in `template`, in order of appearance
pub fn template_tokens(template: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                tokens.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    tokens
}

/// Validate a command definition before it is saved
pub fn validate_command(command: &Command) -> CommanderResult<()> {
    if command.operation.trim().is_empty() {
        return Err(CommanderError::validation("operation must not be empty"));
    }

    if let DeliveryMethod::Topic(topic) = &command.delivery_method {
        if topic.topic.trim().is_empty() {
            return Err(CommanderError::validation("topic must not be empty"));
        }
        let device_token = &DEVICE_NAME_TOKEN[2..DEVICE_NAME_TOKEN.len() - 1];
        if let Some(token) = template_tokens(&topic.topic)
            .into_iter()
            .find(|token| *token != device_token)
        {
            return Err(CommanderError::validation(format!(
                "topic may only contain the {DEVICE_NAME_TOKEN} placeholder, found ${{{token}}}"
            )));
        }
        if topic.is_shared() && topic.expect_reply {
            return Err(CommanderError::validation(
                "a shared topic (no ${...} placeholder) cannot expect replies",
            ));
        }
    }

    let tokens = command
        .payload_template
        .as_deref()
        .map(template_tokens)
        .unwrap_or_default();
    for param in &command.payload_params {
        if param.trim().is_empty() {
            return Err(CommanderError::validation("payloadParams entries must not be empty"));
        }
        if !tokens.contains(&param.as_str()) {
            return Err(CommanderError::validation(format!(
                "payload param '{param}' does not appear in the payload template"
            )));
        }
    }

    if command.tags.keys().any(|k| k.trim().is_empty()) {
        return Err(CommanderError::validation("tag keys must not be empty"));
    }

    Ok(())
}

/// Validate a new message against the command it dispatches
pub fn validate_message(message: &Message, command: &Command) -> CommanderResult<()> {
    if !command.enabled {
        return Err(CommanderError::validation(format!(
            "command {} is disabled",
            command.id
        )));
    }

    for param in &command.payload_params {
        if !message.payload_param_values.contains_key(param) {
            return Err(CommanderError::validation(format!(
                "missing value for required payload param '{param}'"
            )));
        }
    }
    for value in message.payload_param_values.values() {
        validate_json_input(value)?;
    }
    if let Some(query) = message.targets.as_ref().and_then(|t| t.query.as_ref()) {
        validate_json_input(query)?;
    }

    if command.delivery_method.is_shared_topic() {
        if message.has_targets() {
            return Err(CommanderError::validation(
                "targets cannot be specified for a command using a shared topic",
            ));
        }
    } else if !message.has_targets() {
        return Err(CommanderError::validation("targets must be specified"));
    }

    Ok(())
}

/// Bound caller-supplied JSON in size and structure
pub fn validate_json_input(value: &Value) -> CommanderResult<()> {
    let serialized = serde_json::to_string(value)
        .map_err(|e| CommanderError::validation(format!("Invalid JSON structure: {e}")))?;

    if serialized.len() > MAX_JSON_SIZE_BYTES {
        return Err(CommanderError::validation(format!(
            "JSON payload too large: {} bytes (max: {})",
            serialized.len(),
            MAX_JSON_SIZE_BYTES
        )));
    }

    validate_json_depth(value, 0)
}

fn validate_json_depth(value: &Value, current_depth: usize) -> CommanderResult<()> {
    if current_depth > MAX_JSON_DEPTH {
        return Err(CommanderError::validation(format!(
            "JSON nesting too deep: {current_depth} (max: {MAX_JSON_DEPTH})"
        )));
    }

    match value {
        Value::Object(map) => {
            if map.len() > MAX_JSON_KEYS {
                return Err(CommanderError::validation(format!(
                    "Too many JSON keys: {} (max: {})",
                    map.len(),
                    MAX_JSON_KEYS
                )));
            }
            for val in map.values() {
                validate_json_depth(val, current_depth + 1)?;
            }
        }
        Value::Array(arr) => {
            if arr.len() > MAX_JSON_KEYS {
                return Err(CommanderError::validation(format!(
                    "JSON array too large: {} items (max: {})",
                    arr.len(),
                    MAX_JSON_KEYS
                )));
            }
            for val in arr {
                validate_json_depth(val, current_depth + 1)?;
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        JobDeliveryMethod, NewCommand, NewMessage, ShadowDeliveryMethod, Targets,
        TopicDeliveryMethod,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn command(delivery_method: DeliveryMethod) -> Command {
        Command::from_new(
            "c1",
            NewCommand {
                operation: "reboot".to_string(),
                payload_template: Some(r#"{"delay": ${delay}}"#.to_string()),
                payload_params: vec!["delay".to_string()],
                delivery_method,
                enabled: None,
                tags: BTreeMap::new(),
            },
        )
    }

    fn topic(topic: &str, expect_reply: bool) -> DeliveryMethod {
        DeliveryMethod::Topic(TopicDeliveryMethod {
            topic: topic.to_string(),
            expect_reply,
        })
    }

    fn message(targets: Option<Targets>, values: &[(&str, Value)]) -> Message {
        Message::from_new(
            "m1",
            NewMessage {
                command_id: "c1".to_string(),
                payload_param_values: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                targets,
            },
        )
    }

    #[test]
    fn test_template_tokens() {
        assert_eq!(
            template_tokens("a ${x} b ${y}${z} ${unterminated"),
            vec!["x", "y", "z"]
        );
        assert!(template_tokens("plain").is_empty());
    }

    #[test]
    fn test_shared_topic_rejects_expect_reply() {
        assert!(validate_command(&command(topic("fleet/broadcast", true))).is_err());
        assert!(validate_command(&command(topic("fleet/broadcast", false))).is_ok());
        assert!(validate_command(&command(topic("cmd/${deviceName}", true))).is_ok());
    }

    #[test]
    fn test_topic_rejects_unknown_placeholder() {
        let err = validate_command(&command(topic("cmd/${thingName}", false))).unwrap_err();
        assert_eq!(err.error_code(), "FAILED_VALIDATION");
    }

    #[test]
    fn test_params_must_appear_in_template() {
        let mut cmd = command(DeliveryMethod::Shadow(ShadowDeliveryMethod::default()));
        cmd.payload_params.push("mode".to_string());
        assert!(validate_command(&cmd).is_err());
    }

    #[test]
    fn test_message_requires_param_values() {
        let cmd = command(DeliveryMethod::Shadow(ShadowDeliveryMethod::default()));
        let missing = message(Some(Targets::things(["d1"])), &[]);
        assert!(validate_message(&missing, &cmd).is_err());

        let complete = message(Some(Targets::things(["d1"])), &[("delay", json!(5))]);
        assert!(validate_message(&complete, &cmd).is_ok());
    }

    #[test]
    fn test_message_target_rules() {
        let shared = command(topic("fleet/broadcast", false));
        let values = [("delay", json!(1))];
        assert!(validate_message(&message(None, &values), &shared).is_ok());
        assert!(validate_message(&message(Some(Targets::things(["d1"])), &values), &shared).is_err());

        let job = command(DeliveryMethod::Job(JobDeliveryMethod::default()));
        assert!(validate_message(&message(None, &values), &job).is_err());
    }

    #[test]
    fn test_disabled_command_rejected() {
        let mut cmd = command(DeliveryMethod::Shadow(ShadowDeliveryMethod::default()));
        cmd.enabled = false;
        let msg = message(Some(Targets::things(["d1"])), &[("delay", json!(1))]);
        assert!(validate_message(&msg, &cmd).is_err());
    }

    #[test]
    fn test_json_depth_limit() {
        let mut value = json!(1);
        for _ in 0..12 {
            value = json!({ "nested": value });
        }
        assert!(validate_json_input(&value).is_err());
    }
}
