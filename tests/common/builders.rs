//! Builders for commands and messages used across integration tests.

use commander_core::models::{
    DeliveryMethod, JobDeliveryMethod, NewCommand, NewMessage, ShadowDeliveryMethod, Targets,
    TopicDeliveryMethod,
};
use commander_core::test_helpers::TestSystem;
use commander_core::{Command, Message, MessageStatus};
use std::collections::BTreeMap;

pub fn shadow_command(expect_reply: bool) -> NewCommand {
    new_command(DeliveryMethod::Shadow(ShadowDeliveryMethod { expect_reply }))
}

pub fn topic_command(topic: &str, expect_reply: bool) -> NewCommand {
    new_command(DeliveryMethod::Topic(TopicDeliveryMethod {
        topic: topic.to_string(),
        expect_reply,
    }))
}

pub fn job_command() -> NewCommand {
    new_command(DeliveryMethod::Job(JobDeliveryMethod::default()))
}

pub fn new_command(delivery_method: DeliveryMethod) -> NewCommand {
    NewCommand {
        operation: "reboot".to_string(),
        payload_template: None,
        payload_params: Vec::new(),
        delivery_method,
        enabled: None,
        tags: BTreeMap::new(),
    }
}

pub fn to_devices(command: &Command, devices: &[&str]) -> NewMessage {
    NewMessage {
        command_id: command.id.clone(),
        payload_param_values: BTreeMap::new(),
        targets: Some(Targets::things(devices.iter().copied())),
    }
}

pub fn test_system() -> TestSystem {
    TestSystem::new().expect("test configuration should load")
}

/// Create the command and message, then run the workflow to idle
pub async fn dispatch(
    system: &TestSystem,
    command: NewCommand,
    devices: &[&str],
) -> (Command, Message) {
    let command = system.system.commands.create(command).await.unwrap();
    let message = system
        .system
        .messages
        .create(to_devices(&command, devices))
        .await
        .unwrap();
    system.run_until_idle().await.unwrap();
    let message = system.system.messages.get(&message.id).await.unwrap();
    (command, message)
}

pub fn assert_status(message: &Message, status: MessageStatus) {
    assert_eq!(
        message.status, status,
        "unexpected status; status message: {:?}",
        message.status_message
    );
}
