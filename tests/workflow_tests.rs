//! End-to-end workflow runs over the in-memory system fixture.

mod common;

use commander_core::fleet::{ArnBuilder, BulkProvisionStatus, FleetError};
use commander_core::messaging::{WorkItem, WorkQueue};
use commander_core::models::{
    AwsIotTargets, Command, DeliveryMethod, JobDeliveryMethod, NewMessage, ReplyAction,
    TargetType, Targets, ThingGroupTarget, TopicDeliveryMethod,
};
use commander_core::orchestration::{DeliveryStrategy, StepOutcome, TopicDelivery};
use commander_core::repositories::MessageRepository;
use commander_core::storage::StorageDao;
use commander_core::test_helpers::{FlakyItemStore, TestSystem};
use commander_core::{Message, MessageStatus, Recipient, RecipientStatus};
use common::*;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

async fn recipients(system: &TestSystem, message_id: &str) -> Vec<commander_core::Recipient> {
    system
        .system
        .messages
        .list_recipients(message_id, None, Some(100))
        .await
        .unwrap()
        .items
}

/// Message steps currently queued, in enqueue order
fn queued_steps(system: &TestSystem) -> Vec<(Message, Command)> {
    system
        .queue
        .pending_items()
        .into_iter()
        .filter_map(|item| match item {
            WorkItem::MessageStep { message, command } => Some((*message, *command)),
            WorkItem::DeleteCommand { .. } => None,
        })
        .collect()
}

/// Create a message and run only its target identification step
async fn identified(system: &TestSystem, command: &Command, devices: &[&str]) -> Message {
    let message = system
        .system
        .messages
        .create(to_devices(command, devices))
        .await
        .unwrap();
    let (step, command) = queued_steps(system).remove(0);
    let outcome = system
        .system
        .orchestrator
        .process_step(step, command)
        .await
        .unwrap();
    assert_eq!(outcome, StepOutcome::Completed);
    message
}

fn batch_steps(system: &TestSystem) -> Vec<(Message, Command)> {
    queued_steps(system)
        .into_iter()
        .filter(|(message, _)| message.batch_index.is_some())
        .collect()
}

#[tokio::test]
async fn test_shadow_dispatch_awaits_replies_with_distinct_correlation_ids() {
    let system = test_system();
    let (_, message) = dispatch(&system, shadow_command(true), &["d1", "d2"]).await;

    assert_status(&message, MessageStatus::AwaitingReplies);
    assert_eq!(message.batches_total, 1);
    assert_eq!(message.batches_complete, 1);

    let recipients = recipients(&system, &message.id).await;
    assert_eq!(recipients.len(), 2);
    let correlation_ids: HashSet<_> = recipients
        .iter()
        .map(|r| r.correlation_id.clone().unwrap())
        .collect();
    assert_eq!(correlation_ids.len(), 2);
    assert!(recipients.iter().all(|r| r.status == RecipientStatus::Success));

    let updates = system.fleet.shadow_updates();
    assert_eq!(updates.len(), 2);
    assert!(updates
        .iter()
        .all(|u| u.shadow_name == system.system.config.delivery.shadow_name));
    assert!(updates[0].payload["state"]["desired"].get("reboot").is_some());
    assert!(system.queue.is_empty());
}

#[tokio::test]
async fn test_many_batches_all_complete() {
    let system = test_system();
    let devices = ["d1", "d2", "d3", "d4", "d5"];
    let (_, message) = dispatch(&system, shadow_command(false), &devices).await;

    assert_status(&message, MessageStatus::Success);
    assert_eq!(message.batches_total, 3);
    assert_eq!(message.batches_complete, 3);
    assert_eq!(system.fleet.shadow_updates().len(), 5);
}

#[tokio::test]
async fn test_one_failed_device_fails_message_but_not_siblings() {
    let system = test_system();
    system
        .fleet
        .fail_device("d2", FleetError::service("ServiceUnavailable", "shadow offline"));
    let (_, message) = dispatch(&system, shadow_command(false), &["d1", "d2", "d3"]).await;

    assert_status(&message, MessageStatus::Failed);
    assert_eq!(message.batches_complete, message.batches_total);

    let recipients = recipients(&system, &message.id).await;
    let failed: Vec<_> = recipients
        .iter()
        .filter(|r| r.status == RecipientStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "d2");
    assert!(failed[0]
        .status_message
        .as_deref()
        .unwrap()
        .contains("ServiceUnavailable"));
    assert_eq!(system.fleet.shadow_updates().len(), 2);
}

#[tokio::test]
async fn test_topic_reply_round_trip() {
    let system = test_system();
    let (_, message) = dispatch(
        &system,
        topic_command("cmd/${deviceName}/ops", true),
        &["d1"],
    )
    .await;
    assert_status(&message, MessageStatus::AwaitingReplies);

    let published = system.fleet.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "cmd/d1/ops");
    let reply_topic = published[0].payload["topics"]["reply"]
        .as_str()
        .unwrap()
        .to_string();

    let reply = system
        .system
        .correlator
        .process_topic_reply(&reply_topic, Some(json!({"rebooted": true})))
        .await
        .unwrap();
    assert!(reply.is_some());

    let replies = system
        .system
        .messages
        .list_replies(&message.id, "d1", None, None)
        .await
        .unwrap();
    assert_eq!(replies.items.len(), 1);
    assert_eq!(replies.items[0].action, ReplyAction::Reply);

    // Replies never move the message status
    let message = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&message, MessageStatus::AwaitingReplies);
}

#[tokio::test]
async fn test_shared_topic_publishes_once() {
    let system = test_system();
    let command = system
        .system
        .commands
        .create(topic_command("fleet/broadcast", false))
        .await
        .unwrap();
    let message = system
        .system
        .messages
        .create(NewMessage {
            command_id: command.id.clone(),
            ..NewMessage::default()
        })
        .await
        .unwrap();
    system.run_until_idle().await.unwrap();

    let message = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&message, MessageStatus::Success);
    let published = system.fleet.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "fleet/broadcast");
}

#[tokio::test]
async fn test_shared_topic_expecting_replies_rejected_before_publish() {
    let system = test_system();
    let err = system
        .system
        .commands
        .create(topic_command("fleet/broadcast", true))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FAILED_VALIDATION");

    // The strategy itself refuses too, for commands that bypassed validation
    let dao = StorageDao::new(system.store.clone(), system.system.config.storage.clone());
    let delivery = TopicDelivery::new(
        system.fleet.clone(),
        MessageRepository::new(dao),
        system.system.config.delivery.clone(),
    );
    let command = Command::from_new(
        "c-shared",
        new_command(DeliveryMethod::Topic(TopicDeliveryMethod {
            topic: "fleet/broadcast".to_string(),
            expect_reply: true,
        })),
    );
    let mut message = commander_core::Message::from_new(
        "m-shared",
        NewMessage {
            command_id: "c-shared".to_string(),
            ..NewMessage::default()
        },
    );
    let result = delivery.process(&mut message, &command).await;
    assert!(result.is_err());
    assert!(system.fleet.published().is_empty());
}

#[tokio::test]
async fn test_job_overflow_provisions_batch_group() {
    let system = test_system();
    let config = system.system.config.delivery.clone();
    assert_eq!(config.max_job_targets, 2);
    assert!(config.job_batch_size >= 3);

    let (_, message) = dispatch(&system, job_command(), &["d1", "d2", "d3"]).await;
    assert_status(&message, MessageStatus::Success);

    let group_name = format!("{}-{}-0", config.ephemeral_group_prefix, message.id);
    assert_eq!(system.fleet.created_groups(), vec![group_name.clone()]);

    let provisioned = system.fleet.provision_requests();
    assert_eq!(provisioned.len(), 1);
    assert_eq!(provisioned[0].thing_group_name, group_name);
    assert_eq!(provisioned[0].thing_names, vec!["d1", "d2", "d3"]);

    let jobs = system.fleet.jobs();
    assert_eq!(jobs.len(), 1);
    let arns = ArnBuilder::from_config(&config);
    assert_eq!(jobs[0].targets, vec![arns.thing_group(&group_name)]);

    let recipients = recipients(&system, &message.id).await;
    assert_eq!(recipients.len(), 3);
    let correlation_ids: HashSet<_> = recipients.iter().map(|r| r.correlation_id.clone()).collect();
    let job_ids: HashSet<_> = recipients.iter().map(|r| r.job_id.clone()).collect();
    assert_eq!(correlation_ids.len(), 1);
    assert_eq!(job_ids, HashSet::from([Some(jobs[0].job_id.clone())]));
}

#[tokio::test]
async fn test_job_within_ceiling_targets_devices_directly() {
    let system = test_system();
    let (_, message) = dispatch(&system, job_command(), &["d1", "d2"]).await;
    assert_status(&message, MessageStatus::Success);

    let arns = ArnBuilder::from_config(&system.system.config.delivery);
    let jobs = system.fleet.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].targets, vec![arns.thing("d1"), arns.thing("d2")]);
    assert!(system.fleet.created_groups().is_empty());
}

#[tokio::test]
async fn test_job_waits_for_provisioning_polls() {
    let system = test_system();
    system.fleet.script_provisioning(&[
        BulkProvisionStatus::InProgress,
        BulkProvisionStatus::InProgress,
    ]);
    let (_, message) = dispatch(&system, job_command(), &["d1", "d2", "d3"]).await;

    assert_status(&message, MessageStatus::Success);
    assert_eq!(system.fleet.jobs().len(), 1);
    assert_eq!(system.fleet.provision_requests().len(), 1);
    // Provisioning handles live on the batch work item only
    assert!(message.bulk_provisioning_task_id.is_none());
}

#[tokio::test]
async fn test_every_overflowing_job_batch_provisions_its_own_group() {
    let system = test_system();
    let config = system.system.config.delivery.clone();
    assert_eq!(config.job_batch_size, 10);
    let devices: Vec<String> = (1..=13).map(|i| format!("d{i:02}")).collect();
    let devices: Vec<&str> = devices.iter().map(String::as_str).collect();
    system.fleet.script_provisioning(&[
        BulkProvisionStatus::InProgress,
        BulkProvisionStatus::InProgress,
    ]);

    let (_, message) = dispatch(&system, job_command(), &devices).await;
    assert_status(&message, MessageStatus::Success);
    assert_eq!(message.batches_total, 2);
    assert_eq!(message.batches_complete, 2);

    let groups: HashSet<String> = system.fleet.created_groups().into_iter().collect();
    let expected: HashSet<String> = (0..2)
        .map(|n| format!("{}-{}-{n}", config.ephemeral_group_prefix, message.id))
        .collect();
    assert_eq!(groups, expected);

    let mut provisioned: Vec<usize> = system
        .fleet
        .provision_requests()
        .iter()
        .map(|r| r.thing_names.len())
        .collect();
    provisioned.sort();
    assert_eq!(provisioned, vec![3, 10]);

    let arns = ArnBuilder::from_config(&config);
    let jobs = system.fleet.jobs();
    assert_eq!(jobs.len(), 2);
    let job_targets: HashSet<String> = jobs.iter().flat_map(|j| j.targets.clone()).collect();
    let group_arns: HashSet<String> = expected.iter().map(|g| arns.thing_group(g)).collect();
    assert_eq!(job_targets, group_arns);

    let recipients = recipients(&system, &message.id).await;
    assert_eq!(recipients.len(), 13);
    assert!(recipients.iter().all(|r| r.status == RecipientStatus::Success));
    let correlation_ids: HashSet<_> = recipients.iter().map(|r| r.correlation_id.clone()).collect();
    assert_eq!(correlation_ids.len(), 2);
}

#[tokio::test]
async fn test_failed_provisioning_fails_message() {
    let system = test_system();
    system
        .fleet
        .script_provisioning(&[BulkProvisionStatus::Failed]);
    let (_, message) = dispatch(&system, job_command(), &["d1", "d2", "d3"]).await;

    assert_status(&message, MessageStatus::Failed);
    assert!(system.fleet.jobs().is_empty());
    assert_eq!(message.batches_complete, message.batches_total);
}

#[tokio::test]
async fn test_in_progress_registration_task_fails_fast() {
    let system = test_system();
    system.fleet.with_registration_task_in_progress("other-task");
    let (_, message) = dispatch(&system, job_command(), &["d1", "d2", "d3"]).await;

    assert_status(&message, MessageStatus::Failed);
    assert!(message
        .status_message
        .as_deref()
        .unwrap()
        .contains("other-task"));
    assert!(system.fleet.created_groups().is_empty());
}

#[tokio::test]
async fn test_job_creation_failure_marks_every_target() {
    let system = test_system();
    system
        .fleet
        .fail_jobs(FleetError::service("LimitExceededException", "too many jobs"));
    let (_, message) = dispatch(&system, job_command(), &["d1", "d2"]).await;

    assert_status(&message, MessageStatus::Failed);
    let recipients = recipients(&system, &message.id).await;
    assert!(recipients.iter().all(|r| r.status == RecipientStatus::Failed));
}

#[tokio::test]
async fn test_groups_expand_for_devices_but_stay_whole_for_jobs() {
    let system = test_system();
    system.fleet.with_group("g1", &["d2", "d3"]);
    let targets = Targets {
        aws_iot: Some(AwsIotTargets {
            thing_names: vec!["d1".to_string(), "d2".to_string()],
            thing_group_names: vec![ThingGroupTarget {
                name: "g1".to_string(),
                expand: false,
            }],
        }),
        query: None,
    };

    let shadow = system
        .system
        .commands
        .create(shadow_command(false))
        .await
        .unwrap();
    let shadow_message = system
        .system
        .messages
        .create(NewMessage {
            command_id: shadow.id.clone(),
            payload_param_values: BTreeMap::new(),
            targets: Some(targets.clone()),
        })
        .await
        .unwrap();

    let job = system
        .system
        .commands
        .create(new_command(DeliveryMethod::Job(JobDeliveryMethod::default())))
        .await
        .unwrap();
    let job_message = system
        .system
        .messages
        .create(NewMessage {
            command_id: job.id.clone(),
            payload_param_values: BTreeMap::new(),
            targets: Some(targets),
        })
        .await
        .unwrap();
    system.run_until_idle().await.unwrap();

    let mut shadow_ids: Vec<_> = recipients(&system, &shadow_message.id)
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    shadow_ids.sort();
    assert_eq!(shadow_ids, vec!["d1", "d2", "d3"]);

    let job_recipients = recipients(&system, &job_message.id).await;
    assert_eq!(job_recipients.len(), 3);
    assert!(job_recipients
        .iter()
        .any(|r| r.id == "g1" && r.target_type == TargetType::Group));
}

#[tokio::test]
async fn test_unknown_group_fails_resolution() {
    let system = test_system();
    let command = system
        .system
        .commands
        .create(shadow_command(false))
        .await
        .unwrap();
    let message = system
        .system
        .messages
        .create(NewMessage {
            command_id: command.id.clone(),
            payload_param_values: BTreeMap::new(),
            targets: Some(Targets {
                aws_iot: Some(AwsIotTargets {
                    thing_names: Vec::new(),
                    thing_group_names: vec![ThingGroupTarget {
                        name: "missing".to_string(),
                        expand: true,
                    }],
                }),
                query: None,
            }),
        })
        .await
        .unwrap();
    system.run_until_idle().await.unwrap();

    let message = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&message, MessageStatus::Failed);
    assert!(system.queue.is_empty());
}

#[tokio::test]
async fn test_step_for_settled_message_is_rejected_without_reopening() {
    let system = test_system();
    let (command, message) = dispatch(&system, shadow_command(false), &["d1"]).await;
    assert_status(&message, MessageStatus::Success);

    system
        .queue
        .send(&WorkItem::message_step(message.clone(), command), None)
        .await
        .unwrap();
    system.run_until_idle().await.unwrap();

    let message = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&message, MessageStatus::Success);
    assert!(system.queue.is_empty());
    assert_eq!(system.fleet.shadow_updates().len(), 1);
}

#[tokio::test]
async fn test_redelivered_batch_after_settle_changes_nothing() {
    let system = test_system();
    let (command, message) = dispatch(&system, shadow_command(false), &["d1"]).await;
    assert_status(&message, MessageStatus::Success);
    let delivered = recipients(&system, &message.id).await;

    // The batch as the partitioner first enqueued it
    let mut batch = message.with_batch(0, &[Recipient::device("d1")]);
    batch.status = MessageStatus::Sending;
    batch.batches_complete = 0;
    batch.completed_batches.clear();
    system
        .queue
        .send(&WorkItem::message_step(batch, command), None)
        .await
        .unwrap();
    system.run_until_idle().await.unwrap();

    let message = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&message, MessageStatus::Success);
    assert_eq!(message.batches_complete, 1);
    assert_eq!(message.batches_total, 1);
    assert_eq!(system.fleet.shadow_updates().len(), 1);
    assert_eq!(recipients(&system, &message.id).await, delivered);
    assert!(system.queue.is_empty());
}

#[tokio::test]
async fn test_batch_redelivered_mid_flight_is_counted_once() {
    let system = test_system();
    let command = system
        .system
        .commands
        .create(shadow_command(false))
        .await
        .unwrap();
    let message = identified(&system, &command, &["d1", "d2", "d3", "d4", "d5"]).await;

    let batches = batch_steps(&system);
    assert_eq!(batches.len(), 3);
    let (first, step_command) = batches[0].clone();
    let orchestrator = &system.system.orchestrator;
    assert_eq!(
        orchestrator
            .process_step(first.clone(), step_command.clone())
            .await
            .unwrap(),
        StepOutcome::Completed
    );
    assert_eq!(
        orchestrator.process_step(first, step_command).await.unwrap(),
        StepOutcome::Skipped
    );

    let stored = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&stored, MessageStatus::Sending);
    assert_eq!(stored.batches_complete, 1);
    assert_eq!(system.fleet.shadow_updates().len(), 2);

    // Every queued item runs, including the already processed ones
    system.run_until_idle().await.unwrap();
    let stored = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&stored, MessageStatus::Success);
    assert_eq!(stored.batches_complete, 3);
    assert_eq!(stored.batches_total, 3);
    assert_eq!(system.fleet.shadow_updates().len(), 5);
}

#[tokio::test]
async fn test_redelivery_keeps_targets_delivered_before_a_crash() {
    let system = test_system();
    let command = system
        .system
        .commands
        .create(shadow_command(true))
        .await
        .unwrap();
    let message = identified(&system, &command, &["d1", "d2"]).await;

    // An earlier attempt delivered d1 but stopped before the batch was counted
    let mut early = Recipient::device("d1");
    early.mark_success(Some("corr-early".to_string()));
    let dao = StorageDao::new(system.store.clone(), system.system.config.storage.clone());
    MessageRepository::new(dao)
        .save_recipients(&message.id, &[early.clone()])
        .await
        .unwrap();

    system.run_until_idle().await.unwrap();
    let stored = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&stored, MessageStatus::AwaitingReplies);

    let updates = system.fleet.shadow_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].thing_name, "d2");
    let recipients = recipients(&system, &message.id).await;
    assert!(recipients.contains(&early));
}

#[tokio::test]
async fn test_interrupted_final_status_write_completes_on_redelivery() {
    let config = TestSystem::test_config().unwrap();
    let store = Arc::new(FlakyItemStore::new(0).fail_status_write_once("success"));
    let system = TestSystem::with_store(config, store);
    let command = system
        .system
        .commands
        .create(shadow_command(false))
        .await
        .unwrap();
    let message = identified(&system, &command, &["d1"]).await;
    let (batch, step_command) = batch_steps(&system).remove(0);

    let orchestrator = &system.system.orchestrator;
    assert!(orchestrator
        .process_step(batch.clone(), step_command.clone())
        .await
        .is_err());
    let stored = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&stored, MessageStatus::Sending);
    assert_eq!(stored.batches_complete, stored.batches_total);

    assert_eq!(
        orchestrator.process_step(batch, step_command).await.unwrap(),
        StepOutcome::Skipped
    );
    let stored = system.system.messages.get(&message.id).await.unwrap();
    assert_status(&stored, MessageStatus::Success);
    assert_eq!(stored.batches_complete, 1);
    assert_eq!(system.fleet.shadow_updates().len(), 1);
}

#[tokio::test]
async fn test_undecodable_item_stays_queued() {
    let system = test_system();
    system.queue.send_raw(json!({"kind": "unknown_kind"}));
    system.run_until_idle().await.unwrap();
    assert_eq!(system.queue.len(), 1);
}

#[tokio::test]
async fn test_command_deletion_removes_messages() {
    let system = test_system();
    let (command, message) = dispatch(&system, shadow_command(false), &["d1", "d2"]).await;

    system.system.commands.delete_command(&command.id).await.unwrap();
    system.run_until_idle().await.unwrap();

    assert!(system.system.commands.get(&command.id).await.is_err());
    assert!(system.system.messages.get(&message.id).await.is_err());
    assert!(recipients_gone(&system, &message.id).await);
}

async fn recipients_gone(system: &TestSystem, message_id: &str) -> bool {
    let dao = StorageDao::new(system.store.clone(), system.system.config.storage.clone());
    MessageRepository::new(dao)
        .all_recipients(message_id)
        .await
        .unwrap()
        .is_empty()
}
