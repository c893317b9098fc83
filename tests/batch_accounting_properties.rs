mod common;

use commander_core::config::StorageConfig;
use commander_core::models::{Command, Message, NewMessage, Recipient};
use commander_core::orchestration::BatchCompletion;
use commander_core::repositories::MessageRepository;
use commander_core::storage::{InMemoryItemStore, StorageDao};
use commander_core::MessageStatus;
use common::shadow_command;
use common::strategies::{batch_layout, BatchLayout};
use futures::future::join_all;
use proptest::prelude::*;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

/// Partition a message per `layout`, complete every batch concurrently in the
/// layout's order with the first batch delivered twice, and return the final
/// message
async fn run_layout(layout: &BatchLayout, expect_reply: bool) -> Message {
    let dao = StorageDao::new(Arc::new(InMemoryItemStore::new()), StorageConfig::default());
    let messages = MessageRepository::new(dao);
    let completion = Arc::new(BatchCompletion::new(messages.clone()));
    let command = Command::from_new("c1", shadow_command(expect_reply));

    let message = Message::from_new(
        "m1",
        NewMessage {
            command_id: "c1".to_string(),
            ..NewMessage::default()
        },
    );
    messages.save_message(&message).await.unwrap();
    assert!(messages
        .start_sending("m1", layout.batch_count() as u64)
        .await
        .unwrap());

    let targets: Vec<Recipient> = layout
        .failing
        .iter()
        .enumerate()
        .map(|(i, fails)| {
            let mut recipient = Recipient::device(format!("d{i:02}"));
            if *fails {
                recipient.mark_failed("ServiceUnavailable: down");
            } else {
                recipient.mark_success(Some(format!("corr-{i}")));
            }
            recipient
        })
        .collect();
    let batches: Vec<Message> = targets
        .chunks(layout.batch_size)
        .zip(0u64..)
        .map(|(slice, index)| message.with_batch(index, slice))
        .collect();

    let deliveries = layout
        .completion_order
        .iter()
        .chain(layout.completion_order.first());
    let handles = deliveries.map(|index| {
        let completion = completion.clone();
        let batch = batches[*index].clone();
        let command = command.clone();
        tokio::spawn(async move { completion.complete(&batch, &command, None).await })
    });
    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    messages.require_message("m1").await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: counters always meet despite a duplicate delivery, and the
    /// message fails iff some target failed
    #[test]
    fn concurrent_batches_settle_consistently(layout in batch_layout(), expect_reply in any::<bool>()) {
        let message = runtime().block_on(run_layout(&layout, expect_reply));

        prop_assert_eq!(message.batches_complete, message.batches_total);
        prop_assert_eq!(message.batches_total as usize, layout.batch_count());

        let any_failed = layout.failing.iter().any(|f| *f);
        let expected = match (any_failed, expect_reply) {
            (true, _) => MessageStatus::Failed,
            (false, true) => MessageStatus::AwaitingReplies,
            (false, false) => MessageStatus::Success,
        };
        prop_assert_eq!(message.status, expected);
    }
}

#[tokio::test]
async fn test_replayed_batch_does_not_change_settled_status() {
    let dao = StorageDao::new(Arc::new(InMemoryItemStore::new()), StorageConfig::default());
    let messages = MessageRepository::new(dao);
    let completion = BatchCompletion::new(messages.clone());
    let command = Command::from_new("c1", shadow_command(false));
    let message = Message::from_new(
        "m1",
        NewMessage {
            command_id: "c1".to_string(),
            ..NewMessage::default()
        },
    );
    messages.save_message(&message).await.unwrap();
    messages.start_sending("m1", 1).await.unwrap();

    let mut ok = Recipient::device("d1");
    ok.mark_success(Some("corr-1".to_string()));
    let batch = message.with_batch(0, &[ok]);
    assert_eq!(
        completion.complete(&batch, &command, None).await.unwrap(),
        MessageStatus::Success
    );

    // Redelivery is not counted again and must not reopen or fail the message
    let mut failed = Recipient::device("d1");
    failed.mark_failed("late failure");
    let replay = message.with_batch(0, &[failed]);
    assert_eq!(
        completion.complete(&replay, &command, None).await.unwrap(),
        MessageStatus::Success
    );
    let settled = messages.require_message("m1").await.unwrap();
    assert_eq!(settled.status, MessageStatus::Success);
    assert_eq!(settled.batches_complete, 1);
    assert_eq!(settled.completed_batches, vec![0]);
}

#[tokio::test]
async fn test_step_error_fails_message_and_still_counts() {
    let dao = StorageDao::new(Arc::new(InMemoryItemStore::new()), StorageConfig::default());
    let messages = MessageRepository::new(dao);
    let completion = BatchCompletion::new(messages.clone());
    let command = Command::from_new("c1", shadow_command(false));
    let message = Message::from_new(
        "m1",
        NewMessage {
            command_id: "c1".to_string(),
            ..NewMessage::default()
        },
    );
    messages.save_message(&message).await.unwrap();
    messages.start_sending("m1", 2).await.unwrap();

    let error = commander_core::CommanderError::storage("publish pipeline broke");
    let first = message.with_batch(0, &[Recipient::device("d1")]);
    let status = completion.complete(&first, &command, Some(&error)).await.unwrap();
    assert_eq!(status, MessageStatus::Failed);

    let second = message.with_batch(1, &[Recipient::device("d2")]);
    completion.complete(&second, &command, None).await.unwrap();

    let settled = messages.require_message("m1").await.unwrap();
    assert_eq!(settled.status, MessageStatus::Failed);
    assert_eq!(settled.batches_complete, 2);
    assert!(settled
        .status_message
        .as_deref()
        .unwrap_or_default()
        .contains("publish pipeline broke"));
}
