//! # Message Repository
//!
//! Messages, their recipients and reply logs all live under the message's
//! partition (`msg:{id}`):
//!
//! - the message item, projected into `Si2` under `cmd:{commandId}` so a
//!   command's messages list in creation order
//! - one `rcpt:{targetType}:{targetId}` item per resolved target, projected
//!   into `Si2` under `corr:{correlationId}` once a correlation id is minted
//! - append-only `reply:{targetId}:{receivedAt}:{uuid}` items
//!
//! Status and counter changes are partial attribute updates so concurrent
//! batches never overwrite each other's writes.

use super::{from_item, sortable_timestamp, to_attributes};
use crate::error::{CommanderError, CommanderResult};
use crate::models::{
    Message, MessageListPaginationKey, Page, Recipient, RecipientListPaginationKey, Reply,
    ReplyListPaginationKey, TargetType,
};
use crate::state_machine::MessageStatus;
use crate::storage::keys::{create_key, entity_id, entity_key, expand_key, key_prefix};
use crate::storage::{
    AttributeCondition, CounterMarker, IndexName, ItemKey, KeyType, QueryCursor, StorageDao,
    StorageItem,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const MESSAGES: &str = "messages";
const RECIPIENTS: &str = "recipients";
const REPLIES: &str = "replies";

pub const STATUS_FIELD: &str = "status";
pub const BATCHES_COMPLETE_FIELD: &str = "batchesComplete";
pub const COMPLETED_BATCHES_FIELD: &str = "completedBatches";

/// A recipient located through its correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedRecipient {
    pub message_id: String,
    pub recipient: Recipient,
}

#[derive(Debug, Clone)]
pub struct MessageRepository {
    dao: StorageDao,
}

impl MessageRepository {
    pub fn new(dao: StorageDao) -> Self {
        Self { dao }
    }

    fn partition(message_id: &str) -> String {
        entity_key(KeyType::Message, message_id)
    }

    fn key(message_id: &str) -> ItemKey {
        let key = Self::partition(message_id);
        ItemKey::new(key.clone(), key)
    }

    fn recipient_sort(target_type: TargetType, target_id: &str) -> String {
        create_key(
            KeyType::Recipient,
            &[target_type.to_string().into(), target_id.into()],
        )
    }

    fn recipient_key(message_id: &str, target_type: TargetType, target_id: &str) -> ItemKey {
        ItemKey::new(
            Self::partition(message_id),
            Self::recipient_sort(target_type, target_id),
        )
    }

    fn listing_sort(created_at: i64, message_id: &str) -> String {
        create_key(
            KeyType::Message,
            &[sortable_timestamp(created_at).into(), message_id.into()],
        )
    }

    fn message_item(message: &Message) -> CommanderResult<StorageItem> {
        let mut attributes = to_attributes(message)?;
        // Resolved targets are stored as recipient items; batch context stays on work items
        for field in ["resolvedTargets", "batchIndex", "bulkProvisioningTaskId", "ephemeralGroupName"] {
            attributes.remove(field);
        }
        let key = Self::partition(&message.id);
        Ok(StorageItem::new(key.clone(), key)
            .with_si2(
                entity_key(KeyType::Command, &message.command_id),
                Self::listing_sort(message.created_at.timestamp_micros(), &message.id),
            )
            .with_attributes(attributes))
    }

    fn recipient_item(message_id: &str, recipient: &Recipient) -> CommanderResult<StorageItem> {
        let key = Self::recipient_key(message_id, recipient.target_type, &recipient.id);
        let item = StorageItem::new(key.pk, key.sk.clone()).with_attributes(to_attributes(recipient)?);
        Ok(match &recipient.correlation_id {
            Some(correlation_id) => {
                item.with_si2(entity_key(KeyType::Correlation, correlation_id), key.sk)
            }
            None => item,
        })
    }

    /// Write the full message item; only used before any batch is in flight
    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub async fn save_message(&self, message: &Message) -> CommanderResult<()> {
        self.dao
            .batch_put(MESSAGES, vec![Self::message_item(message)?])
            .await
    }

    pub async fn get_message(&self, message_id: &str) -> CommanderResult<Option<Message>> {
        self.dao
            .get_item(&Self::key(message_id))
            .await?
            .map(from_item)
            .transpose()
    }

    pub async fn require_message(&self, message_id: &str) -> CommanderResult<Message> {
        self.get_message(message_id)
            .await?
            .ok_or_else(|| CommanderError::not_found(format!("message {message_id}")))
    }

    /// A command's messages in creation order
    pub async fn list_messages(
        &self,
        command_id: &str,
        pagination: Option<&MessageListPaginationKey>,
        count: usize,
    ) -> CommanderResult<Page<Message, MessageListPaginationKey>> {
        let start = pagination.map(|p| {
            let key = Self::partition(&p.message_id);
            QueryCursor {
                sort: Self::listing_sort(p.created_at, &p.message_id),
                pk: key.clone(),
                sk: key,
            }
        });
        let page = self
            .dao
            .query_by_hash_prefix(
                IndexName::Si2,
                &entity_key(KeyType::Command, command_id),
                &format!("{}:", KeyType::Message.tag()),
                start,
                Some(count),
            )
            .await?;

        let pagination = match page.last_evaluated {
            Some(cursor) => {
                let sort = expand_key(&cursor.sort)?;
                let created_at = sort
                    .components
                    .first()
                    .and_then(|ts| ts.parse::<i64>().ok())
                    .unwrap_or_default();
                Some(MessageListPaginationKey {
                    created_at,
                    message_id: entity_id(&cursor.pk, KeyType::Message)?,
                })
            }
            None => None,
        };
        let messages = page
            .items
            .into_iter()
            .map(from_item)
            .collect::<CommanderResult<Vec<Message>>>()?;
        Ok(Page::new(messages, pagination))
    }

    /// Upsert recipient items, retrying unprocessed writes
    #[instrument(skip(self, recipients), fields(count = recipients.len()))]
    pub async fn save_recipients(
        &self,
        message_id: &str,
        recipients: &[Recipient],
    ) -> CommanderResult<()> {
        let items = recipients
            .iter()
            .map(|r| Self::recipient_item(message_id, r))
            .collect::<CommanderResult<Vec<_>>>()?;
        self.dao.batch_put(RECIPIENTS, items).await
    }

    pub async fn get_recipient(
        &self,
        message_id: &str,
        target_type: TargetType,
        target_id: &str,
    ) -> CommanderResult<Option<Recipient>> {
        self.dao
            .get_item(&Self::recipient_key(message_id, target_type, target_id))
            .await?
            .map(from_item)
            .transpose()
    }

    /// Stored state of the given targets; targets never written are skipped
    pub async fn get_recipients(
        &self,
        message_id: &str,
        targets: &[Recipient],
    ) -> CommanderResult<Vec<Recipient>> {
        let keys: Vec<ItemKey> = targets
            .iter()
            .map(|t| Self::recipient_key(message_id, t.target_type, &t.id))
            .collect();
        self.dao
            .get_items(&keys)
            .await?
            .into_iter()
            .map(from_item)
            .collect()
    }

    pub async fn list_recipients(
        &self,
        message_id: &str,
        pagination: Option<&RecipientListPaginationKey>,
        count: usize,
    ) -> CommanderResult<Page<Recipient, RecipientListPaginationKey>> {
        let pk = Self::partition(message_id);
        let start = pagination.map(|p| {
            let sk = Self::recipient_sort(p.target_type, &p.target_id);
            QueryCursor {
                sort: sk.clone(),
                pk: pk.clone(),
                sk,
            }
        });
        let page = self
            .dao
            .query_by_hash_prefix(
                IndexName::Primary,
                &pk,
                &format!("{}:", KeyType::Recipient.tag()),
                start,
                Some(count),
            )
            .await?;
        let pagination = page
            .last_evaluated
            .map(|cursor| Self::recipient_position(&cursor.sk))
            .transpose()?;
        let recipients = page
            .items
            .into_iter()
            .map(from_item)
            .collect::<CommanderResult<Vec<Recipient>>>()?;
        Ok(Page::new(recipients, pagination))
    }

    fn recipient_position(sk: &str) -> CommanderResult<RecipientListPaginationKey> {
        let expanded = expand_key(sk)?;
        match (expanded.key_type, expanded.components.as_slice()) {
            (KeyType::Recipient, [target_type, target_id]) => Ok(RecipientListPaginationKey {
                target_type: target_type.parse().map_err(CommanderError::storage)?,
                target_id: target_id.clone(),
            }),
            _ => Err(CommanderError::storage(format!("Not a recipient key: {sk}"))),
        }
    }

    /// Every recipient of a message, following all pages
    pub async fn all_recipients(&self, message_id: &str) -> CommanderResult<Vec<Recipient>> {
        self.dao
            .query_all(
                IndexName::Primary,
                &Self::partition(message_id),
                &format!("{}:", KeyType::Recipient.tag()),
            )
            .await?
            .into_iter()
            .map(from_item)
            .collect()
    }

    /// Device recipient holding `correlation_id`, if any
    pub async fn find_by_correlation(
        &self,
        correlation_id: &str,
        device_name: &str,
    ) -> CommanderResult<Option<CorrelatedRecipient>> {
        let sort = Self::recipient_sort(TargetType::Device, device_name);
        let items = self
            .dao
            .query_all(
                IndexName::Si2,
                &entity_key(KeyType::Correlation, correlation_id),
                &sort,
            )
            .await?;
        for item in items {
            if item.si2_sort.as_deref() != Some(sort.as_str()) {
                continue;
            }
            let message_id = entity_id(&item.pk, KeyType::Message)?;
            let recipient: Recipient = from_item(item)?;
            return Ok(Some(CorrelatedRecipient {
                message_id,
                recipient,
            }));
        }
        Ok(None)
    }

    /// Append an immutable reply to a recipient's log
    #[instrument(skip(self, reply))]
    pub async fn save_reply(
        &self,
        message_id: &str,
        target_id: &str,
        reply: &Reply,
    ) -> CommanderResult<()> {
        let sk = create_key(
            KeyType::Reply,
            &[
                target_id.into(),
                sortable_timestamp(reply.received_at.timestamp_micros()).into(),
                Uuid::new_v4().to_string().into(),
            ],
        );
        let item = StorageItem::new(Self::partition(message_id), sk)
            .with_attributes(to_attributes(reply)?);
        self.dao.batch_put(REPLIES, vec![item]).await
    }

    /// A recipient's replies in arrival order
    pub async fn list_replies(
        &self,
        message_id: &str,
        target_id: &str,
        pagination: Option<&ReplyListPaginationKey>,
        count: usize,
    ) -> CommanderResult<Page<Reply, ReplyListPaginationKey>> {
        let pk = Self::partition(message_id);
        let start = pagination.map(|p| QueryCursor {
            sort: p.sort_key.clone(),
            pk: pk.clone(),
            sk: p.sort_key.clone(),
        });
        let page = self
            .dao
            .query_by_hash_prefix(
                IndexName::Primary,
                &pk,
                &key_prefix(KeyType::Reply, &[target_id.into()]),
                start,
                Some(count),
            )
            .await?;
        let pagination = page
            .last_evaluated
            .map(|cursor| ReplyListPaginationKey { sort_key: cursor.sk });
        let replies = page
            .items
            .into_iter()
            .map(from_item)
            .collect::<CommanderResult<Vec<Reply>>>()?;
        Ok(Page::new(replies, pagination))
    }

    /// Atomically count a finished batch into `batchesComplete`
    ///
    /// A batch with an index is counted at most once; `None` means it had
    /// already been counted.
    pub async fn record_batch_complete(
        &self,
        message_id: &str,
        batch_index: Option<u64>,
    ) -> CommanderResult<Option<i64>> {
        let marker = batch_index.map(|index| CounterMarker::new(COMPLETED_BATCHES_FIELD, index));
        self.dao
            .increment_counter(&Self::key(message_id), BATCHES_COMPLETE_FIELD, 1, marker.as_ref())
            .await
    }

    /// Conditionally write a new status; `false` when the guard rejected it
    #[instrument(skip(self, condition))]
    pub async fn update_status(
        &self,
        message_id: &str,
        status: MessageStatus,
        status_message: Option<&str>,
        condition: Option<&AttributeCondition>,
    ) -> CommanderResult<bool> {
        let mut attributes = Map::new();
        attributes.insert(STATUS_FIELD.to_string(), json!(status.as_str()));
        if let Some(status_message) = status_message {
            attributes.insert("statusMessage".to_string(), json!(status_message));
        }
        self.set_attributes(message_id, attributes, condition).await
    }

    /// Record batch totals and enter `sending`, only from `identifying_targets`
    pub async fn start_sending(&self, message_id: &str, batches_total: u64) -> CommanderResult<bool> {
        let mut attributes = Map::new();
        attributes.insert("batchesTotal".to_string(), json!(batches_total));
        attributes.insert(BATCHES_COMPLETE_FIELD.to_string(), json!(0));
        attributes.insert(STATUS_FIELD.to_string(), json!(MessageStatus::Sending.as_str()));
        let condition =
            AttributeCondition::equals(STATUS_FIELD, MessageStatus::IdentifyingTargets.as_str());
        self.set_attributes(message_id, attributes, Some(&condition))
            .await
    }

    /// Enter `awaiting_provisioning` while batches are dispatching
    ///
    /// Several batches may provision at once, so an already waiting message
    /// is accepted. The task and group belong to the batch work item.
    pub async fn start_provisioning(&self, message_id: &str) -> CommanderResult<bool> {
        let mut attributes = Map::new();
        attributes.insert(
            STATUS_FIELD.to_string(),
            json!(MessageStatus::AwaitingProvisioning.as_str()),
        );
        self.set_attributes(message_id, attributes, Some(&Self::dispatching()))
            .await
    }

    /// Guard matching `sending` and `awaiting_provisioning`
    pub(crate) fn dispatching() -> AttributeCondition {
        AttributeCondition::not_in(
            STATUS_FIELD,
            [
                MessageStatus::IdentifyingTargets.as_str(),
                MessageStatus::AwaitingReplies.as_str(),
                MessageStatus::Success.as_str(),
                MessageStatus::Failed.as_str(),
            ],
        )
    }

    async fn set_attributes(
        &self,
        message_id: &str,
        mut attributes: Map<String, Value>,
        condition: Option<&AttributeCondition>,
    ) -> CommanderResult<bool> {
        let now: DateTime<Utc> = Utc::now();
        attributes.insert("updatedAt".to_string(), serde_json::to_value(now)?);
        let applied = self
            .dao
            .set_attributes(&Self::key(message_id), attributes, condition)
            .await?;
        if !applied {
            debug!(message_id = %message_id, "Conditional message update not applied");
        }
        Ok(applied)
    }

    /// Delete a message with its recipients and replies
    ///
    /// Child items are deleted page by page, with at most `max_concurrency`
    /// batch deletes in flight; the message item goes last so a partial
    /// failure can be retried.
    #[instrument(skip(self))]
    pub async fn delete_message(
        &self,
        message_id: &str,
        page_size: usize,
        max_concurrency: usize,
    ) -> CommanderResult<usize> {
        let pk = Self::partition(message_id);
        let message_key = Self::key(message_id);
        let mut deleted = 0;
        let mut cursor = None;
        loop {
            let page = self
                .dao
                .query_by_hash_prefix(IndexName::Primary, &pk, "", cursor, Some(page_size.max(1)))
                .await?;
            let keys: Vec<ItemKey> = page
                .items
                .iter()
                .map(StorageItem::key)
                .filter(|key| *key != message_key)
                .collect();
            deleted += keys.len();

            let chunk_size = self.dao.config().max_batch_write_items.max(1);
            stream::iter(keys.chunks(chunk_size).map(<[ItemKey]>::to_vec))
                .map(|chunk| self.dao.batch_delete(RECIPIENTS, chunk))
                .buffer_unordered(max_concurrency.max(1))
                .try_collect::<Vec<()>>()
                .await?;

            match page.last_evaluated {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if self.dao.get_item(&message_key).await?.is_none() {
            warn!(message_id = %message_id, "Message item already absent during delete");
        } else {
            self.dao.delete_item(&message_key).await?;
        }
        info!(message_id = %message_id, child_items = deleted, "🗑️ Message deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::models::{NewMessage, ReplyAction, Targets};
    use crate::state_machine::RecipientStatus;
    use crate::storage::InMemoryItemStore;
    use std::sync::Arc;

    fn repository() -> (Arc<InMemoryItemStore>, MessageRepository) {
        let store = Arc::new(InMemoryItemStore::new());
        let dao = StorageDao::new(store.clone(), StorageConfig::default());
        (store, MessageRepository::new(dao))
    }

    fn message(id: &str) -> Message {
        Message::from_new(
            id,
            NewMessage {
                command_id: "c1".to_string(),
                targets: Some(Targets::things(["d1"])),
                ..NewMessage::default()
            },
        )
    }

    #[tokio::test]
    async fn test_message_item_excludes_resolved_targets() {
        let (store, repo) = repository();
        let mut msg = message("m1");
        msg.resolved_targets = vec![Recipient::device("d1")];
        repo.save_message(&msg).await.unwrap();

        let stored = store.all_items();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].attribute("resolvedTargets").is_none());
        assert!(repo.get_message("m1").await.unwrap().unwrap().resolved_targets.is_empty());
    }

    #[tokio::test]
    async fn test_status_guard_is_sticky() {
        let (_, repo) = repository();
        repo.save_message(&message("m1")).await.unwrap();
        assert!(repo.start_sending("m1", 2).await.unwrap());
        assert!(!repo.start_sending("m1", 2).await.unwrap());

        let not_settled = AttributeCondition::not_in(
            STATUS_FIELD,
            [MessageStatus::Success.as_str(), MessageStatus::AwaitingReplies.as_str()],
        );
        assert!(repo
            .update_status("m1", MessageStatus::Failed, Some("boom"), Some(&not_settled))
            .await
            .unwrap());
        assert_eq!(repo.record_batch_complete("m1", Some(0)).await.unwrap(), Some(1));
        assert_eq!(repo.record_batch_complete("m1", Some(0)).await.unwrap(), None);

        let msg = repo.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.status_message.as_deref(), Some("boom"));
        assert_eq!(msg.batches_total, 2);
        assert_eq!(msg.batches_complete, 1);
        assert_eq!(msg.completed_batches, vec![0]);
    }

    #[tokio::test]
    async fn test_provisioning_only_while_dispatching() {
        let (_, repo) = repository();
        repo.save_message(&message("m1")).await.unwrap();
        assert!(!repo.start_provisioning("m1").await.unwrap());

        repo.start_sending("m1", 2).await.unwrap();
        assert!(repo.start_provisioning("m1").await.unwrap());
        // A second overflowing batch joins the wait
        assert!(repo.start_provisioning("m1").await.unwrap());

        repo.update_status("m1", MessageStatus::Failed, None, None)
            .await
            .unwrap();
        assert!(!repo.start_provisioning("m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_device_and_group_with_same_name_are_distinct() {
        let (store, repo) = repository();
        let mut device = Recipient::device("lobby");
        device.mark_success(Some("corr-1".to_string()));
        let mut group = Recipient::group("lobby");
        group.mark_failed("group targets cannot receive shadow deliveries");
        repo.save_recipients("m1", &[device.clone(), group.clone()]).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(
            repo.get_recipient("m1", TargetType::Device, "lobby").await.unwrap(),
            Some(device.clone())
        );
        assert_eq!(
            repo.get_recipient("m1", TargetType::Group, "lobby").await.unwrap(),
            Some(group)
        );
        let found = repo.find_by_correlation("corr-1", "lobby").await.unwrap().unwrap();
        assert_eq!(found.recipient, device);
    }

    #[tokio::test]
    async fn test_find_by_correlation_matches_device() {
        let (_, repo) = repository();
        let mut d1 = Recipient::device("d1");
        d1.mark_success(Some("corr-1".to_string()));
        let mut d2 = Recipient::device("d2");
        d2.mark_success(Some("corr-1".to_string()));
        repo.save_recipients("m1", &[d1.clone(), d2]).await.unwrap();

        let found = repo.find_by_correlation("corr-1", "d1").await.unwrap().unwrap();
        assert_eq!(found.message_id, "m1");
        assert_eq!(found.recipient, d1);
        assert!(repo.find_by_correlation("corr-1", "d3").await.unwrap().is_none());
        assert!(repo.find_by_correlation("corr-2", "d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replies_list_per_target() {
        let (_, repo) = repository();
        for target in ["d1", "d1", "d10"] {
            let reply = Reply {
                received_at: Utc::now(),
                action: ReplyAction::Reply,
                payload: Some(json!({"target": target})),
            };
            repo.save_reply("m1", target, &reply).await.unwrap();
        }

        let page = repo.list_replies("m1", "d1", None, 10).await.unwrap();
        assert_eq!(page.items.len(), 2);
        let first = repo.list_replies("m1", "d1", None, 1).await.unwrap();
        let rest = repo
            .list_replies("m1", "d1", first.pagination.as_ref(), 10)
            .await
            .unwrap();
        assert_eq!(rest.items.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_message_removes_children() {
        let (store, repo) = repository();
        repo.save_message(&message("m1")).await.unwrap();
        let recipients: Vec<_> = (0..7).map(|i| Recipient::device(format!("d{i}"))).collect();
        repo.save_recipients("m1", &recipients).await.unwrap();

        let deleted = repo.delete_message("m1", 3, 2).await.unwrap();
        assert_eq!(deleted, 7);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_recipient_pagination() {
        let (_, repo) = repository();
        let mut recipients: Vec<_> = ["a", "b", "c"].iter().map(|id| Recipient::device(*id)).collect();
        recipients[1].status = RecipientStatus::Failed;
        repo.save_recipients("m1", &recipients).await.unwrap();

        let first = repo.list_recipients("m1", None, 2).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let second = repo
            .list_recipients("m1", first.pagination.as_ref(), 2)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].id, "c");
        assert!(second.pagination.is_none());
    }

    #[tokio::test]
    async fn test_recipient_pagination_across_types() {
        let (_, repo) = repository();
        let recipients = vec![
            Recipient::device("a:1"),
            Recipient::group("a:1"),
            Recipient::device("b"),
        ];
        repo.save_recipients("m1", &recipients).await.unwrap();

        let mut seen = Vec::new();
        let mut pagination = None;
        loop {
            let page = repo
                .list_recipients("m1", pagination.as_ref(), 1)
                .await
                .unwrap();
            seen.extend(page.items.into_iter().map(|r| (r.target_type, r.id)));
            match page.pagination {
                Some(next) => pagination = Some(next),
                None => break,
            }
        }
        assert_eq!(
            seen,
            vec![
                (TargetType::Device, "a:1".to_string()),
                (TargetType::Device, "b".to_string()),
                (TargetType::Group, "a:1".to_string()),
            ]
        );
    }
}
