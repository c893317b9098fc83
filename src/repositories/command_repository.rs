//! Command persistence: one command item plus one item per tag.

use super::{from_item, to_attributes};
use crate::error::CommanderResult;
use crate::models::{Command, CommandListPaginationKey, Page};
use crate::storage::keys::{create_key, entity_id, entity_key};
use crate::storage::{
    IndexName, ItemKey, KeyType, QueryCursor, StorageDao, StorageItem, TagIndex, WriteRequest,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const ENTITY: &str = "commands";

#[derive(Debug, Clone)]
pub struct CommandRepository {
    dao: StorageDao,
    tags: TagIndex,
}

impl CommandRepository {
    pub fn new(dao: StorageDao) -> Self {
        let tags = TagIndex::new(dao.clone(), KeyType::Command);
        Self { dao, tags }
    }

    fn type_partition() -> String {
        create_key(KeyType::TypeIndex, &[KeyType::Command.tag().into()])
    }

    fn key(command_id: &str) -> ItemKey {
        let key = entity_key(KeyType::Command, command_id);
        ItemKey::new(key.clone(), key)
    }

    fn command_item(command: &Command) -> CommanderResult<StorageItem> {
        let key = entity_key(KeyType::Command, &command.id);
        Ok(StorageItem::new(key.clone(), key.clone())
            .with_si2(Self::type_partition(), key)
            .with_attributes(to_attributes(command)?))
    }

    fn tag_item(command_id: &str, tag_key: &str, tag_value: &str) -> StorageItem {
        let key = entity_key(KeyType::Command, command_id);
        StorageItem::new(key.clone(), TagIndex::tag_hash(tag_key, tag_value)).with_si1_sort(key)
    }

    /// Persist a new command together with its tag items
    #[instrument(skip(self, command), fields(command_id = %command.id))]
    pub async fn save(&self, command: &Command) -> CommanderResult<()> {
        let mut items = vec![Self::command_item(command)?];
        items.extend(
            command
                .tags
                .iter()
                .map(|(k, v)| Self::tag_item(&command.id, k, v)),
        );
        self.dao.batch_put(ENTITY, items).await
    }

    /// Persist an updated command, rewriting tag items that changed
    #[instrument(skip(self, command, previous_tags), fields(command_id = %command.id))]
    pub async fn update(
        &self,
        command: &Command,
        previous_tags: &BTreeMap<String, String>,
    ) -> CommanderResult<()> {
        let mut requests = vec![WriteRequest::Put(Self::command_item(command)?)];
        for (k, v) in previous_tags {
            if command.tags.get(k) != Some(v) {
                let key = entity_key(KeyType::Command, &command.id);
                requests.push(WriteRequest::Delete(ItemKey::new(key, TagIndex::tag_hash(k, v))));
            }
        }
        for (k, v) in &command.tags {
            if previous_tags.get(k) != Some(v) {
                requests.push(WriteRequest::Put(Self::tag_item(&command.id, k, v)));
            }
        }
        debug!(writes = requests.len(), "Updating command items");
        self.dao.batch_write_with_retry(ENTITY, requests).await
    }

    pub async fn get(&self, command_id: &str) -> CommanderResult<Option<Command>> {
        self.dao
            .get_item(&Self::key(command_id))
            .await?
            .map(from_item)
            .transpose()
    }

    /// Fetch several commands, in the requested order, skipping unknown ids
    pub async fn get_many(&self, command_ids: &[String]) -> CommanderResult<Vec<Command>> {
        let keys: Vec<ItemKey> = command_ids.iter().map(|id| Self::key(id)).collect();
        self.dao
            .get_items(&keys)
            .await?
            .into_iter()
            .map(from_item)
            .collect()
    }

    /// List commands in id order, optionally restricted to those carrying every tag
    #[instrument(skip(self, tags, pagination))]
    pub async fn list(
        &self,
        tags: Option<&BTreeMap<String, String>>,
        pagination: Option<&CommandListPaginationKey>,
        count: usize,
    ) -> CommanderResult<Page<Command, CommandListPaginationKey>> {
        match tags {
            Some(tags) if !tags.is_empty() => {
                let page = self
                    .tags
                    .list_ids(tags, pagination.map(|p| p.command_id.as_str()), count)
                    .await?;
                let commands = self.get_many(&page.ids).await?;
                let pagination = page
                    .next
                    .map(|command_id| CommandListPaginationKey { command_id });
                Ok(Page::new(commands, pagination))
            }
            _ => {
                let start = pagination.map(|p| {
                    let key = entity_key(KeyType::Command, &p.command_id);
                    QueryCursor {
                        sort: key.clone(),
                        pk: key.clone(),
                        sk: key,
                    }
                });
                let page = self
                    .dao
                    .query_by_hash_prefix(
                        IndexName::Si2,
                        &Self::type_partition(),
                        &format!("{}:", KeyType::Command.tag()),
                        start,
                        Some(count),
                    )
                    .await?;
                let pagination = page
                    .last_evaluated
                    .map(|cursor| entity_id(&cursor.pk, KeyType::Command))
                    .transpose()?
                    .map(|command_id| CommandListPaginationKey { command_id });
                let commands = page
                    .items
                    .into_iter()
                    .map(from_item)
                    .collect::<CommanderResult<Vec<Command>>>()?;
                Ok(Page::new(commands, pagination))
            }
        }
    }

    /// Remove the command item and every tag item under it
    #[instrument(skip(self))]
    pub async fn delete(&self, command_id: &str) -> CommanderResult<()> {
        let pk = entity_key(KeyType::Command, command_id);
        let keys: Vec<ItemKey> = self
            .dao
            .query_all(IndexName::Primary, &pk, "")
            .await?
            .iter()
            .map(StorageItem::key)
            .collect();
        self.dao.batch_delete(ENTITY, keys).await
    }
}
