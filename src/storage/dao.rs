//! # Storage DAO
//!
//! Shared data-access helpers over an [`ItemStore`]: batch writes with the
//! unprocessed-item retry policy, single item lookups, and pagination.

use super::{
    AttributeCondition, CounterMarker, IndexName, ItemKey, ItemStore, QueryCursor, QueryPage, QueryRequest,
    StorageItem, WriteRequest,
};
use crate::config::StorageConfig;
use crate::error::{CommanderError, CommanderResult};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const RETRY_BASE_DELAY_MS: u64 = 10;

#[derive(Clone)]
pub struct StorageDao {
    store: Arc<dyn ItemStore>,
    config: StorageConfig,
}

impl std::fmt::Debug for StorageDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageDao")
            .field("table", &self.config.table_name)
            .finish()
    }
}

impl StorageDao {
    pub fn new(store: Arc<dyn ItemStore>, config: StorageConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub async fn get_item(&self, key: &ItemKey) -> CommanderResult<Option<StorageItem>> {
        let mut items = self.store.get_items(std::slice::from_ref(key)).await?;
        Ok(items.pop())
    }

    /// Fetch many items, preserving the order of `keys` and skipping missing ones
    pub async fn get_items(&self, keys: &[ItemKey]) -> CommanderResult<Vec<StorageItem>> {
        let mut found = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(100) {
            found.extend(self.store.get_items(chunk).await?);
        }
        let mut by_key: std::collections::HashMap<ItemKey, StorageItem> =
            found.into_iter().map(|item| (item.key(), item)).collect();
        Ok(keys.iter().filter_map(|key| by_key.remove(key)).collect())
    }

    pub async fn put_item(&self, item: StorageItem) -> CommanderResult<()> {
        self.store.put_item(item).await
    }

    pub async fn delete_item(&self, key: &ItemKey) -> CommanderResult<()> {
        self.store.delete_item(key).await
    }

    /// Write every request, resubmitting only unprocessed requests
    ///
    /// Requests are chunked to `max_batch_write_items`. Each chunk gets
    /// `batch_write_max_attempts` submissions; a chunk that still has
    /// unprocessed requests after the last attempt fails the whole call with
    /// `SaveFailed` listing the keys that were never written.
    pub async fn batch_write_with_retry(
        &self,
        entity: &str,
        requests: Vec<WriteRequest>,
    ) -> CommanderResult<()> {
        let chunk_size = self.config.max_batch_write_items.max(1);
        let max_attempts = self.config.batch_write_max_attempts.max(1);

        let mut remaining = requests;
        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(chunk_size));
            let mut pending = std::mem::replace(&mut remaining, rest);

            let mut attempt = 1;
            loop {
                let unprocessed = self.store.batch_write(pending).await?;
                if unprocessed.is_empty() {
                    break;
                }
                if attempt >= max_attempts {
                    let keys: Vec<String> = unprocessed.iter().map(|r| r.key().to_string()).collect();
                    error!(
                        entity = %entity,
                        attempts = attempt,
                        unprocessed_keys = ?keys,
                        "❌ Batch write retry ceiling exceeded"
                    );
                    return Err(CommanderError::save_failed(entity, keys));
                }
                warn!(
                    entity = %entity,
                    attempt = attempt,
                    unprocessed = unprocessed.len(),
                    "Batch write returned unprocessed items, retrying"
                );
                tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS << attempt)).await;
                pending = unprocessed;
                attempt += 1;
            }
        }

        debug!(entity = %entity, "Batch write complete");
        Ok(())
    }

    pub async fn batch_put(&self, entity: &str, items: Vec<StorageItem>) -> CommanderResult<()> {
        self.batch_write_with_retry(entity, items.into_iter().map(WriteRequest::Put).collect())
            .await
    }

    pub async fn batch_delete(&self, entity: &str, keys: Vec<ItemKey>) -> CommanderResult<()> {
        self.batch_write_with_retry(entity, keys.into_iter().map(WriteRequest::Delete).collect())
            .await
    }

    /// One page of items under `hash` whose sort value starts with `sort_prefix`
    pub async fn query_by_hash_prefix(
        &self,
        index: IndexName,
        hash: &str,
        sort_prefix: &str,
        exclusive_start: Option<QueryCursor>,
        limit: Option<usize>,
    ) -> CommanderResult<QueryPage> {
        let mut request = QueryRequest::new(index, hash)
            .with_sort_prefix(sort_prefix)
            .with_exclusive_start(exclusive_start);
        if let Some(limit) = limit {
            request = request.with_limit(limit);
        }
        self.store.query(&request).await
    }

    /// Every item under `hash` with the sort prefix, following all pages
    pub async fn query_all(
        &self,
        index: IndexName,
        hash: &str,
        sort_prefix: &str,
    ) -> CommanderResult<Vec<StorageItem>> {
        let mut items = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .query_by_hash_prefix(index, hash, sort_prefix, cursor, Some(self.config.tag_page_size))
                .await?;
            items.extend(page.items);
            match page.last_evaluated {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
    }

    pub async fn increment_counter(
        &self,
        key: &ItemKey,
        field: &str,
        delta: i64,
        marker: Option<&CounterMarker>,
    ) -> CommanderResult<Option<i64>> {
        self.store.increment_counter(key, field, delta, marker).await
    }

    pub async fn set_attributes(
        &self,
        key: &ItemKey,
        attributes: Map<String, Value>,
        condition: Option<&AttributeCondition>,
    ) -> CommanderResult<bool> {
        self.store.set_attributes(key, attributes, condition).await
    }
}
