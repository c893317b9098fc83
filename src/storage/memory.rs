//! In-memory implementation of [`ItemStore`] backed by an ordered map.

use super::{
    AttributeCondition, CounterMarker, IndexName, ItemKey, ItemStore, QueryCursor, QueryPage, QueryRequest,
    StorageItem, WriteRequest,
};
use crate::error::{CommanderError, CommanderResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    items: RwLock<BTreeMap<ItemKey, StorageItem>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Snapshot of every stored item, in primary key order
    pub fn all_items(&self) -> Vec<StorageItem> {
        self.items.read().values().cloned().collect()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get_items(&self, keys: &[ItemKey]) -> CommanderResult<Vec<StorageItem>> {
        let items = self.items.read();
        Ok(keys.iter().filter_map(|key| items.get(key).cloned()).collect())
    }

    async fn put_item(&self, item: StorageItem) -> CommanderResult<()> {
        self.items.write().insert(item.key(), item);
        Ok(())
    }

    async fn delete_item(&self, key: &ItemKey) -> CommanderResult<()> {
        self.items.write().remove(key);
        Ok(())
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> CommanderResult<Vec<WriteRequest>> {
        let mut items = self.items.write();
        for request in requests {
            match request {
                WriteRequest::Put(item) => {
                    items.insert(item.key(), item);
                }
                WriteRequest::Delete(key) => {
                    items.remove(&key);
                }
            }
        }
        Ok(Vec::new())
    }

    async fn query(&self, request: &QueryRequest) -> CommanderResult<QueryPage> {
        let items = self.items.read();

        let mut matches: Vec<(QueryCursor, &StorageItem)> = items
            .values()
            .filter_map(|item| {
                let (hash, sort) = item.index_position(request.index)?;
                if hash != request.hash {
                    return None;
                }
                if let Some(prefix) = &request.sort_prefix {
                    if !sort.starts_with(prefix.as_str()) {
                        return None;
                    }
                }
                let cursor = item.cursor(request.index)?;
                match &request.exclusive_start {
                    Some(start) if &cursor <= start => None,
                    _ => Some((cursor, item)),
                }
            })
            .collect();

        // Primary key order already matches the primary index; the others need sorting
        if request.index != IndexName::Primary {
            matches.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let limit = request.limit.unwrap_or(usize::MAX);
        let has_more = matches.len() > limit;
        matches.truncate(limit);

        let last_evaluated = if has_more {
            matches.last().map(|(cursor, _)| cursor.clone())
        } else {
            None
        };

        Ok(QueryPage {
            items: matches.into_iter().map(|(_, item)| item.clone()).collect(),
            last_evaluated,
        })
    }

    async fn increment_counter(
        &self,
        key: &ItemKey,
        field: &str,
        delta: i64,
        marker: Option<&CounterMarker>,
    ) -> CommanderResult<Option<i64>> {
        let mut items = self.items.write();
        let item = items
            .get_mut(key)
            .ok_or_else(|| CommanderError::not_found(format!("item {key}")))?;
        if let Some(marker) = marker {
            if marker.is_recorded(&item.attributes) {
                return Ok(None);
            }
            match item.attributes.get_mut(&marker.field) {
                Some(Value::Array(values)) => values.push(marker.value.clone()),
                _ => {
                    item.attributes.insert(
                        marker.field.clone(),
                        Value::Array(vec![marker.value.clone()]),
                    );
                }
            }
        }
        let current = item.attributes.get(field).and_then(Value::as_i64).unwrap_or(0);
        let updated = current + delta;
        item.attributes.insert(field.to_string(), Value::from(updated));
        Ok(Some(updated))
    }

    async fn set_attributes(
        &self,
        key: &ItemKey,
        attributes: Map<String, Value>,
        condition: Option<&AttributeCondition>,
    ) -> CommanderResult<bool> {
        let mut items = self.items.write();
        let Some(item) = items.get_mut(key) else {
            return Ok(false);
        };
        if let Some(condition) = condition {
            if !condition.matches(&item.attributes) {
                return Ok(false);
            }
        }
        item.attributes.extend(attributes);
        Ok(true)
    }
}
