// ItemStore wrapper that leaves batch writes unprocessed or fails a status write.

use crate::error::{CommanderError, CommanderResult};
use crate::storage::{
    AttributeCondition, CounterMarker, InMemoryItemStore, ItemKey, ItemStore, QueryPage, QueryRequest,
    StorageItem, WriteRequest,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Delegates to an [`InMemoryItemStore`], except that the first
/// `failing_calls` batch writes apply nothing and hand every request back
/// as unprocessed
#[derive(Debug)]
pub struct FlakyItemStore {
    inner: InMemoryItemStore,
    failing_calls: usize,
    batch_write_calls: AtomicUsize,
    failing_status: Mutex<Option<String>>,
}

impl FlakyItemStore {
    pub fn new(failing_calls: usize) -> Self {
        Self {
            inner: InMemoryItemStore::new(),
            failing_calls,
            batch_write_calls: AtomicUsize::new(0),
            failing_status: Mutex::new(None),
        }
    }

    /// Error out of the next attribute update that writes `status`, once
    pub fn fail_status_write_once(self, status: &str) -> Self {
        *self.failing_status.lock() = Some(status.to_string());
        self
    }

    /// A store whose batch writes never fully drain
    pub fn never_drains() -> Self {
        Self::new(usize::MAX)
    }

    pub fn batch_write_calls(&self) -> usize {
        self.batch_write_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryItemStore {
        &self.inner
    }
}

#[async_trait]
impl ItemStore for FlakyItemStore {
    async fn get_items(&self, keys: &[ItemKey]) -> CommanderResult<Vec<StorageItem>> {
        self.inner.get_items(keys).await
    }

    async fn put_item(&self, item: StorageItem) -> CommanderResult<()> {
        self.inner.put_item(item).await
    }

    async fn delete_item(&self, key: &ItemKey) -> CommanderResult<()> {
        self.inner.delete_item(key).await
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> CommanderResult<Vec<WriteRequest>> {
        let call = self.batch_write_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failing_calls {
            return Ok(requests);
        }
        self.inner.batch_write(requests).await
    }

    async fn query(&self, request: &QueryRequest) -> CommanderResult<QueryPage> {
        self.inner.query(request).await
    }

    async fn increment_counter(
        &self,
        key: &ItemKey,
        field: &str,
        delta: i64,
        marker: Option<&CounterMarker>,
    ) -> CommanderResult<Option<i64>> {
        self.inner.increment_counter(key, field, delta, marker).await
    }

    async fn set_attributes(
        &self,
        key: &ItemKey,
        attributes: Map<String, Value>,
        condition: Option<&AttributeCondition>,
    ) -> CommanderResult<bool> {
        {
            let mut failing = self.failing_status.lock();
            let writes_status = failing
                .as_deref()
                .is_some_and(|status| attributes.get("status").and_then(Value::as_str) == Some(status));
            if writes_status {
                *failing = None;
                return Err(CommanderError::Storage(format!("status write to {key} dropped")));
            }
        }
        self.inner.set_attributes(key, attributes, condition).await
    }
}
