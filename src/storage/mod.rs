//! # Storage Layer
//!
//! A keyed-item store over a single logical table with two secondary indexes.
//!
//! ## Table Layout
//!
//! ```text
//! pk        sk                    si1_sort   si2_hash      si2_sort
//! cmd:{id}  cmd:{id}                           type:cmd      cmd:{id}
//! cmd:{id}  tag:{k}:{v}           cmd:{id}
//! msg:{id}  msg:{id}                           cmd:{cmdId}   msg:{createdAt}:{id}
//! msg:{id}  rcpt:{type}:{target}               corr:{corrId} rcpt:{type}:{target}
//! msg:{id}  reply:{target}:{receivedAt}:{seq}
//! ```
//!
//! - **Primary**: hash `pk`, sort `sk`
//! - **Si1**: hash `sk`, sort `si1_sort` (tag → command id streams)
//! - **Si2**: hash `si2_hash`, sort `si2_sort` (type listings, messages by
//!   command, recipients by correlation id)
//!
//! Backends implement [`ItemStore`]; [`StorageDao`] layers the batch write
//! retry policy and pagination helpers on top.

pub mod dao;
pub mod keys;
pub mod memory;
pub mod postgres;
pub mod tag_index;

use crate::error::CommanderResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use dao::StorageDao;
pub use keys::{create_key, expand_key, key_prefix, ExpandedKey, KeyComponent, KeyType};
pub use memory::InMemoryItemStore;
pub use postgres::PgItemStore;
pub use tag_index::TagIndex;

/// Primary key of an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

/// One row of the item table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    pub pk: String,
    pub sk: String,
    pub si1_sort: Option<String>,
    pub si2_hash: Option<String>,
    pub si2_sort: Option<String>,
    pub attributes: Map<String, Value>,
}

impl StorageItem {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
            si1_sort: None,
            si2_hash: None,
            si2_sort: None,
            attributes: Map::new(),
        }
    }

    pub fn with_si1_sort(mut self, sort: impl Into<String>) -> Self {
        self.si1_sort = Some(sort.into());
        self
    }

    pub fn with_si2(mut self, hash: impl Into<String>, sort: impl Into<String>) -> Self {
        self.si2_hash = Some(hash.into());
        self.si2_sort = Some(sort.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.pk.clone(), self.sk.clone())
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Hash and sort values of this item within `index`, if it is projected there
    pub fn index_position(&self, index: IndexName) -> Option<(&str, &str)> {
        match index {
            IndexName::Primary => Some((self.pk.as_str(), self.sk.as_str())),
            IndexName::Si1 => self
                .si1_sort
                .as_deref()
                .map(|sort| (self.sk.as_str(), sort)),
            IndexName::Si2 => match (self.si2_hash.as_deref(), self.si2_sort.as_deref()) {
                (Some(hash), Some(sort)) => Some((hash, sort)),
                _ => None,
            },
        }
    }

    /// Cursor pointing at this item within `index`
    pub fn cursor(&self, index: IndexName) -> Option<QueryCursor> {
        self.index_position(index).map(|(_, sort)| QueryCursor {
            sort: sort.to_string(),
            pk: self.pk.clone(),
            sk: self.sk.clone(),
        })
    }
}

/// A single entry of a batch write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put(StorageItem),
    Delete(ItemKey),
}

impl WriteRequest {
    pub fn key(&self) -> ItemKey {
        match self {
            Self::Put(item) => item.key(),
            Self::Delete(key) => key.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexName {
    Primary,
    Si1,
    Si2,
}

/// Position within an index: the sort value plus the primary key as tiebreaker
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryCursor {
    pub sort: String,
    pub pk: String,
    pub sk: String,
}

/// Query items sharing one hash value, optionally restricted to a sort prefix
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub index: IndexName,
    pub hash: String,
    pub sort_prefix: Option<String>,
    pub exclusive_start: Option<QueryCursor>,
    pub limit: Option<usize>,
}

impl QueryRequest {
    pub fn new(index: IndexName, hash: impl Into<String>) -> Self {
        Self {
            index,
            hash: hash.into(),
            sort_prefix: None,
            exclusive_start: None,
            limit: None,
        }
    }

    pub fn with_sort_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_prefix = Some(prefix.into());
        self
    }

    pub fn with_exclusive_start(mut self, cursor: Option<QueryCursor>) -> Self {
        self.exclusive_start = cursor;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPage {
    pub items: Vec<StorageItem>,
    /// Present only when more items follow this page
    pub last_evaluated: Option<QueryCursor>,
}

/// Guard applied to a conditional attribute update
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeCondition {
    Equals { field: String, value: Value },
    NotIn { field: String, values: Vec<Value> },
}

impl AttributeCondition {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::NotIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate the condition against an item's current attributes
    pub fn matches(&self, attributes: &Map<String, Value>) -> bool {
        match self {
            Self::Equals { field, value } => attributes.get(field) == Some(value),
            Self::NotIn { field, values } => match attributes.get(field) {
                Some(current) => !values.contains(current),
                None => true,
            },
        }
    }
}

/// Membership entry recorded alongside a counter increment
///
/// `value` is appended to the array attribute `field`; an increment whose
/// marker is already present is skipped, so a replayed contribution is
/// counted once.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterMarker {
    pub field: String,
    pub value: Value,
}

impl CounterMarker {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether `attributes` already record this marker
    pub fn is_recorded(&self, attributes: &Map<String, Value>) -> bool {
        attributes
            .get(&self.field)
            .and_then(Value::as_array)
            .is_some_and(|values| values.contains(&self.value))
    }
}

/// Backend contract for the item table
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Fetch the items that exist among `keys`; missing keys are skipped
    async fn get_items(&self, keys: &[ItemKey]) -> CommanderResult<Vec<StorageItem>>;

    async fn put_item(&self, item: StorageItem) -> CommanderResult<()>;

    async fn delete_item(&self, key: &ItemKey) -> CommanderResult<()>;

    /// Apply a batch of writes once, returning the requests that were not processed
    async fn batch_write(&self, requests: Vec<WriteRequest>) -> CommanderResult<Vec<WriteRequest>>;

    async fn query(&self, request: &QueryRequest) -> CommanderResult<QueryPage>;

    /// Atomically add `delta` to a numeric attribute and return the new value
    ///
    /// With a `marker`, the increment and the marker append happen together
    /// and `None` is returned when the marker was already recorded. Errors
    /// when the item does not exist.
    async fn increment_counter(
        &self,
        key: &ItemKey,
        field: &str,
        delta: i64,
        marker: Option<&CounterMarker>,
    ) -> CommanderResult<Option<i64>>;

    /// Merge `attributes` into an existing item when `condition` holds
    ///
    /// Returns `false` when the item is missing or the condition failed.
    async fn set_attributes(
        &self,
        key: &ItemKey,
        attributes: Map<String, Value>,
        condition: Option<&AttributeCondition>,
    ) -> CommanderResult<bool>;
}
