//! Opaque pagination tokens returned by list operations.
//!
//! Each key holds the last-seen sort components of a page. Callers hand them
//! back unchanged; only the repositories construct or read them.

use super::TargetType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandListPaginationKey {
    pub(crate) command_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListPaginationKey {
    pub(crate) created_at: i64,
    pub(crate) message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientListPaginationKey {
    pub(crate) target_type: TargetType,
    pub(crate) target_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyListPaginationKey {
    pub(crate) sort_key: String,
}

/// A page of results plus the token for the next page, when one exists
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T, K> {
    pub items: Vec<T>,
    pub pagination: Option<K>,
}

impl<T, K> Page<T, K> {
    pub fn new(items: Vec<T>, pagination: Option<K>) -> Self {
        Self { items, pagination }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            pagination: None,
        }
    }
}
