//! # Repositories
//!
//! Mapping between domain models and items of the single logical table.
//! Each entity's JSON form is stored as the item's attribute map; keys and
//! index columns are derived from the entity ids.

pub mod command_repository;
pub mod message_repository;

pub use command_repository::CommandRepository;
pub use message_repository::MessageRepository;

use crate::error::{CommanderError, CommanderResult};
use crate::storage::StorageItem;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

pub(crate) fn to_attributes<T: Serialize>(value: &T) -> CommanderResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CommanderError::Serialization(format!(
            "expected a JSON object, found {other}"
        ))),
    }
}

pub(crate) fn from_item<T: DeserializeOwned>(item: StorageItem) -> CommanderResult<T> {
    Ok(serde_json::from_value(Value::Object(item.attributes))?)
}

/// Fixed-width rendering so timestamps sort lexicographically
pub(crate) fn sortable_timestamp(micros: i64) -> String {
    format!("{:020}", micros.max(0))
}
