//! # Composite Key Codec
//!
//! Keys are a type tag followed by components, joined with `:`. Components are
//! percent-escaped (`%` → `%25`, `:` → `%3A`) so a component may itself contain
//! the delimiter and `expand_key(create_key(..))` always returns the original
//! components.

use crate::error::{CommanderError, CommanderResult};
use std::fmt;

pub const DELIMITER: char = ':';

/// Type tags for every kind of key stored in the item table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Command,
    Tag,
    Message,
    Recipient,
    Reply,
    Correlation,
    /// Partition grouping all items of one entity type
    TypeIndex,
}

impl KeyType {
    pub const ALL: [KeyType; 7] = [
        KeyType::Command,
        KeyType::Tag,
        KeyType::Message,
        KeyType::Recipient,
        KeyType::Reply,
        KeyType::Correlation,
        KeyType::TypeIndex,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Command => "cmd",
            Self::Tag => "tag",
            Self::Message => "msg",
            Self::Recipient => "rcpt",
            Self::Reply => "reply",
            Self::Correlation => "corr",
            Self::TypeIndex => "type",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single key component; numbers and booleans are stored in their string form
#[derive(Debug, Clone, PartialEq)]
pub enum KeyComponent {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl KeyComponent {
    fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for KeyComponent {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<&String> for KeyComponent {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<String> for KeyComponent {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for KeyComponent {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for KeyComponent {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A key split back into its type and decoded components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedKey {
    pub key_type: KeyType,
    pub components: Vec<String>,
}

impl ExpandedKey {
    /// Last component, which for entity keys is the entity id
    pub fn id(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }
}

pub fn escape_component(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            DELIMITER => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn unescape_component(escaped: &str) -> CommanderResult<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3).ok_or_else(|| {
            CommanderError::storage(format!("Truncated escape sequence in key component: {escaped}"))
        })?;
        match code {
            "25" => out.push('%'),
            "3A" => out.push(DELIMITER),
            other => {
                return Err(CommanderError::storage(format!(
                    "Unknown escape sequence %{other} in key component: {escaped}"
                )))
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Build a composite key from a type tag and components
pub fn create_key(key_type: KeyType, components: &[KeyComponent]) -> String {
    let mut key = key_type.tag().to_string();
    for component in components {
        key.push(DELIMITER);
        key.push_str(&escape_component(&component.render()));
    }
    key
}

/// Key prefix matching every key that starts with the given components
///
/// The trailing delimiter keeps `reply:d1:` from matching `reply:d10:...`.
pub fn key_prefix(key_type: KeyType, components: &[KeyComponent]) -> String {
    let mut prefix = create_key(key_type, components);
    prefix.push(DELIMITER);
    prefix
}

/// Split a composite key back into its type and decoded components
pub fn expand_key(key: &str) -> CommanderResult<ExpandedKey> {
    let (tag, rest) = match key.split_once(DELIMITER) {
        Some((tag, rest)) => (tag, Some(rest)),
        None => (key, None),
    };
    let key_type = KeyType::from_tag(tag)
        .ok_or_else(|| CommanderError::storage(format!("Unknown key type in key: {key}")))?;

    let components = match rest {
        None => Vec::new(),
        Some(rest) => rest
            .split(DELIMITER)
            .map(unescape_component)
            .collect::<CommanderResult<Vec<_>>>()?,
    };

    Ok(ExpandedKey {
        key_type,
        components,
    })
}

/// Convenience: key for a single-component entity (`cmd:{id}`, `msg:{id}`, ...)
pub fn entity_key(key_type: KeyType, id: &str) -> String {
    create_key(key_type, &[id.into()])
}

/// Convenience: id of a single-component entity key, verifying its type
pub fn entity_id(key: &str, expected: KeyType) -> CommanderResult<String> {
    let expanded = expand_key(key)?;
    if expanded.key_type != expected {
        return Err(CommanderError::storage(format!(
            "Expected a {expected} key but found {key}"
        )));
    }
    expanded
        .id()
        .map(str::to_string)
        .ok_or_else(|| CommanderError::storage(format!("Key has no id component: {key}")))
}
