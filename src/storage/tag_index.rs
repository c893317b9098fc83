//! # Tag Index Resolver
//!
//! Multi-tag AND search without a native multi-attribute index.
//!
//! Every `(tagKey, tagValue)` pair owns a stream of entity keys in the `Si1`
//! index, sorted by their escaped key form. A query over N tags walks the N
//! streams in lockstep, one page at a time per stream, emitting an id only
//! when every stream currently points at it. Streams are compared on the
//! stored keys, not the decoded ids, since escaping does not preserve order.
//! No stream is ever materialized in full.

use super::keys::{create_key, entity_id, entity_key, KeyType};
use super::{IndexName, QueryCursor, StorageDao};
use crate::error::CommanderResult;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, instrument};

/// Ids matching all requested tags, plus a resume point when the page filled up
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagSearchPage {
    pub ids: Vec<String>,
    /// Pass back as `exclusive_start` to continue after the last id
    pub next: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TagIndex {
    dao: StorageDao,
    entity: KeyType,
}

/// Cursor over one tag's stream of stored entity keys
struct TagStream {
    hash: String,
    buffered: VecDeque<String>,
    next_page: Option<QueryCursor>,
    fetched: bool,
}

impl TagIndex {
    pub fn new(dao: StorageDao, entity: KeyType) -> Self {
        Self { dao, entity }
    }

    /// Hash value of the `Si1` partition holding one tag's id stream
    pub fn tag_hash(key: &str, value: &str) -> String {
        create_key(KeyType::Tag, &[key.into(), value.into()])
    }

    /// Ids carrying every `key=value` pair in `tags`, in stored key order
    #[instrument(skip(self), fields(tag_count = tags.len()))]
    pub async fn list_ids(
        &self,
        tags: &BTreeMap<String, String>,
        exclusive_start: Option<&str>,
        count: usize,
    ) -> CommanderResult<TagSearchPage> {
        if tags.is_empty() || count == 0 {
            return Ok(TagSearchPage::default());
        }

        let mut streams: Vec<TagStream> = tags
            .iter()
            .map(|(key, value)| {
                let hash = Self::tag_hash(key, value);
                let next_page = exclusive_start.map(|id| self.resume_cursor(&hash, id));
                TagStream {
                    hash,
                    buffered: VecDeque::new(),
                    next_page,
                    fetched: false,
                }
            })
            .collect();

        // Any empty first page means the intersection is empty
        for stream in streams.iter_mut() {
            if self.current(stream).await?.is_none() {
                debug!(tag = %stream.hash, "Tag stream empty; no intersection possible");
                return Ok(TagSearchPage::default());
            }
        }

        let mut ids = Vec::new();
        loop {
            if ids.len() == count {
                let next = ids.last().cloned();
                return Ok(TagSearchPage { ids, next });
            }

            let mut currents = Vec::with_capacity(streams.len());
            for stream in streams.iter_mut() {
                match self.current(stream).await? {
                    Some(key) => currents.push(key),
                    None => return Ok(TagSearchPage { ids, next: None }),
                }
            }

            let smallest = currents.iter().min().cloned().unwrap_or_default();
            if currents.iter().all(|key| *key == smallest) {
                for stream in streams.iter_mut() {
                    stream.buffered.pop_front();
                }
                ids.push(entity_id(&smallest, self.entity)?);
            } else {
                for (stream, key) in streams.iter_mut().zip(&currents) {
                    if *key == smallest {
                        stream.buffered.pop_front();
                    }
                }
            }
        }
    }

    /// Position of `id` within one tag stream, so a resumed scan skips past it
    fn resume_cursor(&self, hash: &str, id: &str) -> QueryCursor {
        let key = entity_key(self.entity, id);
        QueryCursor {
            sort: key.clone(),
            pk: key,
            sk: hash.to_string(),
        }
    }

    /// Stored key the stream currently points at, fetching its next page when needed
    async fn current(&self, stream: &mut TagStream) -> CommanderResult<Option<String>> {
        while stream.buffered.is_empty() {
            if stream.fetched && stream.next_page.is_none() {
                return Ok(None);
            }
            let page = self
                .dao
                .query_by_hash_prefix(
                    IndexName::Si1,
                    &stream.hash,
                    &format!("{}:", self.entity.tag()),
                    stream.next_page.take(),
                    Some(self.dao.config().tag_page_size),
                )
                .await?;
            stream.fetched = true;
            stream.next_page = page.last_evaluated;
            for item in page.items {
                if let Some(sort) = item.si1_sort {
                    stream.buffered.push_back(sort);
                }
            }
        }
        Ok(stream.buffered.front().cloned())
    }
}
