//! Storage drivers.
//!
//! Both drivers persist the same [`StoredRecord`] shape and keep tag indexes
//! as ordinary records, so the tag bookkeeping lives here once.

pub mod files;
pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::cache::keys::tag_index_key;
use crate::cache::tags::{self, TagIndex};
use crate::cache::{CacheError, CacheItem, Result};

pub use files::FilesDriver;
pub use memory::MemoryDriver;

/// Raw record as persisted by the bundled drivers.
///
/// Field names are kept short on disk: `d` payload, `e` expiration, `c`/`m`
/// creation/modification dates (only when detailed dating is on), `g` tags.
/// All instants are Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(skip)]
    key: String,
    #[serde(rename = "d")]
    pub data: Value,
    #[serde(rename = "e")]
    pub expiration: i64,
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<i64>,
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub modification: Option<i64>,
    #[serde(rename = "g", default)]
    pub tags: Vec<String>,
}

impl StoredRecord {
    /// Snapshot `item` into a record.
    pub fn wrap(item: &CacheItem) -> Self {
        Self {
            key: item.key().to_string(),
            data: item.get(),
            expiration: item.expiration().unix_timestamp(),
            creation: item.creation_date().map(OffsetDateTime::unix_timestamp),
            modification: item.modification_date().map(OffsetDateTime::unix_timestamp),
            tags: item.tags(),
        }
    }

    /// Decode a serialized record read for `key`.
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
        let mut record: Self = serde_json::from_slice(bytes)
            .map_err(|err| CacheError::decode(key, err.to_string()))?;
        record.key = key.to_string();
        Ok(record)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expiration_at(&self) -> Result<OffsetDateTime> {
        instant(&self.key, self.expiration)
    }

    pub fn creation_at(&self) -> Result<Option<OffsetDateTime>> {
        self.creation.map(|secs| instant(&self.key, secs)).transpose()
    }

    pub fn modification_at(&self) -> Result<Option<OffsetDateTime>> {
        self.modification
            .map(|secs| instant(&self.key, secs))
            .transpose()
    }

    fn tag_index(key: String, index: &TagIndex) -> Result<Self> {
        Ok(Self {
            key,
            data: tags::encode_index(index)?,
            expiration: tags::horizon(index),
            creation: None,
            modification: None,
            tags: Vec::new(),
        })
    }
}

fn instant(key: &str, secs: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|err| CacheError::decode(key, format!("timestamp {secs} out of range: {err}")))
}

/// Raw record access by storage key, used for tag indexes.
pub(crate) trait RecordStore {
    fn load(&self, key: &str) -> Result<Option<StoredRecord>>;
    fn store(&self, record: &StoredRecord) -> Result<bool>;
    fn remove(&self, key: &str) -> Result<bool>;
}

/// Add `item` to the index of each of its tags and drop it from the index
/// of each removed tag. Index updates are read-modify-write without a lock;
/// concurrent writers on the same tag resolve last-write-wins.
pub(crate) fn write_tag_indexes<S: RecordStore>(store: &S, item: &CacheItem) -> Result<bool> {
    let mut written = true;

    for tag in item.tags() {
        let key = tag_index_key(&tag);
        let mut index = load_index(store, &tag, &key)?.unwrap_or_default();
        tags::insert(&mut index, item);
        written &= store.store(&StoredRecord::tag_index(key, &index)?)?;
    }

    for tag in item.removed_tags() {
        let key = tag_index_key(&tag);
        let Some(mut index) = load_index(store, &tag, &key)? else {
            continue;
        };
        if tags::remove(&mut index, item.key()) {
            store.remove(&key)?;
        } else {
            written &= store.store(&StoredRecord::tag_index(key, &index)?)?;
        }
    }

    Ok(written)
}

pub(crate) fn tagged_keys<S: RecordStore>(store: &S, tag: &str) -> Result<Vec<String>> {
    let key = tag_index_key(tag);
    Ok(load_index(store, tag, &key)?
        .map(|index| tags::live_keys(&index))
        .unwrap_or_default())
}

fn load_index<S: RecordStore>(store: &S, tag: &str, key: &str) -> Result<Option<TagIndex>> {
    store
        .load(key)?
        .map(|record| tags::decode_index(tag, record.data))
        .transpose()
}
