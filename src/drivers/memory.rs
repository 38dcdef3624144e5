//! Process-local storage driver.
//!
//! Records live in a map owned by the driver and vanish with it. Useful for
//! tests and for running the pool without touching disk.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use time::OffsetDateTime;

use crate::cache::lock::{rw_read, rw_write};
use crate::cache::{CacheDriver, CacheItem, Result};

use super::{RecordStore, StoredRecord};

const SOURCE: &str = "drivers::memory";
const DRIVER_NAME: &str = "memory";

#[derive(Default)]
pub struct MemoryDriver {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record (live or expired) is stored for `key`.
    pub fn contains(&self, key: &str) -> bool {
        rw_read(&self.records, SOURCE, "contains").contains_key(key)
    }

    /// Number of stored records, tag indexes included.
    pub fn len(&self) -> usize {
        rw_read(&self.records, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryDriver {
    fn load(&self, key: &str) -> Result<Option<StoredRecord>> {
        Ok(rw_read(&self.records, SOURCE, "load").get(key).cloned())
    }

    fn store(&self, record: &StoredRecord) -> Result<bool> {
        rw_write(&self.records, SOURCE, "store").insert(record.key().to_string(), record.clone());
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(rw_write(&self.records, SOURCE, "remove").remove(key).is_some())
    }
}

impl CacheDriver for MemoryDriver {
    type Record = StoredRecord;

    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn read(&self, item: &CacheItem) -> Result<Option<StoredRecord>> {
        self.load(item.key())
    }

    fn write(&self, item: &CacheItem) -> Result<bool> {
        self.store(&StoredRecord::wrap(item))
    }

    fn write_tags(&self, item: &CacheItem) -> Result<bool> {
        super::write_tag_indexes(self, item)
    }

    fn delete(&self, item: &CacheItem) -> Result<bool> {
        self.remove(item.key())
    }

    fn clear(&self) -> Result<bool> {
        rw_write(&self.records, SOURCE, "clear").clear();
        Ok(true)
    }

    fn unwrap_data(&self, record: &StoredRecord) -> Result<Value> {
        Ok(record.data.clone())
    }

    fn unwrap_expiration(&self, record: &StoredRecord) -> Result<OffsetDateTime> {
        record.expiration_at()
    }

    fn unwrap_creation_date(&self, record: &StoredRecord) -> Result<Option<OffsetDateTime>> {
        record.creation_at()
    }

    fn unwrap_modification_date(&self, record: &StoredRecord) -> Result<Option<OffsetDateTime>> {
        record.modification_at()
    }

    fn unwrap_tags(&self, record: &StoredRecord) -> Result<Vec<String>> {
        Ok(record.tags.clone())
    }

    fn tagged_keys(&self, tag: &str) -> Result<Vec<String>> {
        super::tagged_keys(self, tag)
    }
}
