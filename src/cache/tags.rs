//! Tag index bookkeeping shared by drivers.
//!
//! A tag index maps each tagged key to its expiration (Unix seconds). Drivers
//! persist one index per tag as an ordinary record under
//! [`tag_index_key`](super::keys::tag_index_key).

use std::collections::BTreeMap;

use serde_json::Value;
use time::OffsetDateTime;

use super::error::{CacheError, Result};
use super::item::CacheItem;

/// Key -> expiration (Unix seconds).
pub type TagIndex = BTreeMap<String, i64>;

/// Decode an index payload; `Null` is an empty index.
pub fn decode_index(tag: &str, value: Value) -> Result<TagIndex> {
    if value.is_null() {
        return Ok(TagIndex::new());
    }
    serde_json::from_value(value)
        .map_err(|err| CacheError::decode(format!("tag:{tag}"), err.to_string()))
}

pub fn encode_index(index: &TagIndex) -> Result<Value> {
    Ok(serde_json::to_value(index)?)
}

/// Record `item` in `index` and drop entries that already expired.
pub fn insert(index: &mut TagIndex, item: &CacheItem) {
    prune(index);
    index.insert(item.key().to_string(), item.expiration().unix_timestamp());
}

/// Remove `key`; returns true when the index is now empty.
pub fn remove(index: &mut TagIndex, key: &str) -> bool {
    index.remove(key);
    prune(index);
    index.is_empty()
}

/// Latest expiration in the index, used as the index record's own expiry.
pub fn horizon(index: &TagIndex) -> i64 {
    index
        .values()
        .copied()
        .max()
        .unwrap_or_else(|| OffsetDateTime::now_utc().unix_timestamp())
}

/// Keys whose entries are still live, in key order.
pub fn live_keys(index: &TagIndex) -> Vec<String> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    index
        .iter()
        .filter(|(_, expiration)| **expiration >= now)
        .map(|(key, _)| key.clone())
        .collect()
}

fn prune(index: &mut TagIndex) {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    index.retain(|_, expiration| *expiration >= now);
}
