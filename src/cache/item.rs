//! Cache item handle.
//!
//! A [`CacheItem`] is a clonable handle onto one logical item. Clones share
//! state, so the pool can hand the same instance to every caller asking for
//! a key. Creating a second item for the same key with [`CacheItem::new`]
//! yields a *detached* instance, which the pool refuses to save over the
//! registered one.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::{OffsetDateTime, PrimitiveDateTime};

use super::error::{CacheError, Result};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::item";

/// Instant `ttl` from now, or `None` when it falls outside the representable range.
pub fn checked_expiry(ttl: Duration) -> Option<OffsetDateTime> {
    let ttl = time::Duration::try_from(ttl).ok()?;
    OffsetDateTime::now_utc().checked_add(ttl)
}

/// Latest instant an item can expire at.
pub fn latest_expiry() -> OffsetDateTime {
    PrimitiveDateTime::MAX.assume_utc()
}

#[derive(Debug, Clone)]
struct ItemState {
    value: Value,
    expiration: OffsetDateTime,
    creation_date: Option<OffsetDateTime>,
    modification_date: Option<OffsetDateTime>,
    tags: BTreeSet<String>,
    removed_tags: BTreeSet<String>,
    hit: bool,
}

struct ItemInner {
    key: String,
    driver: &'static str,
    state: RwLock<ItemState>,
}

/// Shared handle onto a cache entry.
#[derive(Clone)]
pub struct CacheItem {
    inner: Arc<ItemInner>,
}

impl CacheItem {
    /// Build an empty, not-hit item for `key`, owned by driver family `driver`.
    ///
    /// The expiration starts at "now"; pools push it out by their default TTL.
    pub fn new(driver: &'static str, key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ItemInner {
                key: key.into(),
                driver,
                state: RwLock::new(ItemState {
                    value: Value::Null,
                    expiration: OffsetDateTime::now_utc(),
                    creation_date: None,
                    modification_date: None,
                    tags: BTreeSet::new(),
                    removed_tags: BTreeSet::new(),
                    hit: false,
                }),
            }),
        }
    }

    /// True when both handles point at the same logical instance.
    pub fn same_instance(a: &CacheItem, b: &CacheItem) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Driver family this item was built for.
    pub fn driver(&self) -> &'static str {
        self.inner.driver
    }

    /// Current payload; `Value::Null` when the item holds nothing.
    pub fn get(&self) -> Value {
        rw_read(&self.inner.state, SOURCE, "get").value.clone()
    }

    /// Decode the payload into `T`.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.get())
            .map_err(|err| CacheError::decode(self.key(), err.to_string()))
    }

    /// Replace the payload. Bumps the modification date when dates are tracked.
    pub fn set(&self, value: impl Into<Value>) -> &Self {
        let mut state = rw_write(&self.inner.state, SOURCE, "set");
        state.value = value.into();
        if state.modification_date.is_some() {
            state.modification_date = Some(OffsetDateTime::now_utc());
        }
        self
    }

    /// Serialize `value` and store it as the payload.
    pub fn set_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<&Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.set(value))
    }

    /// Whether the last resolution found live data.
    pub fn is_hit(&self) -> bool {
        rw_read(&self.inner.state, SOURCE, "is_hit").hit
    }

    pub(crate) fn set_hit(&self, hit: bool) {
        rw_write(&self.inner.state, SOURCE, "set_hit").hit = hit;
    }

    pub fn expiration(&self) -> OffsetDateTime {
        rw_read(&self.inner.state, SOURCE, "expiration").expiration
    }

    pub fn expires_at(&self, at: OffsetDateTime) -> &Self {
        rw_write(&self.inner.state, SOURCE, "expires_at").expiration = at;
        self
    }

    /// Expire `ttl` from now, clamped to [`latest_expiry`].
    pub fn expires_after(&self, ttl: Duration) -> &Self {
        self.expires_at(checked_expiry(ttl).unwrap_or_else(latest_expiry))
    }

    /// Expired once the expiration second lies strictly in the past.
    pub fn is_expired(&self) -> bool {
        self.expiration().unix_timestamp() < OffsetDateTime::now_utc().unix_timestamp()
    }

    /// Remaining lifetime, zero once expired.
    pub fn ttl(&self) -> Duration {
        let remaining = self.expiration() - OffsetDateTime::now_utc();
        Duration::try_from(remaining).unwrap_or(Duration::ZERO)
    }

    pub fn creation_date(&self) -> Option<OffsetDateTime> {
        rw_read(&self.inner.state, SOURCE, "creation_date").creation_date
    }

    pub fn set_creation_date(&self, at: OffsetDateTime) -> &Self {
        rw_write(&self.inner.state, SOURCE, "set_creation_date").creation_date = Some(at);
        self
    }

    pub fn modification_date(&self) -> Option<OffsetDateTime> {
        rw_read(&self.inner.state, SOURCE, "modification_date").modification_date
    }

    pub fn set_modification_date(&self, at: OffsetDateTime) -> &Self {
        rw_write(&self.inner.state, SOURCE, "set_modification_date").modification_date = Some(at);
        self
    }

    /// Tags in lexical order.
    pub fn tags(&self) -> Vec<String> {
        rw_read(&self.inner.state, SOURCE, "tags")
            .tags
            .iter()
            .cloned()
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        rw_read(&self.inner.state, SOURCE, "has_tag").tags.contains(tag)
    }

    pub fn add_tag(&self, tag: impl Into<String>) -> &Self {
        let tag = tag.into();
        let mut state = rw_write(&self.inner.state, SOURCE, "add_tag");
        state.removed_tags.remove(&tag);
        state.tags.insert(tag);
        self
    }

    pub fn add_tags<I, S>(&self, tags: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.add_tag(tag);
        }
        self
    }

    /// Drop a tag; the next tag write also removes the key from its index.
    pub fn remove_tag(&self, tag: &str) -> &Self {
        let mut state = rw_write(&self.inner.state, SOURCE, "remove_tag");
        if state.tags.remove(tag) {
            state.removed_tags.insert(tag.to_string());
        }
        self
    }

    /// Replace the whole tag set.
    pub fn set_tags<I, S>(&self, tags: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        let mut state = rw_write(&self.inner.state, SOURCE, "set_tags");
        let dropped: Vec<String> = state.tags.difference(&next).cloned().collect();
        state.removed_tags.extend(dropped);
        for tag in &next {
            state.removed_tags.remove(tag);
        }
        state.tags = next;
        self
    }

    /// Tags removed since the last successful tag write.
    pub fn removed_tags(&self) -> Vec<String> {
        rw_read(&self.inner.state, SOURCE, "removed_tags")
            .removed_tags
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn clear_removed_tags(&self) {
        rw_write(&self.inner.state, SOURCE, "clear_removed_tags")
            .removed_tags
            .clear();
    }

    /// Load tags read back from storage without marking anything removed.
    pub(crate) fn load_tags(&self, tags: Vec<String>) {
        let mut state = rw_write(&self.inner.state, SOURCE, "load_tags");
        state.tags = tags.into_iter().collect();
        state.removed_tags.clear();
    }
}

impl fmt::Debug for CacheItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = rw_read(&self.inner.state, SOURCE, "debug");
        f.debug_struct("CacheItem")
            .field("key", &self.inner.key)
            .field("driver", &self.inner.driver)
            .field("hit", &state.hit)
            .field("expiration", &state.expiration)
            .field("tags", &state.tags)
            .finish()
    }
}
