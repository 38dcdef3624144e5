//! Storage driver contract.
//!
//! The pool never builds or parses a driver's raw record itself: it reads a
//! record, then asks the driver to unwrap each field.

use serde_json::Value;
use time::OffsetDateTime;

use super::error::Result;
use super::item::CacheItem;

/// A storage backend the pool can delegate persistence to.
///
/// `read` must return `Ok(None)` for a missing key, never an empty record,
/// so the pool can tell "absent" apart from "stored empty payload".
pub trait CacheDriver: Send + Sync {
    /// Driver-specific raw record.
    type Record;

    /// Driver family name; also used as the backend path segment.
    fn name(&self) -> &'static str;

    /// Build a fresh item of this driver family.
    fn build_item(&self, key: &str) -> CacheItem {
        CacheItem::new(self.name(), key)
    }

    fn read(&self, item: &CacheItem) -> Result<Option<Self::Record>>;

    /// Persist payload, expiration, dates and tags.
    fn write(&self, item: &CacheItem) -> Result<bool>;

    /// Update the tag indexes for `item`, including removed tags.
    fn write_tags(&self, item: &CacheItem) -> Result<bool>;

    /// Remove the physical record. Never touches any pool registry.
    fn delete(&self, item: &CacheItem) -> Result<bool>;

    /// Remove every record in this driver's namespace.
    fn clear(&self) -> Result<bool>;

    fn unwrap_data(&self, record: &Self::Record) -> Result<Value>;

    fn unwrap_expiration(&self, record: &Self::Record) -> Result<OffsetDateTime>;

    fn unwrap_creation_date(&self, record: &Self::Record) -> Result<Option<OffsetDateTime>>;

    fn unwrap_modification_date(&self, record: &Self::Record) -> Result<Option<OffsetDateTime>>;

    fn unwrap_tags(&self, record: &Self::Record) -> Result<Vec<String>>;

    /// Keys currently indexed under `tag` whose entries have not expired.
    fn tagged_keys(&self, tag: &str) -> Result<Vec<String>>;
}
