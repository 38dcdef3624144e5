//! Cache item pool engine.
//!
//! The pool is the only entry point for callers. It keeps an identity
//! registry (one [`CacheItem`] instance per key for the pool's lifetime), a
//! deferred-save queue, and delegates persistence to its [`CacheDriver`].
//! Expired records are evicted lazily when a read discovers them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use metrics::histogram;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::driver::CacheDriver;
use super::error::{CacheError, Result};
use super::events::{EventKind, EventSink, TracingSink};
use super::item::CacheItem;
use super::keys::validate_key;
use super::lock::{mutex_lock, rw_read, rw_write};
use super::stats;

const SOURCE: &str = "cache::pool";

/// Per-key outcome of a commit pass, in queue order.
#[derive(Debug, Default)]
pub struct CommitReport {
    pub results: Vec<(String, Result<bool>)>,
}

impl CommitReport {
    /// Result of the last attempted save; `false` for an empty queue.
    pub fn last(&self) -> bool {
        matches!(self.results.last(), Some((_, Ok(true))))
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, result)| matches!(result, Ok(true)))
    }

    /// Keys whose save returned false or failed.
    pub fn failed_keys(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, result)| !matches!(result, Ok(true)))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Collapse into the aggregate result: the first error if any save
    /// failed with one, otherwise the last save's outcome.
    pub fn into_result(self) -> Result<bool> {
        let last = self.last();
        match self.results.into_iter().find_map(|(_, result)| result.err()) {
            Some(err) => Err(err),
            None => Ok(last),
        }
    }
}

/// A cache item pool bound to one driver family.
pub struct CachePool<D: CacheDriver> {
    driver: D,
    config: PoolConfig,
    events: Arc<dyn EventSink>,
    registry: RwLock<HashMap<String, CacheItem>>,
    deferred: Mutex<Vec<(String, CacheItem)>>,
}

impl<D: CacheDriver> CachePool<D> {
    /// Create a pool that logs its lifecycle events through `tracing`.
    pub fn new(driver: D, config: PoolConfig) -> Self {
        Self::with_events(driver, config, Arc::new(TracingSink::new()))
    }

    pub fn with_events(driver: D, config: PoolConfig, events: Arc<dyn EventSink>) -> Self {
        stats::init();
        debug!(
            target: "cache::pool",
            pool = driver.name(),
            default_ttl_secs = config.default_ttl().as_secs(),
            item_detailed_date = config.item_detailed_date,
            "Cache pool created"
        );
        Self {
            driver,
            config,
            events,
            registry: RwLock::new(HashMap::new()),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build an unregistered item for this pool with the default TTL applied.
    pub fn new_item(&self, key: &str) -> Result<CacheItem> {
        validate_key(key)?;
        let item = self.driver.build_item(key);
        item.expires_after(self.config.default_ttl());
        self.stamp_dates(&item, None, None);
        Ok(item)
    }

    /// Return the registered instance for `key`, resolving it from the
    /// driver on first access.
    pub fn get_item(&self, key: &str) -> Result<CacheItem> {
        validate_key(key)?;

        let registered = rw_read(&self.registry, SOURCE, "get_item").get(key).cloned();
        let item = match registered {
            Some(item) => {
                self.expire_if_stale(&item);
                item
            }
            None => {
                stats::record_read(self.name());
                let resolved = self.resolve(key)?;
                let mut registry = rw_write(&self.registry, SOURCE, "get_item.register");
                registry.entry(key.to_string()).or_insert(resolved).clone()
            }
        };

        self.events.dispatch(
            self.name(),
            EventKind::GetItem {
                item: item.clone(),
            },
        );
        Ok(item)
    }

    /// Resolve each key, preserving the caller's order. A failing key does
    /// not stop the others.
    pub fn get_items<I, S>(&self, keys: I) -> Vec<(String, Result<CacheItem>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        keys.into_iter()
            .map(|key| {
                let key = key.as_ref();
                (key.to_string(), self.get_item(key))
            })
            .collect()
    }

    /// Whether `key` currently resolves to live data. Counts as a read.
    pub fn has_item(&self, key: &str) -> Result<bool> {
        stats::record_read(self.name());
        Ok(self.get_item(key)?.is_hit())
    }

    /// Register a pre-built item, replacing any registered instance.
    pub fn set_item(&self, item: CacheItem) -> Result<()> {
        self.ensure_family(&item)?;
        validate_key(item.key())?;
        rw_write(&self.registry, SOURCE, "set_item").insert(item.key().to_string(), item);
        Ok(())
    }

    /// Forget every registered item and wipe the driver's namespace.
    pub fn clear(&self) -> Result<bool> {
        let snapshot: Vec<CacheItem> = rw_read(&self.registry, SOURCE, "clear.snapshot")
            .values()
            .cloned()
            .collect();
        let registered = snapshot.len();
        self.events
            .dispatch(self.name(), EventKind::ClearItem { items: snapshot });

        stats::record_write(self.name());
        rw_write(&self.registry, SOURCE, "clear").clear();

        let cleared = self.driver.clear()?;
        info!(
            target: "cache::pool",
            pool = self.name(),
            registered,
            result = if cleared { "cleared" } else { "driver_refused" },
            "Cache pool cleared"
        );
        Ok(cleared)
    }

    /// Delete the stored record for `key` if it is currently a hit.
    pub fn delete_item(&self, key: &str) -> Result<bool> {
        let item = self.get_item(key)?;
        if !item.is_hit() {
            return Ok(false);
        }
        if !self.driver.delete(&item)? {
            return Ok(false);
        }

        item.set_hit(false);
        stats::record_write(self.name());
        self.deregister(&item);
        debug!(target: "cache::pool", pool = self.name(), key, "Cache item deleted");
        Ok(true)
    }

    /// Delete every key. True when at least one deletion succeeded; the
    /// first error, if any, is returned after all keys were attempted.
    pub fn delete_items<I, S>(&self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deleted = false;
        let mut first_error = None;
        for key in keys {
            match self.delete_item(key.as_ref()) {
                Ok(result) => deleted |= result,
                Err(err) => {
                    warn!(
                        target: "cache::pool",
                        pool = self.name(),
                        key = key.as_ref(),
                        error = %err,
                        "Batch delete failed for key"
                    );
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }

    /// Persist `item` now. Marks it hit only when both the payload and the
    /// tag index were written.
    pub fn save(&self, item: &CacheItem) -> Result<bool> {
        self.claim(item, "save")?;
        self.events.dispatch(
            self.name(),
            EventKind::SaveItem {
                item: item.clone(),
            },
        );

        if self.config.item_detailed_date {
            let now = OffsetDateTime::now_utc();
            if item.creation_date().is_none() {
                item.set_creation_date(now);
            }
            item.set_modification_date(now);
        }

        let written = self.driver.write(item)? && self.driver.write_tags(item)?;
        if written {
            item.set_hit(true);
            item.clear_removed_tags();
            stats::record_write(self.name());
            self.dequeue(item, "save.dequeue");
        }
        debug!(
            target: "cache::pool",
            pool = self.name(),
            key = item.key(),
            result = if written { "written" } else { "not_written" },
            "Cache item saved"
        );
        Ok(written)
    }

    /// Queue `item` for the next [`commit`](Self::commit).
    pub fn save_deferred(&self, item: &CacheItem) -> Result<CacheItem> {
        self.claim(item, "save_deferred")?;
        {
            let mut deferred = mutex_lock(&self.deferred, SOURCE, "save_deferred");
            match deferred.iter_mut().find(|(key, _)| key == item.key()) {
                Some(slot) => slot.1 = item.clone(),
                None => deferred.push((item.key().to_string(), item.clone())),
            }
        }
        self.events.dispatch(
            self.name(),
            EventKind::SaveDeferredItem {
                item: item.clone(),
            },
        );
        Ok(item.clone())
    }

    /// Save every queued item and return the last save's outcome.
    ///
    /// Use [`commit_detailed`](Self::commit_detailed) when per-key results
    /// matter; this aggregate ignores all but the last save.
    pub fn commit(&self) -> Result<bool> {
        self.commit_detailed().into_result()
    }

    /// Save every queued item in insertion order. Each entry leaves the
    /// queue right after its save attempt, whatever the outcome.
    pub fn commit_detailed(&self) -> CommitReport {
        let started_at = Instant::now();
        let pending: Vec<(String, CacheItem)> =
            mutex_lock(&self.deferred, SOURCE, "commit.snapshot").clone();

        self.events.dispatch(
            self.name(),
            EventKind::CommitItem {
                items: pending.iter().map(|(_, item)| item.clone()).collect(),
            },
        );

        let mut report = CommitReport::default();
        for (key, item) in pending {
            let result = self.save(&item);
            self.dequeue(&item, "commit.remove");
            report.results.push((key, result));
        }

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(stats::COMMIT_MS_METRIC, "pool" => self.name()).record(elapsed_ms);
        info!(
            target: "cache::pool",
            pool = self.name(),
            attempted = report.results.len(),
            failed = report.failed_keys().len(),
            elapsed_ms,
            "Deferred queue committed"
        );
        report
    }

    /// Live items indexed under `tag`.
    pub fn get_items_by_tag(&self, tag: &str) -> Result<Vec<CacheItem>> {
        let mut items = Vec::new();
        for key in self.driver.tagged_keys(tag)? {
            let item = self.get_item(&key)?;
            if item.is_hit() {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Live items indexed under any of `tags`, without duplicates.
    pub fn get_items_by_tags<I, S>(&self, tags: I) -> Result<Vec<CacheItem>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items: Vec<CacheItem> = Vec::new();
        for tag in tags {
            for item in self.get_items_by_tag(tag.as_ref())? {
                if !items.iter().any(|seen| seen.key() == item.key()) {
                    items.push(item);
                }
            }
        }
        Ok(items)
    }

    pub fn delete_items_by_tag(&self, tag: &str) -> Result<bool> {
        let keys = self.driver.tagged_keys(tag)?;
        self.delete_items(keys)
    }

    pub fn delete_items_by_tags<I, S>(&self, tags: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deleted = false;
        for tag in tags {
            deleted |= self.delete_items_by_tag(tag.as_ref())?;
        }
        Ok(deleted)
    }

    /// Drop `item` from the registry without touching storage.
    pub fn detach_item(&self, item: &CacheItem) {
        self.deregister(item);
    }

    /// Drop every registered item without touching storage.
    pub fn detach_all_items(&self) {
        rw_write(&self.registry, SOURCE, "detach_all_items").clear();
    }

    pub fn is_registered(&self, key: &str) -> bool {
        rw_read(&self.registry, SOURCE, "is_registered").contains_key(key)
    }

    pub fn registered_count(&self) -> usize {
        rw_read(&self.registry, SOURCE, "registered_count").len()
    }

    pub fn deferred_count(&self) -> usize {
        mutex_lock(&self.deferred, SOURCE, "deferred_count").len()
    }

    fn resolve(&self, key: &str) -> Result<CacheItem> {
        let item = self.driver.build_item(key);

        let Some(record) = self.driver.read(&item)? else {
            item.expires_after(self.config.default_ttl());
            self.stamp_dates(&item, None, None);
            stats::record_resolution(self.name(), false, false);
            debug!(target: "cache::pool", pool = self.name(), key, result = "miss", "Cache item resolved");
            return Ok(item);
        };

        item.set(self.driver.unwrap_data(&record)?);
        item.expires_at(self.driver.unwrap_expiration(&record)?);
        if self.config.item_detailed_date {
            // Records written before detailed dating was enabled carry no dates.
            let creation = self.driver.unwrap_creation_date(&record)?;
            let modification = self.driver.unwrap_modification_date(&record)?;
            self.stamp_dates(&item, creation, modification);
        }
        item.load_tags(self.driver.unwrap_tags(&record)?);

        if item.is_expired() {
            self.drop_expired_record(&item);
            stats::record_resolution(self.name(), false, true);
            debug!(target: "cache::pool", pool = self.name(), key, result = "expired", "Cache item resolved");
        } else {
            item.set_hit(true);
            stats::record_resolution(self.name(), true, false);
            debug!(target: "cache::pool", pool = self.name(), key, result = "hit", "Cache item resolved");
        }
        Ok(item)
    }

    /// Registered hit items are re-checked on every read.
    /// Drop the queue entry holding this exact instance, if any.
    fn dequeue(&self, item: &CacheItem, op: &'static str) {
        mutex_lock(&self.deferred, SOURCE, op).retain(|(queued_key, queued)| {
            !(queued_key == item.key() && CacheItem::same_instance(queued, item))
        });
    }

    fn expire_if_stale(&self, item: &CacheItem) {
        if item.is_hit() && item.is_expired() {
            self.drop_expired_record(item);
            item.set_hit(false);
            stats::record_resolution(self.name(), false, true);
        }
    }

    /// Internal delete path: removes the physical record only. The item
    /// stays registered so the caller still gets an instance to refill.
    fn drop_expired_record(&self, item: &CacheItem) {
        if let Err(err) = self.driver.delete(item) {
            warn!(
                target: "cache::pool",
                pool = self.name(),
                key = item.key(),
                error = %err,
                "Failed to remove expired record"
            );
        }
    }

    fn stamp_dates(
        &self,
        item: &CacheItem,
        creation: Option<OffsetDateTime>,
        modification: Option<OffsetDateTime>,
    ) {
        if !self.config.item_detailed_date {
            return;
        }
        let now = OffsetDateTime::now_utc();
        item.set_creation_date(creation.unwrap_or(now));
        item.set_modification_date(modification.unwrap_or(now));
    }

    fn ensure_family(&self, item: &CacheItem) -> Result<()> {
        if item.driver() == self.name() {
            Ok(())
        } else {
            Err(CacheError::TypeMismatch {
                expected: self.name(),
                found: item.driver(),
            })
        }
    }

    /// Register `item` if its key is free; fail if another instance owns it.
    fn claim(&self, item: &CacheItem, op: &'static str) -> Result<()> {
        self.ensure_family(item)?;
        validate_key(item.key())?;
        let mut registry = rw_write(&self.registry, SOURCE, op);
        match registry.entry(item.key().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(item.clone());
                Ok(())
            }
            Entry::Occupied(slot) if CacheItem::same_instance(slot.get(), item) => Ok(()),
            Entry::Occupied(_) => Err(CacheError::IdentityConflict {
                key: item.key().to_string(),
            }),
        }
    }

    fn deregister(&self, item: &CacheItem) {
        let mut registry = rw_write(&self.registry, SOURCE, "deregister");
        if registry
            .get(item.key())
            .is_some_and(|registered| CacheItem::same_instance(registered, item))
        {
            registry.remove(item.key());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::events::EventQueue;
    use crate::drivers::StoredRecord;
    use crate::drivers::memory::MemoryDriver;

    fn pool_with(config: PoolConfig) -> (CachePool<MemoryDriver>, Arc<EventQueue>) {
        let events = Arc::new(EventQueue::new());
        let pool = CachePool::with_events(MemoryDriver::new(), config, events.clone());
        (pool, events)
    }

    fn pool() -> CachePool<MemoryDriver> {
        pool_with(PoolConfig::default()).0
    }

    /// Memory driver that refuses to write `refused` and fails hard on `fatal`.
    #[derive(Default)]
    struct FailingDriver {
        inner: MemoryDriver,
    }

    impl CacheDriver for FailingDriver {
        type Record = StoredRecord;

        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn read(&self, item: &CacheItem) -> Result<Option<StoredRecord>> {
            self.inner.read(item)
        }

        fn write(&self, item: &CacheItem) -> Result<bool> {
            match item.key() {
                "refused" => Ok(false),
                "fatal" => Err(CacheError::io_fatal("/nowhere", "disk gone")),
                _ => self.inner.write(item),
            }
        }

        fn write_tags(&self, item: &CacheItem) -> Result<bool> {
            self.inner.write_tags(item)
        }

        fn delete(&self, item: &CacheItem) -> Result<bool> {
            self.inner.delete(item)
        }

        fn clear(&self) -> Result<bool> {
            self.inner.clear()
        }

        fn unwrap_data(&self, record: &StoredRecord) -> Result<serde_json::Value> {
            self.inner.unwrap_data(record)
        }

        fn unwrap_expiration(&self, record: &StoredRecord) -> Result<OffsetDateTime> {
            self.inner.unwrap_expiration(record)
        }

        fn unwrap_creation_date(&self, record: &StoredRecord) -> Result<Option<OffsetDateTime>> {
            self.inner.unwrap_creation_date(record)
        }

        fn unwrap_modification_date(
            &self,
            record: &StoredRecord,
        ) -> Result<Option<OffsetDateTime>> {
            self.inner.unwrap_modification_date(record)
        }

        fn unwrap_tags(&self, record: &StoredRecord) -> Result<Vec<String>> {
            self.inner.unwrap_tags(record)
        }

        fn tagged_keys(&self, tag: &str) -> Result<Vec<String>> {
            self.inner.tagged_keys(tag)
        }
    }

    fn failing_pool() -> CachePool<FailingDriver> {
        CachePool::new(FailingDriver::default(), PoolConfig::default())
    }

    #[test]
    fn unknown_key_is_a_miss_with_default_ttl() {
        let pool = pool_with(PoolConfig {
            default_ttl: 120,
            ..Default::default()
        })
        .0;

        let item = pool.get_item("fresh").expect("valid key");
        assert!(!item.is_hit());
        assert!(item.ttl() > Duration::from_secs(115));
        assert!(item.ttl() <= Duration::from_secs(120));
    }

    #[test]
    fn huge_default_ttl_still_resolves_a_miss() {
        let pool = pool_with(PoolConfig {
            default_ttl: i64::MAX,
            ..Default::default()
        })
        .0;

        let item = pool.get_item("far").expect("valid key");
        assert!(!item.is_hit());
        assert_eq!(item.expiration(), crate::cache::latest_expiry());
    }

    #[test]
    fn invalid_key_is_rejected() {
        let pool = pool();
        assert!(matches!(
            pool.get_item("a/b"),
            Err(CacheError::InvalidKey { .. })
        ));
        assert!(matches!(pool.get_item(""), Err(CacheError::InvalidKey { .. })));
    }

    #[test]
    fn repeated_gets_return_the_same_instance() {
        let pool = pool();
        let first = pool.get_item("alpha").expect("first");
        let second = pool.get_item("alpha").expect("second");
        assert!(CacheItem::same_instance(&first, &second));
        assert_eq!(pool.registered_count(), 1);
    }

    #[test]
    fn get_items_preserves_caller_order() {
        let pool = pool();
        let items = pool.get_items(["b", "a", "bad/key", "c"]);
        let keys: Vec<&str> = items.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "bad/key", "c"]);
        assert!(items[2].1.is_err());
        assert!(items[3].1.is_ok());
    }

    #[test]
    fn save_marks_hit_and_survives_new_registry() {
        let pool = pool();
        let item = pool.get_item("alpha").expect("item");
        item.set("v1").add_tag("greek");
        assert!(pool.save(&item).expect("save"));
        assert!(item.is_hit());

        pool.detach_all_items();
        let reloaded = pool.get_item("alpha").expect("reload");
        assert!(!CacheItem::same_instance(&item, &reloaded));
        assert!(reloaded.is_hit());
        assert_eq!(reloaded.get(), json!("v1"));
        assert_eq!(reloaded.tags(), vec!["greek"]);
    }

    #[test]
    fn detached_copy_cannot_overwrite_registered_instance() {
        let pool = pool();
        let registered = pool.get_item("alpha").expect("item");
        registered.set("canonical");

        let detached = pool.new_item("alpha").expect("item");
        detached.set("stale");
        assert!(matches!(
            pool.save(&detached),
            Err(CacheError::IdentityConflict { .. })
        ));
        assert!(matches!(
            pool.save_deferred(&detached),
            Err(CacheError::IdentityConflict { .. })
        ));

        assert!(pool.save(&registered).expect("first save"));
        assert!(pool.save(&registered).expect("second save"));
    }

    #[test]
    fn set_item_rejects_foreign_driver_family() {
        let pool = pool();
        let foreign = CacheItem::new("files", "alpha");
        assert!(matches!(
            pool.set_item(foreign),
            Err(CacheError::TypeMismatch {
                expected: "memory",
                found: "files"
            })
        ));

        let own = pool.new_item("alpha").expect("item");
        pool.set_item(own.clone()).expect("registered");
        let fetched = pool.get_item("alpha").expect("item");
        assert!(CacheItem::same_instance(&own, &fetched));
    }

    #[test]
    fn delete_never_resolved_key_returns_false() {
        let pool = pool();
        assert!(!pool.delete_item("ghost").expect("no error"));
    }

    #[test]
    fn delete_hit_deregisters_and_next_get_misses() {
        let pool = pool();
        let item = pool.get_item("alpha").expect("item");
        item.set("v1");
        pool.save(&item).expect("save");

        assert!(pool.delete_item("alpha").expect("delete"));
        assert!(!item.is_hit());
        assert!(!pool.is_registered("alpha"));

        let again = pool.get_item("alpha").expect("item");
        assert!(!CacheItem::same_instance(&item, &again));
        assert!(!again.is_hit());
    }

    #[test]
    fn delete_items_attempts_every_key() {
        let pool = pool();
        for key in ["a", "c"] {
            let item = pool.get_item(key).expect("item");
            item.set(key);
            pool.save(&item).expect("save");
        }

        assert!(pool.delete_items(["a", "b", "c"]).expect("batch"));
        assert!(!pool.has_item("a").expect("a"));
        assert!(!pool.has_item("c").expect("c"));
        assert!(!pool.delete_items(["a", "b"]).expect("batch"));
    }

    #[test]
    fn deferred_commit_persists_and_empties_queue() {
        let (pool, events) = pool_with(PoolConfig::default());
        let a = pool.get_item("a").expect("a");
        a.set(1);
        let b = pool.get_item("b").expect("b");
        b.set(2);

        pool.save_deferred(&a).expect("queue a");
        pool.save_deferred(&b).expect("queue b");
        a.set(10);
        pool.save_deferred(&a).expect("requeue a");
        assert_eq!(pool.deferred_count(), 2);
        assert!(!a.is_hit());

        let report = pool.commit_detailed();
        let keys: Vec<&str> = report.results.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(report.all_succeeded());
        assert_eq!(pool.deferred_count(), 0);

        pool.detach_all_items();
        assert_eq!(pool.get_item("a").expect("a").get(), json!(10));
        assert!(events.names().contains(&"CacheCommitItem"));
    }

    #[test]
    fn immediate_save_takes_the_item_out_of_the_queue() {
        let (pool, events) = pool_with(PoolConfig::default());
        let a = pool.get_item("a").expect("a");
        a.set(1);
        let b = pool.get_item("b").expect("b");
        b.set(2);

        pool.save_deferred(&a).expect("queue a");
        pool.save_deferred(&b).expect("queue b");
        assert!(pool.save(&a).expect("save a"));
        assert_eq!(pool.deferred_count(), 1);

        let report = pool.commit_detailed();
        let keys: Vec<&str> = report.results.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["b"]);
        let saves = events
            .names()
            .into_iter()
            .filter(|name| *name == "CacheSaveItem")
            .count();
        assert_eq!(saves, 2);
    }

    #[test]
    fn refused_immediate_save_keeps_the_queue_entry() {
        let pool = failing_pool();
        let item = pool.get_item("refused").expect("refused");
        pool.save_deferred(&item).expect("queue");

        assert!(!pool.save(&item).expect("save"));
        assert_eq!(pool.deferred_count(), 1);
    }

    #[test]
    fn commit_attempts_every_entry_past_a_refused_save() {
        let pool = failing_pool();
        for key in ["a", "refused", "b"] {
            let item = pool.get_item(key).expect("key");
            item.set(key);
            pool.save_deferred(&item).expect("queue");
        }

        let report = pool.commit_detailed();
        assert_eq!(pool.deferred_count(), 0);
        assert_eq!(report.failed_keys(), vec!["refused"]);
        assert!(report.last());
        assert!(pool.driver().inner.contains("a"));
        assert!(pool.driver().inner.contains("b"));
        assert!(!pool.driver().inner.contains("refused"));
    }

    #[test]
    fn commit_reports_refusal_when_the_last_save_is_refused() {
        let pool = failing_pool();
        for key in ["a", "refused"] {
            let item = pool.get_item(key).expect("key");
            pool.save_deferred(&item).expect("queue");
        }

        assert!(!pool.commit().expect("no error"));
        assert_eq!(pool.deferred_count(), 0);
        assert!(pool.driver().inner.contains("a"));
    }

    #[test]
    fn commit_surfaces_the_first_error_after_trying_everything() {
        let pool = failing_pool();
        for key in ["fatal", "a"] {
            let item = pool.get_item(key).expect("key");
            pool.save_deferred(&item).expect("queue");
        }

        let result = pool.commit();
        assert!(matches!(result, Err(CacheError::IoFatal { .. })));
        assert_eq!(pool.deferred_count(), 0);
        assert!(pool.driver().inner.contains("a"));
        assert!(!pool.get_item("fatal").expect("fatal").is_hit());
    }

    #[test]
    fn empty_commit_reports_false() {
        let pool = pool();
        assert!(!pool.commit().expect("commit"));
    }

    #[test]
    fn expired_registered_item_is_evicted_lazily() {
        let pool = pool_with(PoolConfig {
            default_ttl: 0,
            ..Default::default()
        })
        .0;

        let item = pool.get_item("a").expect("a");
        item.set("v1").expires_after(Duration::ZERO);
        assert!(pool.save(&item).expect("save"));

        let immediate = pool.get_item("a").expect("a");
        assert!(immediate.is_hit());
        assert_eq!(immediate.get(), json!("v1"));

        sleep(Duration::from_millis(1100));

        let later = pool.get_item("a").expect("a");
        assert!(!later.is_hit());
        assert_eq!(later.get(), json!("v1"));
        assert!(!pool.driver().contains("a"));
    }

    #[test]
    fn expired_record_is_a_miss_with_data_on_fresh_registry() {
        let pool = pool();
        let item = pool.get_item("a").expect("a");
        item.set("old");
        item.expires_at(OffsetDateTime::now_utc() - time::Duration::seconds(30));
        pool.save(&item).expect("save");
        pool.detach_all_items();

        let reloaded = pool.get_item("a").expect("a");
        assert!(!reloaded.is_hit());
        assert_eq!(reloaded.get(), json!("old"));
        assert!(!pool.driver().contains("a"));
    }

    #[test]
    fn detailed_dates_roundtrip_only_when_enabled() {
        let pool = pool_with(PoolConfig {
            item_detailed_date: true,
            ..Default::default()
        })
        .0;
        let item = pool.get_item("a").expect("a");
        item.set("v");
        pool.save(&item).expect("save");
        let created = item.creation_date().expect("creation date");
        pool.detach_all_items();

        let reloaded = pool.get_item("a").expect("a");
        assert_eq!(
            reloaded.creation_date().map(OffsetDateTime::unix_timestamp),
            Some(created.unix_timestamp())
        );
        assert!(reloaded.modification_date().is_some());

        let plain = pool_with(PoolConfig::default()).0;
        let undated = plain.get_item("a").expect("a");
        assert!(undated.creation_date().is_none());
    }

    #[test]
    fn tagged_items_can_be_listed_and_deleted() {
        let pool = pool();
        for (key, tag) in [("a", "news"), ("b", "news"), ("c", "sport")] {
            let item = pool.get_item(key).expect("item");
            item.set(key).add_tag(tag);
            pool.save(&item).expect("save");
        }

        let news: Vec<String> = pool
            .get_items_by_tag("news")
            .expect("by tag")
            .iter()
            .map(|item| item.key().to_string())
            .collect();
        assert_eq!(news, vec!["a", "b"]);
        assert_eq!(
            pool.get_items_by_tags(["news", "sport", "news"])
                .expect("by tags")
                .len(),
            3
        );

        assert!(pool.delete_items_by_tag("news").expect("delete"));
        assert!(pool.get_items_by_tag("news").expect("by tag").is_empty());
        assert!(pool.has_item("c").expect("c"));
    }

    #[test]
    fn removed_tag_leaves_the_index_on_next_save() {
        let pool = pool();
        let item = pool.get_item("a").expect("a");
        item.set(1).add_tags(["x", "y"]);
        pool.save(&item).expect("save");

        item.remove_tag("x");
        pool.save(&item).expect("save");
        assert!(item.removed_tags().is_empty());
        assert!(pool.get_items_by_tag("x").expect("x").is_empty());
        assert_eq!(pool.get_items_by_tag("y").expect("y").len(), 1);
    }

    #[test]
    fn clear_empties_registry_and_storage() {
        let (pool, events) = pool_with(PoolConfig::default());
        let item = pool.get_item("a").expect("a");
        item.set(1);
        pool.save(&item).expect("save");

        assert!(pool.clear().expect("clear"));
        assert_eq!(pool.registered_count(), 0);
        assert!(!pool.has_item("a").expect("a"));
        assert!(events.names().contains(&"CacheClearItem"));
    }

    #[test]
    fn lifecycle_events_are_emitted_in_order() {
        let (pool, events) = pool_with(PoolConfig::default());
        let item = pool.get_item("a").expect("a");
        pool.save_deferred(&item).expect("queue");
        pool.commit().expect("commit");

        assert_eq!(
            events.names(),
            vec![
                "CacheGetItem",
                "CacheSaveDeferredItem",
                "CacheCommitItem",
                "CacheSaveItem"
            ]
        );
    }
}
