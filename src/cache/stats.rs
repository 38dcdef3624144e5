//! Process-wide read/write counters.
//!
//! Counters live in one process-global slot that [`init`] creates; pools call
//! it on construction. Readers only get a [`StatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use once_cell::sync::OnceCell;

pub(crate) const READ_HITS_METRIC: &str = "cachepool_read_hits_total";
pub(crate) const WRITE_HITS_METRIC: &str = "cachepool_write_hits_total";
pub(crate) const ITEM_HIT_METRIC: &str = "cachepool_item_hit_total";
pub(crate) const ITEM_MISS_METRIC: &str = "cachepool_item_miss_total";
pub(crate) const ITEM_EXPIRED_METRIC: &str = "cachepool_item_expired_total";
pub(crate) const COMMIT_MS_METRIC: &str = "cachepool_commit_ms";

#[derive(Debug, Default)]
struct PoolStats {
    read_hits: AtomicU64,
    write_hits: AtomicU64,
}

static STATS: OnceCell<PoolStats> = OnceCell::new();

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Item resolutions (`get_item` on an unregistered key, `has_item`).
    pub read_hits: u64,
    /// Successful saves, deletes and clears.
    pub write_hits: u64,
}

/// Create the counters if this is the first pool in the process.
pub fn init() {
    STATS.get_or_init(PoolStats::default);
}

/// Current counter values; zero before any pool exists.
pub fn snapshot() -> StatsSnapshot {
    STATS
        .get()
        .map(|stats| StatsSnapshot {
            read_hits: stats.read_hits.load(Ordering::Relaxed),
            write_hits: stats.write_hits.load(Ordering::Relaxed),
        })
        .unwrap_or_default()
}

pub(crate) fn record_read(pool: &'static str) {
    if let Some(stats) = STATS.get() {
        stats.read_hits.fetch_add(1, Ordering::Relaxed);
    }
    counter!(READ_HITS_METRIC, "pool" => pool).increment(1);
}

pub(crate) fn record_write(pool: &'static str) {
    if let Some(stats) = STATS.get() {
        stats.write_hits.fetch_add(1, Ordering::Relaxed);
    }
    counter!(WRITE_HITS_METRIC, "pool" => pool).increment(1);
}

pub(crate) fn record_resolution(pool: &'static str, hit: bool, expired: bool) {
    if expired {
        counter!(ITEM_EXPIRED_METRIC, "pool" => pool).increment(1);
    }
    if hit {
        counter!(ITEM_HIT_METRIC, "pool" => pool).increment(1);
    } else {
        counter!(ITEM_MISS_METRIC, "pool" => pool).increment(1);
    }
}
