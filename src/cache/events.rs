//! Pool lifecycle notifications.
//!
//! The pool and its drivers publish a [`CacheEvent`] at each lifecycle step.
//! Sinks are fire-and-forget: they cannot fail and their outcome never
//! changes control flow.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use super::item::CacheItem;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// A lifecycle notification.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier (UUIDv4).
    pub id: Uuid,
    /// Monotonic epoch assigned by the publishing sink.
    pub epoch: Epoch,
    /// Driver family of the publishing pool.
    pub pool: &'static str,
    /// What happened.
    pub kind: EventKind,
    /// When the event was created.
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(pool: &'static str, kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            pool,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Event payloads. Items are shared handles, not copies.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// An item was resolved by `get_item`.
    GetItem { item: CacheItem },
    /// The pool was cleared; carries the registry snapshot.
    ClearItem { items: Vec<CacheItem> },
    /// An item is about to be persisted.
    SaveItem { item: CacheItem },
    /// An item was queued for the next commit.
    SaveDeferredItem { item: CacheItem },
    /// The deferred queue is about to be committed.
    CommitItem { items: Vec<CacheItem> },
    /// A driver is about to write a file.
    WriteFileOnDisk { path: PathBuf, atomic: bool },
}

impl EventKind {
    /// Stable notification name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetItem { .. } => "CacheGetItem",
            Self::ClearItem { .. } => "CacheClearItem",
            Self::SaveItem { .. } => "CacheSaveItem",
            Self::SaveDeferredItem { .. } => "CacheSaveDeferredItem",
            Self::CommitItem { .. } => "CacheCommitItem",
            Self::WriteFileOnDisk { .. } => "CacheWriteFileOnDisk",
        }
    }

    /// Keys carried by the payload, in payload order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::GetItem { item } | Self::SaveItem { item } | Self::SaveDeferredItem { item } => {
                vec![item.key()]
            }
            Self::ClearItem { items } | Self::CommitItem { items } => {
                items.iter().map(CacheItem::key).collect()
            }
            Self::WriteFileOnDisk { .. } => Vec::new(),
        }
    }
}

/// Receiver of pool notifications.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, pool: &'static str, kind: EventKind);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn dispatch(&self, _pool: &'static str, _kind: EventKind) {}
}

/// Logs each notification at debug level.
#[derive(Debug, Default)]
pub struct TracingSink {
    epoch_counter: AtomicU64,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for TracingSink {
    fn dispatch(&self, pool: &'static str, kind: EventKind) {
        let epoch = self.epoch_counter.fetch_add(1, Ordering::SeqCst);
        debug!(
            target: "cache::events",
            pool,
            event_epoch = epoch,
            event_name = kind.name(),
            keys = ?kind.keys(),
            "Pool event dispatched"
        );
    }
}

/// In-memory event queue.
///
/// Records every notification so callers (and tests) can inspect what the
/// pool did. Uses a mutex since contention is expected to be low.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    /// Create a new empty event queue.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    /// Get the next epoch number.
    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    /// Names of the queued events, oldest first, without draining.
    pub fn names(&self) -> Vec<&'static str> {
        mutex_lock(&self.queue, SOURCE, "names")
            .iter()
            .map(|event| event.kind.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventQueue {
    fn dispatch(&self, pool: &'static str, kind: EventKind) {
        let event = CacheEvent::new(pool, kind, self.next_epoch());

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_name = event.kind.name(),
            pool,
            "Pool event recorded"
        );

        mutex_lock(&self.queue, SOURCE, "dispatch").push_back(event);
    }
}
