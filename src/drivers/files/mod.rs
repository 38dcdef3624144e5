//! Filesystem storage driver.
//!
//! One JSON record file per key, sharded under a per-deployment root. See
//! [`path`] for the layout and [`io`] for the write strategies.

pub mod io;
pub mod path;
pub mod policy;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::cache::{CacheDriver, CacheItem, EventSink, NoopSink, PoolConfig, Result};

use super::{RecordStore, StoredRecord};

pub use path::{ExecutionContext, PathResolver};
pub use policy::{FsPolicy, OsFs};

const DRIVER_NAME: &str = "files";

pub struct FilesDriver {
    config: PoolConfig,
    resolver: PathResolver,
    events: Arc<dyn EventSink>,
}

impl FilesDriver {
    /// Driver on the real filesystem. The install root used for command-line
    /// defaults is the directory of the running executable.
    pub fn new(config: PoolConfig, context: ExecutionContext) -> Self {
        let resolver = PathResolver::new(
            config.clone(),
            context,
            default_install_root(),
            DRIVER_NAME,
            Arc::new(OsFs),
        );
        Self {
            config,
            resolver,
            events: Arc::new(NoopSink),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn FsPolicy>) -> Self {
        self.resolver.set_policy(policy);
        self
    }

    /// Sink receiving `CacheWriteFileOnDisk` notifications.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_install_root(mut self, install_root: impl Into<PathBuf>) -> Self {
        self.resolver.set_install_root(install_root.into());
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Storage root, created if needed.
    pub fn root(&self) -> Result<PathBuf> {
        self.resolver.resolve(false)
    }

    /// Storage root as it currently stands, without creating anything.
    pub fn probe_root(&self) -> Result<PathBuf> {
        self.resolver.resolve(true)
    }

    /// Record file for `key`, without creating shard directories.
    pub fn file_path(&self, key: &str) -> Result<PathBuf> {
        self.resolver.file_path(key, true)
    }
}

fn default_install_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl RecordStore for FilesDriver {
    fn load(&self, key: &str) -> Result<Option<StoredRecord>> {
        let path = self.resolver.file_path(key, true)?;
        io::read_file(&path)?
            .map(|bytes| StoredRecord::decode(key, &bytes))
            .transpose()
    }

    fn store(&self, record: &StoredRecord) -> Result<bool> {
        let path = self.resolver.file_path(record.key(), false)?;
        let bytes = record.encode()?;
        io::write_file(
            self.events.as_ref(),
            DRIVER_NAME,
            &path,
            &bytes,
            self.config.secure_file_manipulation,
        )
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let path = self.resolver.file_path(key, true)?;
        io::remove_file(&path)
    }
}

impl CacheDriver for FilesDriver {
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
        let root = self.resolver.resolve(false)?;
        let removed = match std::fs::remove_dir_all(&root) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(
                    target: "drivers::files",
                    root = %root.display(),
                    error = %err,
                    "Failed to remove storage root"
                );
                false
            }
        };
        self.resolver.invalidate();
        if removed {
            info!(target: "drivers::files", root = %root.display(), "Storage root cleared");
            self.resolver.resolve(false)?;
        }
        Ok(removed)
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
