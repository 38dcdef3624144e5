//! Cache item pool.
//!
//! A [`CachePool`] manages the lifecycle of cached entries (resolve, expire,
//! delete, deferred batch commit) independently of where the bytes live. Any
//! type implementing [`CacheDriver`] can back a pool.
//!
//! ## Configuration
//!
//! Pool behavior is controlled via `cachepool.toml`:
//!
//! ```toml
//! [cache]
//! default_ttl = 900
//! item_detailed_date = false
//! security_key = "auto"
//! # ... see config.rs for all options
//! ```

mod config;
mod driver;
mod error;
mod events;
mod item;
pub mod keys;
pub(crate) mod lock;
mod pool;
pub mod stats;
pub mod tags;

pub use config::PoolConfig;
pub use driver::CacheDriver;
pub use error::{CacheError, Result};
pub use events::{CacheEvent, Epoch, EventKind, EventQueue, EventSink, NoopSink, TracingSink};
pub use item::{CacheItem, checked_expiry, latest_expiry};
pub use keys::{hash_key, validate_key};
pub use pool::{CachePool, CommitReport};
pub use stats::StatsSnapshot;
