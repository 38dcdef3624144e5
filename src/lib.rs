//! Driver-pluggable cache item pool with a filesystem backend.
//!
//! [`cache::CachePool`] owns item lifecycle (resolution, expiry, deferred
//! commits, tags); [`drivers`] provide storage. The filesystem driver keeps
//! one record file per key under a per-deployment root.

pub mod cache;
pub mod config;
pub mod drivers;
pub mod error;
pub mod infra;
