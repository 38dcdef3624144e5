//! Cache key validation and hashing.
//!
//! Keys are opaque strings, but they end up as file names and index entries,
//! so the pool only accepts path-safe tokens.

use sha2::{Digest, Sha256};

use super::error::{CacheError, Result};

/// Characters reserved by the cache item contract; a key containing any of
/// them is rejected before it reaches a driver.
pub const RESERVED_KEY_CHARS: &[char] = &['{', '}', '(', ')', '/', '\\', '@', ':'];

/// Prefix of the driver-side records that index keys by tag.
pub const TAG_INDEX_PREFIX: &str = "_TAG_";

/// Validate a caller-supplied key.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::invalid_key(key, "key must not be empty"));
    }
    if key.chars().any(|c| RESERVED_KEY_CHARS.contains(&c)) {
        return Err(CacheError::invalid_key(
            key,
            "key contains a reserved character ({}()/\\@:)",
        ));
    }
    if key.chars().any(char::is_control) {
        return Err(CacheError::invalid_key(key, "key contains a control character"));
    }
    if key.starts_with(TAG_INDEX_PREFIX) {
        return Err(CacheError::invalid_key(
            key,
            "keys starting with `_TAG_` are reserved for tag indexes",
        ));
    }
    Ok(())
}

/// Driver-side key of the index record for `tag`.
pub fn tag_index_key(tag: &str) -> String {
    format!("{TAG_INDEX_PREFIX}{tag}")
}

/// Fixed-width lowercase hex digest of `value`.
///
/// Two values sharing a digest are treated as the same entry.
pub fn hash_key(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
