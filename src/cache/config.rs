//! Pool configuration.
//!
//! Options consumed by the pool engine and the filesystem driver. Both the
//! snake_case names and the historical camelCase names are accepted.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

// Default values for pool configuration
const DEFAULT_TTL_SECS: i64 = 900;
const DEFAULT_CHMOD: u32 = 0o777;

/// Pool and driver configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// TTL in seconds given to items that have no stored record. The
    /// absolute value is applied.
    #[serde(alias = "defaultTtl")]
    pub default_ttl: i64,
    /// Populate creation/modification dates on items.
    #[serde(alias = "itemDetailedDate")]
    pub item_detailed_date: bool,
    /// Storage root for file-based drivers.
    pub path: Option<PathBuf>,
    /// Namespace segment isolating deployments; `None`, empty or `auto`
    /// derives it from the execution context.
    #[serde(alias = "securityKey")]
    pub security_key: Option<String>,
    /// Fall back to the temporary root when the storage root is unwritable.
    #[serde(alias = "autoTmpFallback")]
    pub auto_tmp_fallback: bool,
    /// Permission mode used when creating storage directories.
    #[serde(alias = "defaultChmod")]
    pub default_chmod: u32,
    /// Generate an access-restriction marker in the storage root.
    pub htaccess: bool,
    /// Use the lock + rename write path instead of direct writes.
    #[serde(alias = "secureFileManipulation")]
    pub secure_file_manipulation: bool,
    /// Override for the platform temporary directory.
    #[serde(alias = "uploadTmpDir")]
    pub tmp_dir: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            item_detailed_date: false,
            path: None,
            security_key: None,
            auto_tmp_fallback: false,
            default_chmod: DEFAULT_CHMOD,
            htaccess: true,
            secure_file_manipulation: false,
            tmp_dir: None,
        }
    }
}

impl PoolConfig {
    /// Default TTL with the absolute value applied.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl.unsigned_abs())
    }

    /// Directory creation mode, falling back to `0777` when unset.
    pub fn chmod(&self) -> u32 {
        if self.default_chmod == 0 {
            DEFAULT_CHMOD
        } else {
            self.default_chmod
        }
    }

    /// Explicit security key, if one is configured and not `auto`.
    pub fn explicit_security_key(&self) -> Option<&str> {
        self.security_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != "auto")
    }

    /// Configured storage path, ignoring empty values.
    pub fn storage_path(&self) -> Option<&PathBuf> {
        self.path
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}
