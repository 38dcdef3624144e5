//! Storage path derivation for the filesystem driver.
//!
//! Layout: `<root>/<security key>/<backend>/<h[0:2]>/<h[2:4]>/<h>.txt`, where
//! `h` is the hex digest of the cache key. The security key isolates
//! deployments sharing a root; the backend segment isolates drivers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::cache::{CacheError, PoolConfig, Result, hash_key};

use super::policy::FsPolicy;

/// Product segment appended to the temporary directory.
pub const PRODUCT_DIR: &str = "cachepool";
pub const FILE_EXTENSION: &str = "txt";
pub const MARKER_FILE: &str = ".htaccess";
pub const MARKER_CONTENTS: &str = "### This .htaccess is auto-generated by cachepool ###\n\
order deny, allow\n\
deny from all\n\
allow from 127.0.0.1\n";

const UNSAFE_SEGMENT_CHARS: &[char] = &[
    '?', '[', ']', '/', '\\', '=', '<', '>', ':', ';', ',', '\'', '"', '&', '$', '#', '*', '(',
    ')', '|', '~', '`', '!', '{', '}',
];

/// How the process is running, which drives the automatic security key and
/// the default storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Serving requests, optionally for a known host name (`Host` header).
    Served { host: Option<String> },
    /// Command-line execution.
    CommandLine,
}

impl ExecutionContext {
    pub fn served(host: impl Into<String>) -> Self {
        Self::Served {
            host: Some(host.into()),
        }
    }

    pub fn is_served(&self) -> bool {
        matches!(self, Self::Served { .. })
    }
}

/// Platform (or configured) temporary directory plus the product segment.
pub fn base_tmp_root(config: &PoolConfig) -> PathBuf {
    config
        .tmp_dir
        .clone()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(std::env::temp_dir)
        .join(PRODUCT_DIR)
}

/// Security key segment: the configured key, or one derived from `context`.
pub fn security_key(config: &PoolConfig, context: &ExecutionContext) -> String {
    let raw = match (config.explicit_security_key(), context) {
        (Some(key), _) => key.to_string(),
        (None, ExecutionContext::Served { host: Some(host) }) if !host.trim().is_empty() => {
            normalize_host(host)
        }
        (None, ExecutionContext::Served { .. }) => "web".to_string(),
        (None, ExecutionContext::CommandLine) => "cli".to_string(),
    };
    clean_file_name(&raw)
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().to_lowercase().replace(':', "_");
    match host.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => host,
    }
}

/// Replace characters unsafe in a path segment with `-`, then trim dots and
/// dashes from both ends.
pub fn clean_file_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if UNSAFE_SEGMENT_CHARS.contains(&c) { '-' } else { c })
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '-')
        .to_string()
}

/// Resolves, prepares and memoizes the storage root of one driver.
pub struct PathResolver {
    config: PoolConfig,
    context: ExecutionContext,
    install_root: PathBuf,
    backend: &'static str,
    policy: Arc<dyn FsPolicy>,
    resolved: DashMap<String, PathBuf>,
}

impl PathResolver {
    pub fn new(
        config: PoolConfig,
        context: ExecutionContext,
        install_root: PathBuf,
        backend: &'static str,
        policy: Arc<dyn FsPolicy>,
    ) -> Self {
        Self {
            config,
            context,
            install_root,
            backend,
            policy,
            resolved: DashMap::new(),
        }
    }

    pub(crate) fn set_policy(&mut self, policy: Arc<dyn FsPolicy>) {
        self.policy = policy;
        self.resolved.clear();
    }

    pub(crate) fn set_install_root(&mut self, install_root: PathBuf) {
        self.install_root = install_root;
        self.resolved.clear();
    }

    pub fn tmp_root(&self) -> PathBuf {
        base_tmp_root(&self.config)
    }

    pub fn security_key(&self) -> String {
        security_key(&self.config, &self.context)
    }

    /// Root before any filesystem check: base path + security key + backend.
    pub fn effective_root(&self) -> PathBuf {
        let base = match self.config.storage_path() {
            Some(path) => path.clone(),
            None if self.context.is_served() => self.tmp_root(),
            None => self.install_root.clone(),
        };
        base.join(self.security_key()).join(self.backend)
    }

    /// Resolve the storage root.
    ///
    /// A memoized root is trusted for as long as it exists; permissions are
    /// only probed when the root is resolved again.
    ///
    /// In read-only mode nothing is created: an existing writable root is
    /// reported as is, anything else reports the temporary root. Otherwise
    /// the root is created or made writable (falling back to the temporary
    /// root when allowed), and failure is fatal.
    pub fn resolve(&self, read_only: bool) -> Result<PathBuf> {
        let full = self.effective_root();
        let memo_key = hash_key(&full.to_string_lossy());

        let cached = self.resolved.get(&memo_key).map(|entry| entry.value().clone());
        if let Some(cached) = cached {
            if self.policy.exists(&cached) {
                return Ok(cached);
            }
            self.resolved.remove(&memo_key);
        }

        if read_only {
            return Ok(if self.usable(&full) {
                full
            } else {
                self.tmp_root()
            });
        }

        let mode = self.config.chmod();
        let mut target = full;
        if !self.policy.exists(&target) {
            if let Err(err) = self.policy.create_dir_all(&target, mode) {
                debug!(
                    target: "drivers::files::path",
                    path = %target.display(),
                    error = %err,
                    "Failed to create storage root"
                );
            }
        } else if !self.policy.is_writable(&target) {
            if let Err(err) = self.policy.set_mode(&target, mode) {
                debug!(
                    target: "drivers::files::path",
                    path = %target.display(),
                    error = %err,
                    "Failed to chmod storage root"
                );
            }
        }

        if self.config.auto_tmp_fallback && !self.usable(&target) {
            let fallback = self.tmp_root();
            warn!(
                target: "drivers::files::path",
                path = %target.display(),
                fallback = %fallback.display(),
                "Storage root unwritable, falling back to temporary directory"
            );
            target = fallback;
            if !self.policy.exists(&target) {
                if let Err(err) = self.policy.create_dir_all(&target, mode) {
                    debug!(
                        target: "drivers::files::path",
                        path = %target.display(),
                        error = %err,
                        "Failed to create temporary storage root"
                    );
                }
            }
        }

        if !self.usable(&target) {
            return Err(CacheError::io_fatal(
                target,
                format!("mode {mode:04o} or any writable permission is required"),
            ));
        }

        let resolved = self
            .policy
            .canonicalize(&target)
            .map_err(|err| CacheError::io_fatal(&target, err.to_string()))?;
        self.ensure_marker(&resolved)?;
        self.resolved.insert(memo_key, resolved.clone());
        debug!(
            target: "drivers::files::path",
            root = %resolved.display(),
            "Storage root resolved"
        );
        Ok(resolved)
    }

    /// File path for `key`. Shard directories are created unless
    /// `skip_create` is set.
    pub fn file_path(&self, key: &str, skip_create: bool) -> Result<PathBuf> {
        let root = self.resolve(false)?;
        let digest = hash_key(key);
        let first = root.join(&digest[0..2]);
        let second = first.join(&digest[2..4]);

        if !skip_create && !self.policy.exists(&second) {
            let mode = self.config.chmod();
            self.policy
                .create_dir_all(&second, mode)
                .map_err(|err| {
                    CacheError::io_fatal(
                        &second,
                        format!("mode {mode:04o} or any writable permission is required: {err}"),
                    )
                })?;
            self.ensure_marker(&first)?;
            self.ensure_marker(&second)?;
        }

        Ok(second.join(format!("{digest}.{FILE_EXTENSION}")))
    }

    /// Forget memoized roots, e.g. after the root was removed.
    pub fn invalidate(&self) {
        self.resolved.clear();
    }

    fn usable(&self, path: &Path) -> bool {
        self.policy.exists(path) && self.policy.is_writable(path)
    }

    fn ensure_marker(&self, dir: &Path) -> Result<()> {
        if !self.config.htaccess || self.policy.exists(&dir.join(MARKER_FILE)) {
            return Ok(());
        }
        self.policy
            .write_marker(dir, MARKER_FILE, MARKER_CONTENTS)
            .map_err(|err| CacheError::io_fatal(dir, format!("cannot write access marker: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// In-memory filesystem: directories are either writable or not.
    #[derive(Default)]
    struct StubFs {
        dirs: Mutex<HashMap<PathBuf, bool>>,
        files: Mutex<HashSet<PathBuf>>,
        refuse_under: Vec<PathBuf>,
        chmod_calls: Mutex<Vec<(PathBuf, u32)>>,
        writable_checks: AtomicUsize,
    }

    impl StubFs {
        fn refusing(prefix: &str) -> Self {
            Self {
                refuse_under: vec![PathBuf::from(prefix)],
                ..Default::default()
            }
        }

        fn with_dir(self, path: &str, writable: bool) -> Self {
            self.dirs
                .lock()
                .expect("stub lock")
                .insert(PathBuf::from(path), writable);
            self
        }

        fn refused(&self, path: &Path) -> bool {
            self.refuse_under.iter().any(|prefix| path.starts_with(prefix))
        }
    }

    impl FsPolicy for StubFs {
        fn exists(&self, path: &Path) -> bool {
            self.dirs.lock().expect("stub lock").contains_key(path)
                || self.files.lock().expect("stub lock").contains(path)
        }

        fn is_writable(&self, path: &Path) -> bool {
            self.writable_checks.fetch_add(1, Ordering::SeqCst);
            self.dirs
                .lock()
                .expect("stub lock")
                .get(path)
                .copied()
                .unwrap_or(false)
        }

        fn create_dir_all(&self, path: &Path, _mode: u32) -> io::Result<()> {
            if self.refused(path) {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.dirs
                .lock()
                .expect("stub lock")
                .insert(path.to_path_buf(), true);
            Ok(())
        }

        fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
            self.chmod_calls
                .lock()
                .expect("stub lock")
                .push((path.to_path_buf(), mode));
            if self.refused(path) {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.dirs
                .lock()
                .expect("stub lock")
                .insert(path.to_path_buf(), true);
            Ok(())
        }

        fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
            Ok(path.to_path_buf())
        }

        fn write_marker(&self, dir: &Path, name: &str, _contents: &str) -> io::Result<()> {
            self.files.lock().expect("stub lock").insert(dir.join(name));
            Ok(())
        }
    }

    fn config(path: &str) -> PoolConfig {
        PoolConfig {
            path: Some(PathBuf::from(path)),
            security_key: Some("tenant".to_string()),
            tmp_dir: Some(PathBuf::from("/tmpfs")),
            ..Default::default()
        }
    }

    fn resolver(config: PoolConfig, policy: Arc<dyn FsPolicy>) -> PathResolver {
        PathResolver::new(
            config,
            ExecutionContext::CommandLine,
            PathBuf::from("/opt/app"),
            "files",
            policy,
        )
    }

    #[test]
    fn security_key_prefers_explicit_value() {
        let config = PoolConfig {
            security_key: Some("My Site!".to_string()),
            ..Default::default()
        };
        assert_eq!(security_key(&config, &ExecutionContext::CommandLine), "My Site");
    }

    #[test]
    fn security_key_derives_from_host() {
        let config = PoolConfig::default();
        let context = ExecutionContext::served("WWW.Example.com:8080");
        assert_eq!(security_key(&config, &context), "example.com_8080");
    }

    #[test]
    fn security_key_falls_back_to_execution_literal() {
        let config = PoolConfig {
            security_key: Some("auto".to_string()),
            ..Default::default()
        };
        assert_eq!(security_key(&config, &ExecutionContext::CommandLine), "cli");
        assert_eq!(
            security_key(&config, &ExecutionContext::Served { host: None }),
            "web"
        );
    }

    #[test]
    fn clean_file_name_strips_unsafe_characters() {
        assert_eq!(clean_file_name("a/b:c"), "a-b-c");
        assert_eq!(clean_file_name(".hidden."), "hidden");
        assert_eq!(clean_file_name("--x|y--"), "x-y");
        assert_eq!(clean_file_name("  spaced  "), "spaced");
    }

    #[test]
    fn effective_root_composes_segments() {
        let stub = Arc::new(StubFs::default());
        let resolver = resolver(config("/data"), stub);
        assert_eq!(
            resolver.effective_root(),
            PathBuf::from("/data/tenant/files")
        );
        assert_eq!(resolver.tmp_root(), PathBuf::from("/tmpfs/cachepool"));
    }

    #[test]
    fn default_root_depends_on_context() {
        let stub: Arc<dyn FsPolicy> = Arc::new(StubFs::default());
        let mut config = config("");
        config.path = None;

        let cli = resolver(config.clone(), stub.clone());
        assert_eq!(cli.effective_root(), PathBuf::from("/opt/app/tenant/files"));

        let served = PathResolver::new(
            config,
            ExecutionContext::Served { host: None },
            PathBuf::from("/opt/app"),
            "files",
            stub,
        );
        assert_eq!(
            served.effective_root(),
            PathBuf::from("/tmpfs/cachepool/tenant/files")
        );
    }

    #[test]
    fn resolve_creates_root_and_marker() {
        let stub = Arc::new(StubFs::default());
        let resolver = resolver(config("/data"), stub.clone());

        let root = resolver.resolve(false).expect("resolved");
        assert_eq!(root, PathBuf::from("/data/tenant/files"));
        assert!(stub.exists(&root.join(MARKER_FILE)));
    }

    #[test]
    fn resolve_skips_marker_when_disabled() {
        let stub = Arc::new(StubFs::default());
        let mut config = config("/data");
        config.htaccess = false;
        let resolver = resolver(config, stub.clone());

        let root = resolver.resolve(false).expect("resolved");
        assert!(!stub.exists(&root.join(MARKER_FILE)));
    }

    #[test]
    fn unwritable_root_is_chmodded() {
        let stub = Arc::new(StubFs::default().with_dir("/data/tenant/files", false));
        let resolver = resolver(config("/data"), stub.clone());

        resolver.resolve(false).expect("resolved after chmod");
        let calls = stub.chmod_calls.lock().expect("stub lock");
        assert_eq!(calls.as_slice(), &[(PathBuf::from("/data/tenant/files"), 0o777)]);
    }

    #[test]
    fn unwritable_root_falls_back_to_tmp_when_enabled() {
        let stub = Arc::new(StubFs::refusing("/data"));
        let mut config = config("/data");
        config.auto_tmp_fallback = true;
        let resolver = resolver(config, stub);

        assert_eq!(
            resolver.resolve(false).expect("fallback"),
            PathBuf::from("/tmpfs/cachepool")
        );
    }

    #[test]
    fn unwritable_root_without_fallback_is_fatal() {
        let stub = Arc::new(StubFs::refusing("/data"));
        let resolver = resolver(config("/data"), stub);

        match resolver.resolve(false) {
            Err(CacheError::IoFatal { path, reason }) => {
                assert_eq!(path, PathBuf::from("/data/tenant/files"));
                assert!(reason.contains("0777"));
            }
            other => panic!("expected IoFatal, got {other:?}"),
        }
    }

    #[test]
    fn fallback_that_is_also_unwritable_is_fatal() {
        let stub = Arc::new(StubFs {
            refuse_under: vec![PathBuf::from("/data"), PathBuf::from("/tmpfs")],
            ..Default::default()
        });
        let mut config = config("/data");
        config.auto_tmp_fallback = true;
        let resolver = resolver(config, stub);

        assert!(matches!(
            resolver.resolve(false),
            Err(CacheError::IoFatal { path, .. }) if path == PathBuf::from("/tmpfs/cachepool")
        ));
    }

    #[test]
    fn read_only_probe_never_creates() {
        let stub = Arc::new(StubFs::default());
        let resolver = resolver(config("/data"), stub.clone());

        assert_eq!(
            resolver.resolve(true).expect("probe"),
            PathBuf::from("/tmpfs/cachepool")
        );
        assert!(!stub.exists(Path::new("/data/tenant/files")));

        resolver.resolve(false).expect("resolved");
        assert_eq!(
            resolver.resolve(true).expect("probe"),
            PathBuf::from("/data/tenant/files")
        );
    }

    #[test]
    fn file_path_shards_by_digest() {
        let stub = Arc::new(StubFs::default());
        let resolver = resolver(config("/data"), stub.clone());

        let digest = hash_key("alpha");
        let path = resolver.file_path("alpha", false).expect("path");
        let expected = PathBuf::from("/data/tenant/files")
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(format!("{digest}.txt"));
        assert_eq!(path, expected);
        assert!(stub.exists(expected.parent().expect("shard dir")));
        assert_eq!(resolver.file_path("alpha", true).expect("again"), expected);
    }

    #[test]
    fn memoized_root_skips_permission_checks() {
        let stub = Arc::new(StubFs::default());
        let resolver = resolver(config("/data"), stub.clone());

        resolver.resolve(false).expect("resolved");
        let checks = stub.writable_checks.load(Ordering::SeqCst);

        for n in 0..100 {
            resolver.file_path(&format!("key-{n}"), false).expect("path");
        }
        resolver.resolve(true).expect("probe");
        assert_eq!(stub.writable_checks.load(Ordering::SeqCst), checks);
    }

    #[test]
    fn vanished_root_is_resolved_again() {
        let stub = Arc::new(StubFs::default());
        let resolver = resolver(config("/data"), stub.clone());

        let root = resolver.resolve(false).expect("resolved");
        stub.dirs.lock().expect("stub lock").remove(&root);
        stub.files.lock().expect("stub lock").clear();

        assert_eq!(resolver.resolve(false).expect("again"), root);
        assert!(stub.exists(&root));
        assert!(stub.exists(&root.join(MARKER_FILE)));
    }

    #[test]
    fn read_only_file_path_skips_shard_creation() {
        let stub = Arc::new(StubFs::default());
        let resolver = resolver(config("/data"), stub.clone());

        let path = resolver.file_path("beta", true).expect("path");
        assert!(!stub.exists(path.parent().expect("shard dir")));
    }
}
