//! Filesystem side effects used while preparing storage directories.
//!
//! Existence/permission probes, directory creation, `chmod` and marker-file
//! generation all go through [`FsPolicy`] so path resolution can run against
//! a stub in tests.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub trait FsPolicy: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Whether new files can be created in (or written to) `path`.
    fn is_writable(&self, path: &Path) -> bool;

    /// Create `path` and its missing parents with permission `mode`.
    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    /// Create `dir/name` with `contents` unless it already exists.
    fn write_marker(&self, dir: &Path, name: &str, contents: &str) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

impl FsPolicy for OsFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_writable(&self, path: &Path) -> bool {
        if path.is_dir() {
            // Permission bits lie for privileged users and ACLs; probe instead.
            tempfile::Builder::new()
                .prefix(".cachepool-probe")
                .tempfile_in(path)
                .is_ok()
        } else {
            OpenOptions::new().append(true).open(path).is_ok()
        }
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(path)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            let mut permissions = fs::metadata(path)?.permissions();
            permissions.set_readonly(false);
            fs::set_permissions(path, permissions)
        }
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn write_marker(&self, dir: &Path, name: &str, contents: &str) -> io::Result<()> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(name))
        {
            Ok(mut file) => file.write_all(contents.as_bytes()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err),
        }
    }
}
