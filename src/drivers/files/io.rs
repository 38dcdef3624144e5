//! Record file I/O.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use tracing::warn;
use uuid::Uuid;

use crate::cache::{CacheError, EventKind, EventSink, Result};

/// Prefix of in-flight temporary files written next to their target.
pub const TMP_PREFIX: &str = "tmp_";

/// Write `data` to `path`, announcing the write first.
///
/// Atomic mode writes a uniquely named sibling under an exclusive advisory
/// lock and renames it over `path`, so readers never observe a partial file.
/// Returns whether the payload was written.
pub fn write_file(
    events: &dyn EventSink,
    pool: &'static str,
    path: &Path,
    data: &[u8],
    atomic: bool,
) -> Result<bool> {
    events.dispatch(
        pool,
        EventKind::WriteFileOnDisk {
            path: path.to_path_buf(),
            atomic,
        },
    );

    if atomic {
        write_atomic(path, data)
    } else {
        write_direct(path, data)
    }
}

fn write_direct(path: &Path, data: &[u8]) -> Result<bool> {
    let written = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .and_then(|mut file| file.write_all(data));

    match written {
        Ok(()) => Ok(true),
        Err(err) => {
            warn!(
                target: "drivers::files::io",
                path = %path.display(),
                error = %err,
                "Direct write failed"
            );
            Ok(false)
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<bool> {
    let dir = path
        .parent()
        .ok_or_else(|| CacheError::io_fatal(path, "record path has no parent directory"))?;
    let tmp = dir.join(format!("{TMP_PREFIX}{}", Uuid::new_v4().simple()));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .map_err(|err| CacheError::io_fatal(&tmp, format!("cannot create temporary file: {err}")))?;
    file.lock()
        .map_err(|err| CacheError::io_fatal(&tmp, format!("cannot acquire exclusive lock: {err}")))?;

    let written = file.write_all(data).and_then(|()| file.flush());
    if let Err(err) = file.unlock() {
        warn!(
            target: "drivers::files::io",
            path = %tmp.display(),
            error = %err,
            "Failed to release advisory lock"
        );
    }
    drop(file);

    if let Err(err) = written {
        warn!(
            target: "drivers::files::io",
            path = %tmp.display(),
            error = %err,
            "Atomic write failed before rename"
        );
        return Ok(false);
    }

    // On failure the temporary file stays behind for external cleanup.
    fs::rename(&tmp, path).map_err(|err| {
        CacheError::io_fatal(
            path,
            format!("cannot rename {} into place: {err}", tmp.display()),
        )
    })?;
    Ok(true)
}

/// Read a record file; a missing file is `None`.
pub fn read_file(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Remove a record file; a missing file is `false`.
pub fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}
