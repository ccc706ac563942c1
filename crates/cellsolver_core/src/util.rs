//! File helpers shared by the generators and the run-configuration writer.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `content` to `path` through a sibling temporary file and a rename.
///
/// A reader never observes a half-written file, even if the process is
/// interrupted during the write.
pub fn atomic_write(path: &Path, content: impl AsRef<[u8]>) -> io::Result<()> {
    let temp = temp_path(path);
    fs::write(&temp, content)?;
    fs::rename(&temp, path)
}

/// Remove `path` if it exists. Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
