//! Advisory lock guarding one database directory.

use fs2::FileExt;
use keel_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Name of the lock file inside the database directory.
pub const LOCK_FILE: &str = "keel.lock";

/// Exclusive lock held for as long as a database is open.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Takes the lock, failing with `DatabaseLocked` if another handle holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|err| {
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                Error::DatabaseLocked {
                    path: dir.display().to_string(),
                }
            } else {
                Error::from(err)
            }
        })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
