//! Single-instance advisory lock.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::utils::fs::{ensure_dir_all_sync, io_error};
use crate::{Error, Result};

/// Exclusive lock on a file holding the owner's process id.
///
/// Released on [`InstanceLock::release`] or drop. The file itself is left in
/// place; only the advisory lock matters.
#[derive(Debug)]
pub struct InstanceLock {
    file: Option<File>,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock, failing with [`Error::InstanceLocked`] when another
    /// process holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir_all_sync(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error("opening lock file", &path, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(Error::InstanceLocked(path));
        }

        write_pid(&mut file).map_err(|e| io_error("writing lock file", &path, e))?;
        info!(path = %path.display(), pid = std::process::id(), "Acquired instance lock");

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock. Calling it twice is a no-op.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            match FileExt::unlock(&file) {
                Ok(()) => debug!(path = %self.path.display(), "Released instance lock"),
                Err(e) => warn!(path = %self.path.display(), "Failed to release instance lock: {}", e),
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn write_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        assert!(lock.is_held());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_fails_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bot.lock");

        let mut first = InstanceLock::acquire(&path).unwrap();
        match InstanceLock::acquire(&path) {
            Err(Error::InstanceLocked(locked)) => assert_eq!(locked, path),
            other => panic!("expected InstanceLocked, got {other:?}"),
        }

        first.release();
        assert!(!first.is_held());
        first.release();

        let second = InstanceLock::acquire(&path).unwrap();
        drop(second);
        assert!(InstanceLock::acquire(&path).is_ok());
    }
}
