//! Named per-module locks.
//!
//! Kernel module state is system-wide, so two harness runs must never cycle
//! the same module at once. A [`ModuleLock`] holds an exclusive `flock(2)` on
//! `<dir>/kmodharness-<name>.lock`. Every acquisition opens its own file
//! description, so the lock excludes other processes and other threads of
//! this process alike. The lock is released when the guard is dropped.
//!
//! Waiting for a contended lock polls a non-blocking `flock` so that a
//! [`CancelToken`] can end the wait.

use crate::artifact::normalize_name;
use crate::common::{CancelToken, HarnessError, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Delay between attempts on a contended lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// RAII guard for an acquired module lock.
#[derive(Debug)]
pub struct ModuleLock {
    file: File,
    path: PathBuf,
    name: String,
}

impl ModuleLock {
    /// Waits until the lock for `name` is held.
    ///
    /// Returns `Cancelled` if `cancel` fires while another holder has it.
    pub fn acquire(dir: impl AsRef<Path>, name: &str, cancel: &CancelToken) -> Result<Self> {
        let dir = dir.as_ref();
        let file = Self::open(dir, name)?;
        let mut waiting = false;
        loop {
            if Self::try_flock(&file, dir, name)? {
                return Ok(Self::held(file, dir, name));
            }
            if cancel.is_cancelled() {
                return Err(HarnessError::Cancelled);
            }
            if !waiting {
                log::info!("waiting for module lock {}", Self::path_for(dir, name).display());
                waiting = true;
            }
            thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Takes the lock for `name` if it is free, returning `None` when another
    /// holder has it.
    pub fn try_acquire(dir: impl AsRef<Path>, name: &str) -> Result<Option<Self>> {
        let dir = dir.as_ref();
        let file = Self::open(dir, name)?;
        if Self::try_flock(&file, dir, name)? {
            Ok(Some(Self::held(file, dir, name)))
        } else {
            Ok(None)
        }
    }

    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("kmodharness-{}.lock", normalize_name(name)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(dir: &Path, name: &str) -> Result<File> {
        let path = Self::path_for(dir, name);
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| HarnessError::io(format!("opening lock {}", path.display()), e))
    }

    /// One non-blocking attempt. `Ok(false)` means another holder has the lock.
    fn try_flock(file: &File, dir: &Path, name: &str) -> Result<bool> {
        loop {
            // SAFETY: the descriptor belongs to `file`, which is alive for the call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(false),
                _ => {
                    let path = Self::path_for(dir, name);
                    return Err(HarnessError::io(format!("locking {}", path.display()), err));
                }
            }
        }
    }

    fn held(file: File, dir: &Path, name: &str) -> Self {
        let path = Self::path_for(dir, name);
        log::debug!("acquired module lock {}", path.display());
        Self {
            file,
            path,
            name: normalize_name(name),
        }
    }
}

impl Drop for ModuleLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        log::debug!("released module lock {}", self.path.display());
    }
}
