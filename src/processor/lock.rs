//! Advisory lock held while a processor drains its queue.
//!
//! Cooperating processors take the lock before each burst so that two of
//! them never interleave pops from the same queue. Within one process an
//! in-process mutex is enough; across processes on one host an exclusive
//! lock on a shared lock file is used.
//!
//! # Safety
//! - A burst lock is released when its guard is dropped
//! - The lock file is created if it doesn't exist and is never truncated

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mutual exclusion for drain bursts.
#[derive(Debug, Clone)]
pub enum BurstLock {
    /// Shared by processors running in this process. Clones share the mutex.
    InProcess(Arc<Mutex<()>>),
    /// Exclusive lock on a file, shared by processes on one host.
    File(PathBuf),
}

/// Held for the duration of one burst.
#[derive(Debug)]
pub enum BurstGuard<'a> {
    /// Guard of the in-process mutex.
    InProcess(MutexGuard<'a, ()>),
    /// The locked file; closing it releases the lock.
    File(File),
}

impl Default for BurstLock {
    fn default() -> Self {
        Self::in_process()
    }
}

impl BurstLock {
    /// A fresh in-process lock. Share it between processors by cloning.
    #[must_use]
    pub fn in_process() -> Self {
        Self::InProcess(Arc::new(Mutex::new(())))
    }

    /// A lock on `path`, created on first use.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Block until the lock is held.
    pub fn acquire(&self) -> IoResult<BurstGuard<'_>> {
        match self {
            Self::InProcess(mutex) => Ok(BurstGuard::InProcess(
                mutex.lock().unwrap_or_else(PoisonError::into_inner),
            )),
            Self::File(path) => {
                let file = open_lock_file(path)?;
                lock_file(&file, true)?;
                Ok(BurstGuard::File(file))
            }
        }
    }

    /// Take the lock if nobody holds it.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another holder has the lock
    pub fn try_acquire(&self) -> IoResult<BurstGuard<'_>> {
        match self {
            Self::InProcess(mutex) => match mutex.try_lock() {
                Ok(guard) => Ok(BurstGuard::InProcess(guard)),
                Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                    Ok(BurstGuard::InProcess(poisoned.into_inner()))
                }
                Err(std::sync::TryLockError::WouldBlock) => Err(IoError::new(
                    ErrorKind::WouldBlock,
                    "burst lock is held by another processor",
                )),
            },
            Self::File(path) => {
                let file = open_lock_file(path)?;
                lock_file(&file, false)?;
                Ok(BurstGuard::File(file))
            }
        }
    }
}

fn open_lock_file(path: &Path) -> IoResult<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

#[cfg(unix)]
fn lock_file(file: &File, wait: bool) -> IoResult<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let flags = if wait {
        libc::LOCK_EX
    } else {
        libc::LOCK_EX | libc::LOCK_NB
    };
    // SAFETY: `fd` is a valid descriptor owned by `file` for this call.
    let result = unsafe { libc::flock(fd, flags) };

    if result != 0 {
        let errno = IoError::last_os_error();
        if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                "burst lock is held by another process",
            ));
        }
        return Err(errno);
    }

    Ok(())
}

#[cfg(windows)]
fn lock_file(file: &File, wait: bool) -> IoResult<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };

    let handle = file.as_raw_handle() as HANDLE;
    let flags = if wait {
        LOCKFILE_EXCLUSIVE_LOCK
    } else {
        LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY
    };
    // SAFETY: `handle` is owned by `file`; `overlapped` outlives the call.
    let result = unsafe {
        let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
        LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
    };

    if result == 0 {
        let err = IoError::last_os_error();
        return Err(IoError::new(
            ErrorKind::WouldBlock,
            format!("burst lock is held by another process: {err}"),
        ));
    }

    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn lock_file(_file: &File, _wait: bool) -> IoResult<()> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        "file locking not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_in_process_lock_excludes_clones() {
        let lock = BurstLock::in_process();
        let other = lock.clone();

        let guard = lock.acquire().unwrap();
        let err = other.try_acquire().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        drop(guard);
        assert!(other.try_acquire().is_ok());
    }

    #[test]
    fn test_file_lock_acquire_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkwarden.lock");
        let lock = BurstLock::file(&path);

        {
            let _guard = lock.acquire().unwrap();
            assert!(path.exists());
        }
        // Released on drop
        assert!(lock.try_acquire().is_ok());
    }

    #[test]
    fn test_file_lock_prevents_double_acquire() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkwarden.lock");
        let first = BurstLock::file(&path);
        let second = BurstLock::file(&path);

        let _guard = first.acquire().unwrap();
        let err = second.try_acquire().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_blocking_acquire_waits_for_release() {
        let lock = BurstLock::in_process();
        let guard = lock.acquire().unwrap();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _guard = lock.acquire().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.join().unwrap();
    }
}
