//! Exclusive lock on the scanner's vulnerability database cache.
//!
//! The cache directory is shared by every scan on the machine, including
//! scans from concurrent pipeline runs. A scan takes the lock before invoking
//! the scanner and holds it until the scanner exits, so only one process
//! refreshes the database at a time. Unlike a store lock, contention is not an
//! error here: waiters block until the holder releases.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub acquired_at_unix: u64,
  pub cache_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum CacheLockError {
  #[error("failed to create scan cache directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("lock task failed: {0}")]
  Join(String),
}

/// Held for as long as the cache is in use; released on drop.
#[derive(Debug)]
pub struct CacheLock {
  file: File,
  lock_path: PathBuf,
}

impl CacheLock {
  /// Block until the cache at `cache_dir` is exclusively ours.
  pub fn acquire_blocking(cache_dir: &Path) -> Result<Self, CacheLockError> {
    std::fs::create_dir_all(cache_dir).map_err(|source| CacheLockError::CreateDir {
      path: cache_dir.to_path_buf(),
      source,
    })?;

    let lock_path = cache_dir.join(LOCK_FILENAME);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(CacheLockError::OpenFile)?;

    if let Err(err) = try_lock(&file) {
      if err.kind() != io::ErrorKind::WouldBlock {
        return Err(CacheLockError::LockFailed(err));
      }
      info!(lock = %lock_path.display(), "scan cache is locked, waiting");
      lock(&file).map_err(CacheLockError::LockFailed)?;
    }

    write_metadata(&file, cache_dir)?;
    debug!(lock = %lock_path.display(), "scan cache lock acquired");

    Ok(Self { file, lock_path })
  }

  /// Async wrapper that waits for the lock on the blocking pool.
  pub async fn acquire(cache_dir: &Path) -> Result<Self, CacheLockError> {
    let cache_dir = cache_dir.to_path_buf();
    tokio::task::spawn_blocking(move || Self::acquire_blocking(&cache_dir))
      .await
      .map_err(|e| CacheLockError::Join(e.to_string()))?
  }

  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, cache_dir: &Path) -> Result<(), CacheLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    acquired_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    cache_dir: cache_dir.to_path_buf(),
  };

  file.set_len(0).map_err(CacheLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata)
    .map_err(|e| CacheLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(CacheLockError::WriteMetadata)?;

  Ok(())
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  flock(file, rustix::fs::FlockOperation::NonBlockingLockExclusive)
}

#[cfg(unix)]
fn lock(file: &File) -> io::Result<()> {
  flock(file, rustix::fs::FlockOperation::LockExclusive)
}

#[cfg(unix)]
fn flock(file: &File, operation: rustix::fs::FlockOperation) -> io::Result<()> {
  use std::os::unix::io::AsFd;

  rustix::fs::flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};
  lock_file_ex(file, LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY)
}

#[cfg(windows)]
fn lock(file: &File) -> io::Result<()> {
  use windows_sys::Win32::Storage::FileSystem::LOCKFILE_EXCLUSIVE_LOCK;
  lock_file_ex(file, LOCKFILE_EXCLUSIVE_LOCK)
}

#[cfg(windows)]
fn lock_file_ex(file: &File, flags: u32) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::LockFileEx;

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
      return Err(io::Error::from(io::ErrorKind::WouldBlock));
    }
    Err(err)
  } else {
    Ok(())
  }
}
