//! File-based locking of an install directory.
//!
//! `kiln create` holds an exclusive lock on `<install-dir>/.kiln.lock` for the
//! whole build, so two processes never interleave writes into one directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::LOCK_FILENAME;

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub install_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum InstallLockError {
  #[error(
    "Install directory is locked by another process: {command} (PID {pid}, started {started_at})\n\
             If you're sure no kiln process is running, remove the lock file:\n  {}",
    lock_path.display()
  )]
  Contention {
    command: String,
    pid: u32,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "Install directory is locked (could not read lock metadata)\n\
             If you're sure no kiln process is running, remove the lock file:\n  {}",
    lock_path.display()
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("Failed to create install directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("Failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("Failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("Failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// An exclusive lock on one install directory, released on drop.
pub struct InstallLock {
  file: File,
  lock_path: PathBuf,
}

impl InstallLock {
  /// Take the lock for `install_dir`, creating the directory if needed.
  ///
  /// Fails immediately with [`InstallLockError::Contention`] if another handle
  /// holds it.
  pub fn acquire(install_dir: &Path, command: &str) -> Result<Self, InstallLockError> {
    let lock_path = install_dir.join(LOCK_FILENAME);

    if !install_dir.exists() {
      std::fs::create_dir_all(install_dir).map_err(InstallLockError::CreateDir)?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(InstallLockError::OpenFile)?;

    if let Err(err) = try_lock(&file) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(&lock_path));
      }
      return Err(InstallLockError::LockFailed(err));
    }

    Self::write_metadata(&file, command, install_dir)?;
    debug!(lock = %lock_path.display(), "acquired install lock");

    Ok(InstallLock { file, lock_path })
  }

  /// Reads the lock metadata through the held handle.
  ///
  /// Opening a second handle would fail on Windows while the lock is held.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  fn write_metadata(file: &File, command: &str, install_dir: &Path) -> Result<(), InstallLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      install_dir: install_dir.to_path_buf(),
    };

    file.set_len(0).map_err(InstallLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
      .map_err(|e| InstallLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(InstallLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path) -> InstallLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        return InstallLockError::Contention {
          command: metadata.command,
          pid: metadata.pid,
          started_at: format!("Unix timestamp {}", metadata.started_at_unix),
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    InstallLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn acquire_creates_directory_and_lock_file() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("cluster");

    let lock = InstallLock::acquire(&dir, "create manifests").unwrap();
    assert!(lock.lock_path().exists());
    assert_eq!(lock.lock_path(), dir.join(LOCK_FILENAME));
  }

  #[test]
  fn lock_metadata_written() {
    let temp = TempDir::new().unwrap();
    let lock = InstallLock::acquire(temp.path(), "create ignition-configs").unwrap();

    let metadata = lock.read_metadata().unwrap();
    assert_eq!(metadata.version, 1);
    assert_eq!(metadata.command, "create ignition-configs");
    assert_eq!(metadata.pid, std::process::id());
    assert_eq!(metadata.install_dir, temp.path());
  }

  #[cfg(unix)]
  #[test]
  fn second_lock_reports_contention() {
    let temp = TempDir::new().unwrap();
    let _held = InstallLock::acquire(temp.path(), "create manifests").unwrap();

    match InstallLock::acquire(temp.path(), "create install-config") {
      Err(InstallLockError::Contention { command, pid, .. }) => {
        assert_eq!(command, "create manifests");
        assert_eq!(pid, std::process::id());
      }
      Err(other) => panic!("expected contention, got {other}"),
      Ok(_) => panic!("second exclusive lock should fail"),
    }
  }

  #[test]
  fn lock_released_on_drop() {
    let temp = TempDir::new().unwrap();
    {
      let _lock = InstallLock::acquire(temp.path(), "first").unwrap();
    }

    let lock = InstallLock::acquire(temp.path(), "second").unwrap();
    assert_eq!(lock.read_metadata().unwrap().command, "second");
  }
}
