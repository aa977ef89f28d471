//! Materialization of asset files into the install directory.
//!
//! Files are written in filename order. Each write goes to a sibling temp file
//! that is then renamed over the destination, and a destination whose bytes
//! already match is left alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::asset::File;
use crate::asset::file::{sort_files, validate_relative};

/// Errors raised while persisting files.
#[derive(Debug, Error)]
pub enum PersistError {
  #[error("refusing to write {path:?} outside the install directory")]
  InvalidPath { path: String },

  #[error("failed to create directory {}: {source}", path.display())]
  CreateDir { path: PathBuf, source: io::Error },

  #[error("failed to write {}: {source}", path.display())]
  Write { path: PathBuf, source: io::Error },
}

/// What a persistence pass did, by filename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
  /// Files created or replaced.
  pub written: Vec<String>,
  /// Files whose on-disk content already matched.
  pub unchanged: Vec<String>,
}

/// Map a forward-slash filename onto `root`.
fn destination(root: &Path, filename: &str) -> PathBuf {
  filename.split('/').fold(root.to_path_buf(), |path, part| path.join(part))
}

/// Write `files` under `root`, sorted by filename.
///
/// # Errors
///
/// Stops at the first file that cannot be written. Files written before the
/// failure stay on disk.
pub fn write_files(root: &Path, files: &[File]) -> Result<WriteReport, PersistError> {
  let mut sorted = files.to_vec();
  sort_files(&mut sorted);

  let mut report = WriteReport::default();
  for file in &sorted {
    validate_relative(&file.filename).map_err(|_| PersistError::InvalidPath {
      path: file.filename.clone(),
    })?;

    let path = destination(root, &file.filename);
    if fs::read(&path).is_ok_and(|existing| existing == file.data) {
      trace!(file = %file.filename, "unchanged");
      report.unchanged.push(file.filename.clone());
      continue;
    }

    write_atomic(&path, &file.data)?;
    debug!(file = %file.filename, bytes = file.data.len(), "wrote file");
    report.written.push(file.filename.clone());
  }

  Ok(report)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PersistError> {
  let parent = path.parent().unwrap_or(Path::new("."));
  fs::create_dir_all(parent).map_err(|source| PersistError::CreateDir {
    path: parent.to_path_buf(),
    source,
  })?;

  let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
  let temp_path = parent.join(format!(".{name}.tmp"));
  let write_err = |source| PersistError::Write {
    path: path.to_path_buf(),
    source,
  };

  fs::write(&temp_path, data).map_err(write_err)?;
  if let Err(e) = fs::rename(&temp_path, path) {
    let _ = fs::remove_file(&temp_path);
    return Err(write_err(e));
  }
  Ok(())
}
