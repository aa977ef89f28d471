use std::fmt;

use super::fetch::FetchError;

/// One unit of persisted output: a path relative to the install directory and
/// its byte payload.
///
/// Filenames always use forward slashes, independent of the host platform.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct File {
  pub filename: String,
  pub data: Vec<u8>,
}

impl File {
  pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
    Self {
      filename: filename.into(),
      data: data.into(),
    }
  }

  /// The payload as UTF-8, if it is valid UTF-8.
  pub fn text(&self) -> Option<&str> {
    std::str::from_utf8(&self.data).ok()
  }
}

impl fmt::Debug for File {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("File")
      .field("filename", &self.filename)
      .field("len", &self.data.len())
      .finish()
  }
}

/// Checks that a filename or pattern stays inside the install directory.
///
/// Rejects empty names, absolute paths, backslashes and `.`/`..` components.
pub fn validate_relative(path: &str) -> Result<(), FetchError> {
  let invalid = || FetchError::InvalidPath { path: path.to_string() };

  if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains(':') {
    return Err(invalid());
  }
  if path.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
    return Err(invalid());
  }
  Ok(())
}

/// Sorts files by filename so every collection of files has one stable order.
pub fn sort_files(files: &mut [File]) {
  files.sort_by(|a, b| a.filename.cmp(&b.filename));
}
