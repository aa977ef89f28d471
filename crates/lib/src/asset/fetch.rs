//! Read access to previously persisted files.
//!
//! Assets use a [`FileFetcher`] from their `load` step to rehydrate state that an
//! earlier process wrote. The contract is storage-agnostic: [`DirFetcher`] reads
//! the install directory, [`MemoryFetcher`] keeps blobs in a map.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use thiserror::Error;
use walkdir::WalkDir;

use super::file::{File, sort_files, validate_relative};

/// Errors raised while fetching persisted files.
///
/// A missing file is never an error; fetchers report absence as `Ok(None)` or
/// an empty list.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to read {}: {source}", path.display())]
  Read { path: PathBuf, source: io::Error },

  #[error("failed to walk {}: {message}", path.display())]
  Walk { path: PathBuf, message: String },

  #[error("invalid pattern {pattern:?}: {message}")]
  InvalidPattern { pattern: String, message: String },

  #[error("path {path:?} must be relative to the install directory")]
  InvalidPath { path: String },
}

/// Capability for reading persisted files by exact name or by glob pattern.
pub trait FileFetcher: Send + Sync {
  /// Fetch one file. Returns `Ok(None)` if it does not exist.
  fn fetch_by_name(&self, name: &str) -> Result<Option<File>, FetchError>;

  /// Fetch every file matching `pattern`, sorted by filename.
  ///
  /// `*` and `?` never match `/`. Returns an empty list when nothing matches.
  fn fetch_by_pattern(&self, pattern: &str) -> Result<Vec<File>, FetchError>;
}

fn match_options() -> MatchOptions {
  MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
  }
}

fn compile(pattern: &str) -> Result<Pattern, FetchError> {
  validate_relative(pattern)?;
  Pattern::new(pattern).map_err(|e| FetchError::InvalidPattern {
    pattern: pattern.to_string(),
    message: e.to_string(),
  })
}

/// The directory part of a pattern that contains no glob metacharacters.
fn literal_prefix(pattern: &str) -> &str {
  let meta = pattern.find(['*', '?', '[']).unwrap_or(pattern.len());
  match pattern[..meta].rfind('/') {
    Some(idx) => &pattern[..idx],
    None => "",
  }
}

/// Fetches files from a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirFetcher {
  root: PathBuf,
}

impl DirFetcher {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn read(&self, path: &Path, name: String) -> Result<Option<File>, FetchError> {
    match fs::read(path) {
      Ok(data) => Ok(Some(File::new(name, data))),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(FetchError::Read {
        path: path.to_path_buf(),
        source: e,
      }),
    }
  }
}

impl FileFetcher for DirFetcher {
  fn fetch_by_name(&self, name: &str) -> Result<Option<File>, FetchError> {
    validate_relative(name)?;
    let path = self.root.join(name);
    if path.is_dir() {
      return Ok(None);
    }
    self.read(&path, name.to_string())
  }

  fn fetch_by_pattern(&self, pattern: &str) -> Result<Vec<File>, FetchError> {
    let compiled = compile(pattern)?;
    let prefix = literal_prefix(pattern);
    let start = if prefix.is_empty() {
      self.root.clone()
    } else {
      self.root.join(prefix)
    };

    if !start.is_dir() {
      return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&start).follow_links(true).sort_by_file_name() {
      let entry = entry.map_err(|e| FetchError::Walk {
        path: start.clone(),
        message: e.to_string(),
      })?;
      if !entry.file_type().is_file() {
        continue;
      }

      let Ok(rel) = entry.path().strip_prefix(&self.root) else {
        continue;
      };
      let name = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

      if compiled.matches_with(&name, match_options())
        && let Some(file) = self.read(entry.path(), name)?
      {
        files.push(file);
      }
    }

    sort_files(&mut files);
    Ok(files)
  }
}

/// An in-memory blob store implementing [`FileFetcher`].
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
  blobs: BTreeMap<String, Vec<u8>>,
}

impl MemoryFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, file: File) {
    self.blobs.insert(file.filename, file.data);
  }

  pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
    self.blobs.remove(name)
  }

  pub fn len(&self) -> usize {
    self.blobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blobs.is_empty()
  }
}

impl FromIterator<File> for MemoryFetcher {
  fn from_iter<I: IntoIterator<Item = File>>(iter: I) -> Self {
    let mut fetcher = Self::new();
    for file in iter {
      fetcher.insert(file);
    }
    fetcher
  }
}

impl FileFetcher for MemoryFetcher {
  fn fetch_by_name(&self, name: &str) -> Result<Option<File>, FetchError> {
    validate_relative(name)?;
    Ok(self.blobs.get(name).map(|data| File::new(name, data.clone())))
  }

  fn fetch_by_pattern(&self, pattern: &str) -> Result<Vec<File>, FetchError> {
    let compiled = compile(pattern)?;
    Ok(
      self
        .blobs
        .iter()
        .filter(|(name, _)| compiled.matches_with(name, match_options()))
        .map(|(name, data)| File::new(name.as_str(), data.clone()))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  #[test]
  fn literal_prefix_stops_at_metacharacters() {
    assert_eq!(literal_prefix("openshift/99_master-*.yaml"), "openshift");
    assert_eq!(literal_prefix("a/b/c-?.yaml"), "a/b");
    assert_eq!(literal_prefix("*.ign"), "");
    assert_eq!(literal_prefix("manifests/exact.yml"), "manifests");
  }

  #[test]
  fn dir_fetch_by_name_missing_is_none() {
    let temp = TempDir::new().unwrap();
    let fetcher = DirFetcher::new(temp.path());
    assert!(fetcher.fetch_by_name("install-config.yaml").unwrap().is_none());
  }

  #[test]
  fn dir_fetch_by_name_reads_bytes() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "auth/kubeadmin-password", "hunter2");

    let fetcher = DirFetcher::new(temp.path());
    let file = fetcher.fetch_by_name("auth/kubeadmin-password").unwrap().unwrap();
    assert_eq!(file.filename, "auth/kubeadmin-password");
    assert_eq!(file.data, b"hunter2");
  }

  #[test]
  fn dir_fetch_by_name_rejects_escape() {
    let temp = TempDir::new().unwrap();
    let fetcher = DirFetcher::new(temp.path());
    assert!(matches!(
      fetcher.fetch_by_name("../secret"),
      Err(FetchError::InvalidPath { .. })
    ));
  }

  #[test]
  fn dir_fetch_by_pattern_is_sorted_and_does_not_cross_directories() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "openshift/machine-2.yaml", "2");
    write(temp.path(), "openshift/machine-0.yaml", "0");
    write(temp.path(), "openshift/machine-1.yaml", "1");
    write(temp.path(), "openshift/nested/machine-9.yaml", "9");
    write(temp.path(), "openshift/other.yaml", "x");

    let fetcher = DirFetcher::new(temp.path());
    let files = fetcher.fetch_by_pattern("openshift/machine-*.yaml").unwrap();
    let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(
      names,
      vec![
        "openshift/machine-0.yaml",
        "openshift/machine-1.yaml",
        "openshift/machine-2.yaml"
      ]
    );
  }

  #[cfg(unix)]
  #[test]
  fn dir_fetch_by_pattern_follows_symlinked_files() {
    let temp = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    write(outside.path(), "machine-0.yaml", "0");
    write(temp.path(), "openshift/machine-1.yaml", "1");
    std::os::unix::fs::symlink(
      outside.path().join("machine-0.yaml"),
      temp.path().join("openshift/machine-0.yaml"),
    )
    .unwrap();

    let fetcher = DirFetcher::new(temp.path());
    let files = fetcher.fetch_by_pattern("openshift/machine-*.yaml").unwrap();
    let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["openshift/machine-0.yaml", "openshift/machine-1.yaml"]);
    assert_eq!(files[0].data, b"0");
  }

  #[test]
  fn dir_fetch_by_pattern_without_matches_is_empty() {
    let temp = TempDir::new().unwrap();
    let fetcher = DirFetcher::new(temp.path());
    assert!(fetcher.fetch_by_pattern("manifests/*.yml").unwrap().is_empty());
    assert!(fetcher.fetch_by_pattern("*.ign").unwrap().is_empty());
  }

  #[test]
  fn invalid_pattern_is_reported() {
    let fetcher = MemoryFetcher::new();
    assert!(matches!(
      fetcher.fetch_by_pattern("manifests/[.yml"),
      Err(FetchError::InvalidPattern { .. })
    ));
  }

  #[test]
  fn memory_fetcher_matches_dir_semantics() {
    let fetcher: MemoryFetcher = [
      File::new("openshift/machine-1.yaml", "1"),
      File::new("openshift/machine-0.yaml", "0"),
      File::new("openshift/nested/machine-5.yaml", "5"),
      File::new("cluster-id", "abc"),
    ]
    .into_iter()
    .collect();

    let names: Vec<_> = fetcher
      .fetch_by_pattern("openshift/machine-*.yaml")
      .unwrap()
      .into_iter()
      .map(|f| f.filename)
      .collect();
    assert_eq!(names, vec!["openshift/machine-0.yaml", "openshift/machine-1.yaml"]);

    assert_eq!(fetcher.fetch_by_name("cluster-id").unwrap().unwrap().data, b"abc");
    assert!(fetcher.fetch_by_name("missing").unwrap().is_none());
  }
}
