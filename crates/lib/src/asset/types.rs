use std::any::Any;
use std::fmt;
use std::hash::Hash;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::fetch::FetchError;
use super::file::File;

/// Stable identity of an asset within one build graph.
///
/// Kinds are the memoization key; display names are for diagnostics only.
pub trait AssetKey: Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> AssetKey for T where T: Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// Access to the concrete type behind a `dyn AssetState`.
pub trait AsAny {
  fn as_any(&self) -> &(dyn Any + Send + Sync);
}

impl<T: Any + Send + Sync> AsAny for T {
  fn as_any(&self) -> &(dyn Any + Send + Sync) {
    self
  }
}

/// The immutable result of resolving an asset.
///
/// Writable assets return the files they persist; everything else keeps the
/// default empty list.
pub trait AssetState: AsAny + fmt::Debug + Send + Sync {
  fn files(&self) -> Vec<File> {
    Vec::new()
  }
}

/// Errors raised by an asset's own `generate` or `load`.
#[derive(Debug, Error)]
pub enum AssetError {
  /// Some, but not all, of an asset's expected files are on disk.
  #[error("{asset}: found partial state on disk (present: {present:?}, missing: {missing:?})")]
  PartialState {
    asset: String,
    present: Vec<String>,
    missing: Vec<String>,
  },

  /// User-supplied configuration is malformed or missing.
  #[error("invalid {field}: {message}")]
  Validation { field: String, message: String },

  /// A collaborator outside the engine failed.
  #[error("{service}: {message}")]
  External { service: String, message: String },

  #[error("failed to encode {path}: {message}")]
  Encode { path: String, message: String },

  #[error("failed to decode {path}: {message}")]
  Decode { path: String, message: String },

  #[error(transparent)]
  Fetch(#[from] FetchError),

  /// A lookup for a kind the asset never declared.
  #[error("dependency {kind} was not resolved into parents")]
  MissingParent { kind: String },

  /// A lookup with the wrong state type for a kind.
  #[error("dependency {kind} does not hold a {expected}")]
  ParentType { kind: String, expected: &'static str },

  #[error("operation cancelled")]
  Cancelled,
}

impl AssetError {
  pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
    AssetError::Validation {
      field: field.into(),
      message: message.into(),
    }
  }

  pub fn encode(path: impl Into<String>, err: impl fmt::Display) -> Self {
    AssetError::Encode {
      path: path.into(),
      message: err.to_string(),
    }
  }

  pub fn decode(path: impl Into<String>, err: impl fmt::Display) -> Self {
    AssetError::Decode {
      path: path.into(),
      message: err.to_string(),
    }
  }
}

/// Per-build context threaded into every `generate` call.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
  cancel: CancellationToken,
}

impl BuildContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_token(cancel: CancellationToken) -> Self {
    Self { cancel }
  }

  pub fn token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Completes once the build is cancelled.
  pub async fn cancelled(&self) {
    self.cancel.cancelled().await
  }

  /// Returns `Err(AssetError::Cancelled)` if the build has been cancelled.
  pub fn check(&self) -> Result<(), AssetError> {
    if self.is_cancelled() {
      return Err(AssetError::Cancelled);
    }
    Ok(())
  }
}

/// Verifies that a family of files loaded together is complete.
///
/// `expected` lists every filename the asset needs. Returns `Ok(false)` when
/// none of them were found, `Ok(true)` when all were found, and
/// [`AssetError::PartialState`] otherwise.
pub fn require_complete(asset: &str, expected: &[String], found: &[File]) -> Result<bool, AssetError> {
  let (present, missing): (Vec<String>, Vec<String>) = expected
    .iter()
    .cloned()
    .partition(|name| found.iter().any(|f| &f.filename == name));

  if present.is_empty() {
    return Ok(false);
  }
  if missing.is_empty() {
    return Ok(true);
  }
  Err(AssetError::PartialState {
    asset: asset.to_string(),
    present,
    missing,
  })
}
