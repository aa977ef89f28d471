//! Types for asset resolution.
//!
//! This module defines the error types, result types, and configuration
//! for building a target asset.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::asset::{AssetError, AssetKey, AssetState, File, file::sort_files};
use crate::consts::DEFAULT_INSTALL_DIR;

use super::writer::{PersistError, WriteReport};

/// Errors that abort a build.
///
/// Errors are wrapped with the name of every asset they pass through, so the
/// outermost message reads as a chain from the target down to the failure.
#[derive(Debug, Error)]
pub enum BuildError {
  /// An asset's `load` failed for a reason other than absent files.
  #[error("failed to load asset {asset:?}: {source}")]
  Load { asset: String, source: AssetError },

  /// An asset's `generate` failed.
  #[error("failed to generate asset {asset:?}: {source}")]
  Generate { asset: String, source: AssetError },

  /// A dependency of `asset` failed.
  #[error("failed to fetch dependency of {asset:?}: {source}")]
  Dependency { asset: String, source: Box<BuildError> },

  /// The dependency graph is not acyclic.
  #[error("dependency cycle detected: {}", path.join(" -> "))]
  Cycle { path: Vec<String> },

  /// A kind is referenced but no asset is registered for it.
  #[error("no asset registered for {kind}{}", required_by.as_ref().map(|r| format!(" (required by {r:?})")).unwrap_or_default())]
  UnknownAsset { kind: String, required_by: Option<String> },

  /// The build was cancelled before or while resolving `asset`.
  #[error("build cancelled while resolving {asset:?}")]
  Cancelled { asset: String },

  /// `asset` failed in another branch of a concurrent walk.
  #[error("asset {asset:?} failed in a concurrent branch")]
  Aborted { asset: String },

  /// Two assets claim the same output path.
  #[error("file {path} is produced by both {first:?} and {second:?}")]
  DuplicateFile { path: String, first: String, second: String },

  #[error(transparent)]
  Persist(#[from] PersistError),
}

impl BuildError {
  /// The innermost error, with every `Dependency` layer removed.
  pub fn root_cause(&self) -> &BuildError {
    let mut current = self;
    while let BuildError::Dependency { source, .. } = current {
      current = source;
    }
    current
  }

  /// The assets the error passed through, from the target down to the failure.
  pub fn chain(&self) -> Vec<&str> {
    let mut names = Vec::new();
    let mut current = self;
    loop {
      match current {
        BuildError::Dependency { asset, source } => {
          names.push(asset.as_str());
          current = source;
        }
        BuildError::Load { asset, .. }
        | BuildError::Generate { asset, .. }
        | BuildError::Cancelled { asset }
        | BuildError::Aborted { asset } => {
          names.push(asset.as_str());
          return names;
        }
        _ => return names,
      }
    }
  }

  /// Name of the asset that failed, if the failure belongs to one asset.
  pub fn failed_asset(&self) -> Option<&str> {
    match self.root_cause() {
      BuildError::Load { asset, .. }
      | BuildError::Generate { asset, .. }
      | BuildError::Cancelled { asset }
      | BuildError::Aborted { asset } => Some(asset),
      _ => None,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(
      self.root_cause(),
      BuildError::Cancelled { .. }
        | BuildError::Load {
          source: AssetError::Cancelled,
          ..
        }
        | BuildError::Generate {
          source: AssetError::Cancelled,
          ..
        }
    )
  }
}

/// How an asset was resolved within one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
  /// Rehydrated from persisted files; dependencies were not visited.
  Loaded,
  /// Computed by `generate` from resolved dependencies.
  Generated,
}

impl fmt::Display for Resolution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Resolution::Loaded => write!(f, "loaded"),
      Resolution::Generated => write!(f, "generated"),
    }
  }
}

/// One resolved asset, in the order resolution completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAsset<K> {
  pub kind: K,
  pub name: String,
  pub resolution: Resolution,
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildOutput<K: AssetKey> {
  /// The requested target.
  pub target: K,

  /// Every asset resolved by the walk, in completion order.
  pub resolved: Vec<ResolvedAsset<K>>,

  /// Files written to or already current in the install directory.
  pub report: WriteReport,

  states: BTreeMap<K, Arc<dyn AssetState>>,
}

impl<K: AssetKey> BuildOutput<K> {
  pub(crate) fn new(
    target: K,
    resolved: Vec<ResolvedAsset<K>>,
    states: BTreeMap<K, Arc<dyn AssetState>>,
    report: WriteReport,
  ) -> Self {
    Self {
      target,
      resolved,
      report,
      states,
    }
  }

  /// Typed access to a resolved state.
  pub fn state<T: AssetState + 'static>(&self, kind: K) -> Option<&T> {
    let state: &dyn AssetState = &**self.states.get(&kind)?;
    state.as_any().downcast_ref::<T>()
  }

  /// Shared handle to a resolved state.
  pub fn shared(&self, kind: K) -> Option<&Arc<dyn AssetState>> {
    self.states.get(&kind)
  }

  pub fn resolution(&self, kind: K) -> Option<Resolution> {
    self.resolved.iter().find(|r| r.kind == kind).map(|r| r.resolution)
  }

  pub fn loaded(&self) -> impl Iterator<Item = &ResolvedAsset<K>> {
    self.resolved.iter().filter(|r| r.resolution == Resolution::Loaded)
  }

  pub fn generated(&self) -> impl Iterator<Item = &ResolvedAsset<K>> {
    self.resolved.iter().filter(|r| r.resolution == Resolution::Generated)
  }

  /// Every file contributed by the resolved assets, sorted by filename.
  pub fn files(&self) -> Vec<File> {
    let mut files: Vec<File> = self.states.values().flat_map(|s| s.files()).collect();
    sort_files(&mut files);
    files
  }
}

/// Configuration for a build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Directory files are persisted to and, by default, loaded from.
  pub install_dir: PathBuf,

  /// Maximum number of load/generate calls in flight. `1` walks the graph
  /// sequentially, depth first, in declaration order.
  pub parallelism: usize,
}

impl BuildConfig {
  pub fn new(install_dir: impl Into<PathBuf>) -> Self {
    Self {
      install_dir: install_dir.into(),
      ..Self::default()
    }
  }

  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
      parallelism: num_cpus(),
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn generate_failure() -> BuildError {
    BuildError::Generate {
      asset: "Install Config".into(),
      source: AssetError::validation("metadata.name", "must not be empty"),
    }
  }

  #[test]
  fn chain_lists_assets_from_target_down() {
    let err = BuildError::Dependency {
      asset: "Manifests".into(),
      source: Box::new(BuildError::Dependency {
        asset: "DNS Config".into(),
        source: Box::new(generate_failure()),
      }),
    };

    assert_eq!(err.chain(), vec!["Manifests", "DNS Config", "Install Config"]);
    assert_eq!(err.failed_asset(), Some("Install Config"));
    assert!(matches!(err.root_cause(), BuildError::Generate { .. }));
  }

  #[test]
  fn cancelled_load_counts_as_cancellation() {
    let err = BuildError::Dependency {
      asset: "Manifests".into(),
      source: Box::new(BuildError::Load {
        asset: "Install Config".into(),
        source: AssetError::Cancelled,
      }),
    };
    assert!(err.is_cancelled());
    assert!(!generate_failure().is_cancelled());
  }

  #[test]
  fn display_names_every_layer() {
    let err = BuildError::Dependency {
      asset: "Manifests".into(),
      source: Box::new(generate_failure()),
    };
    assert_eq!(
      err.to_string(),
      "failed to fetch dependency of \"Manifests\": failed to generate asset \"Install Config\": \
       invalid metadata.name: must not be empty"
    );
  }

  #[test]
  fn cancellation_is_detected_through_layers() {
    let err = BuildError::Dependency {
      asset: "Manifests".into(),
      source: Box::new(BuildError::Cancelled {
        asset: "Cluster ID".into(),
      }),
    };
    assert!(err.is_cancelled());
    assert!(!generate_failure().is_cancelled());
  }

  #[test]
  fn unknown_asset_mentions_dependent() {
    let err = BuildError::UnknownAsset {
      kind: "Metadata".into(),
      required_by: Some("Ignition Configs".into()),
    };
    assert_eq!(
      err.to_string(),
      "no asset registered for Metadata (required by \"Ignition Configs\")"
    );
  }

  #[test]
  fn build_config_default_parallelism() {
    let config = BuildConfig::default();
    assert!(config.parallelism >= 1);
    assert_eq!(config.install_dir, PathBuf::from(DEFAULT_INSTALL_DIR));
    assert_eq!(BuildConfig::new("/tmp/x").with_parallelism(0).parallelism, 1);
  }

  #[test]
  fn resolution_display() {
    assert_eq!(Resolution::Loaded.to_string(), "loaded");
    assert_eq!(Resolution::Generated.to_string(), "generated");
  }
}
