//! The asset contract.
//!
//! An asset is one node of the build graph. It names the kinds it depends on,
//! computes an immutable state from its resolved [`Parents`], and may
//! rehydrate that state from files an earlier run persisted.
//!
//! # Submodules
//!
//! - [`fetch`] - reading persisted files by name or pattern
//! - [`file`] - the `(filename, data)` unit of output
//! - [`parents`] - resolved dependencies handed to `generate`

pub mod fetch;
pub mod file;
pub mod parents;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

pub use fetch::{DirFetcher, FetchError, FileFetcher, MemoryFetcher};
pub use file::File;
pub use parents::Parents;
pub use types::*;

/// A unit of work in the build graph.
///
/// `generate` must not mutate shared state; it returns a new state record that
/// the builder caches for the rest of the build. `load` belongs to writable
/// assets: it returns `Ok(Some(_))` when the persisted files reproduce the
/// state, `Ok(None)` when they are absent, and an error for anything else.
#[async_trait]
pub trait Asset<K: AssetKey>: Send + Sync + 'static {
  type State: AssetState + 'static;

  fn kind(&self) -> K;

  /// Human readable label used in logs and error chains.
  fn name(&self) -> &'static str;

  fn dependencies(&self) -> Vec<K> {
    Vec::new()
  }

  async fn generate(&self, ctx: &BuildContext, parents: &Parents<K>) -> Result<Self::State, AssetError>;

  fn load(&self, _fetcher: &dyn FileFetcher) -> Result<Option<Self::State>, AssetError> {
    Ok(None)
  }
}

/// Object-safe form of [`Asset`] stored in a [`Catalog`].
#[async_trait]
pub trait DynAsset<K: AssetKey>: Send + Sync {
  fn kind(&self) -> K;
  fn name(&self) -> &'static str;
  fn dependencies(&self) -> Vec<K>;
  async fn generate(&self, ctx: &BuildContext, parents: &Parents<K>) -> Result<Arc<dyn AssetState>, AssetError>;
  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<Arc<dyn AssetState>>, AssetError>;
}

struct Erased<A>(A);

#[async_trait]
impl<K: AssetKey, A: Asset<K>> DynAsset<K> for Erased<A> {
  fn kind(&self) -> K {
    self.0.kind()
  }

  fn name(&self) -> &'static str {
    self.0.name()
  }

  fn dependencies(&self) -> Vec<K> {
    self.0.dependencies()
  }

  async fn generate(&self, ctx: &BuildContext, parents: &Parents<K>) -> Result<Arc<dyn AssetState>, AssetError> {
    let state = self.0.generate(ctx, parents).await?;
    Ok(Arc::new(state))
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<Arc<dyn AssetState>>, AssetError> {
    Ok(self.0.load(fetcher)?.map(|state| Arc::new(state) as Arc<dyn AssetState>))
  }
}

/// Lookup table from kind to the asset that produces it.
pub struct Catalog<K: AssetKey> {
  assets: BTreeMap<K, Arc<dyn DynAsset<K>>>,
}

impl<K: AssetKey> Default for Catalog<K> {
  fn default() -> Self {
    Self { assets: BTreeMap::new() }
  }
}

impl<K: AssetKey> Catalog<K> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `asset` under its own kind, replacing any earlier registration.
  pub fn register<A: Asset<K>>(&mut self, asset: A) -> &mut Self {
    let kind = asset.kind();
    if self.assets.insert(kind, Arc::new(Erased(asset))).is_some() {
      debug!(kind = %kind, "replaced asset registration");
    }
    self
  }

  pub fn with<A: Asset<K>>(mut self, asset: A) -> Self {
    self.register(asset);
    self
  }

  pub fn get(&self, kind: K) -> Option<&Arc<dyn DynAsset<K>>> {
    self.assets.get(&kind)
  }

  pub fn contains(&self, kind: K) -> bool {
    self.assets.contains_key(&kind)
  }

  /// Display name for `kind`, falling back to the kind itself.
  pub fn name(&self, kind: K) -> String {
    self
      .assets
      .get(&kind)
      .map(|a| a.name().to_string())
      .unwrap_or_else(|| kind.to_string())
  }

  pub fn kinds(&self) -> impl Iterator<Item = K> + '_ {
    self.assets.keys().copied()
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }
}
