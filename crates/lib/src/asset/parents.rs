use std::any::type_name;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::file::File;
use super::types::{AssetError, AssetKey, AssetState};

/// The resolved dependencies handed to an asset's `generate` step.
///
/// The builder adds the state of every declared dependency before calling
/// `generate`; assets only read from it.
#[derive(Debug)]
pub struct Parents<K: AssetKey> {
  states: BTreeMap<K, Arc<dyn AssetState>>,
}

impl<K: AssetKey> Default for Parents<K> {
  fn default() -> Self {
    Self { states: BTreeMap::new() }
  }
}

impl<K: AssetKey> Parents<K> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert the resolved state for `kind`.
  pub fn add(&mut self, kind: K, state: Arc<dyn AssetState>) {
    self.states.insert(kind, state);
  }

  pub fn contains(&self, kind: K) -> bool {
    self.states.contains_key(&kind)
  }

  pub fn kinds(&self) -> impl Iterator<Item = K> + '_ {
    self.states.keys().copied()
  }

  pub fn len(&self) -> usize {
    self.states.len()
  }

  pub fn is_empty(&self) -> bool {
    self.states.is_empty()
  }

  /// Shared handle to the raw state of `kind`.
  pub fn state(&self, kind: K) -> Result<&Arc<dyn AssetState>, AssetError> {
    self.states.get(&kind).ok_or_else(|| AssetError::MissingParent {
      kind: kind.to_string(),
    })
  }

  /// Typed view of the state resolved for `kind`.
  pub fn get<T: AssetState + 'static>(&self, kind: K) -> Result<&T, AssetError> {
    let state: &dyn AssetState = &**self.state(kind)?;
    state.as_any().downcast_ref::<T>().ok_or_else(|| AssetError::ParentType {
      kind: kind.to_string(),
      expected: type_name::<T>(),
    })
  }

  /// Files contributed by the state of `kind`.
  pub fn files(&self, kind: K) -> Result<Vec<File>, AssetError> {
    Ok(self.state(kind)?.files())
  }
}
