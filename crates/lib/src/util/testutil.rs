//! Test utilities for kiln-lib.
//!
//! A small configurable asset type for exercising the builder without the
//! installer's real assets.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::asset::{Asset, AssetError, AssetState, BuildContext, Catalog, File, FileFetcher, Parents};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
  A,
  B,
  C,
  D,
  E,
}

impl Kind {
  fn label(self) -> &'static str {
    match self {
      Kind::A => "A",
      Kind::B => "B",
      Kind::C => "C",
      Kind::D => "D",
      Kind::E => "E",
    }
  }
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// Records what the builder did with each test asset.
#[derive(Debug, Clone, Default)]
pub struct Probe {
  inner: Arc<Mutex<ProbeLog>>,
}

#[derive(Debug, Default)]
struct ProbeLog {
  generated: Vec<Kind>,
  loaded: Vec<Kind>,
  parents: BTreeMap<Kind, Vec<Kind>>,
  seen: Vec<(Kind, Arc<dyn AssetState>)>,
}

impl Probe {
  fn log(&self) -> std::sync::MutexGuard<'_, ProbeLog> {
    self.inner.lock().unwrap()
  }

  /// Number of `generate` calls for `kind`.
  pub fn generated(&self, kind: Kind) -> usize {
    self.log().generated.iter().filter(|&&k| k == kind).count()
  }

  pub fn total_generated(&self) -> usize {
    self.log().generated.len()
  }

  /// Number of successful loads for `kind`.
  pub fn loaded(&self, kind: Kind) -> usize {
    self.log().loaded.iter().filter(|&&k| k == kind).count()
  }

  /// Kinds present in the parents handed to `kind`'s generate.
  pub fn parents_of(&self, kind: Kind) -> Vec<Kind> {
    self.log().parents.get(&kind).cloned().unwrap_or_default()
  }

  /// Every state of `kind` that a dependent received.
  pub fn parent_states(&self, kind: Kind) -> Vec<Arc<dyn AssetState>> {
    self
      .log()
      .seen
      .iter()
      .filter(|(k, _)| *k == kind)
      .map(|(_, s)| Arc::clone(s))
      .collect()
  }
}

#[derive(Debug)]
pub struct TestState {
  pub content: String,
  pub file: Option<String>,
}

impl AssetState for TestState {
  fn files(&self) -> Vec<File> {
    self
      .file
      .iter()
      .map(|name| File::new(name.as_str(), self.content.as_str()))
      .collect()
  }
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
  Succeed,
  Fail,
  Slow(Duration),
}

#[derive(Debug, Clone, Copy)]
enum LoadFault {
  Corrupt,
  Cancelled,
}

pub struct TestAsset {
  kind: Kind,
  deps: Vec<Kind>,
  file: Option<String>,
  behavior: Behavior,
  load_fault: Option<LoadFault>,
  probe: Probe,
}

/// An asset of `kind` depending on `deps`, generating `"K(dep,dep)"`.
pub fn node(kind: Kind, deps: &[Kind]) -> TestAsset {
  TestAsset {
    kind,
    deps: deps.to_vec(),
    file: None,
    behavior: Behavior::Succeed,
    load_fault: None,
    probe: Probe::default(),
  }
}

impl TestAsset {
  /// Persist the content to `state/<kind>` and load it back.
  pub fn writable(self) -> Self {
    let name = format!("state/{}", self.kind.label().to_lowercase());
    self.writable_as(&name)
  }

  pub fn writable_as(mut self, name: &str) -> Self {
    self.file = Some(name.to_string());
    self
  }

  pub fn failing(mut self) -> Self {
    self.behavior = Behavior::Fail;
    self
  }

  pub fn slow(mut self, delay: Duration) -> Self {
    self.behavior = Behavior::Slow(delay);
    self
  }

  pub fn broken_load(mut self) -> Self {
    self.load_fault = Some(LoadFault::Corrupt);
    self
  }

  /// Load reports cancellation, as a load interrupted mid-read would.
  pub fn cancelled_load(mut self) -> Self {
    self.load_fault = Some(LoadFault::Cancelled);
    self
  }
}

#[async_trait]
impl Asset<Kind> for TestAsset {
  type State = TestState;

  fn kind(&self) -> Kind {
    self.kind
  }

  fn name(&self) -> &'static str {
    self.kind.label()
  }

  fn dependencies(&self) -> Vec<Kind> {
    self.deps.clone()
  }

  async fn generate(&self, _ctx: &BuildContext, parents: &Parents<Kind>) -> Result<TestState, AssetError> {
    let mut parts = Vec::new();
    {
      let mut log = self.probe.log();
      log.generated.push(self.kind);
      log.parents.insert(self.kind, parents.kinds().collect());
      for &dep in &self.deps {
        log.seen.push((dep, Arc::clone(parents.state(dep)?)));
        parts.push(parents.get::<TestState>(dep)?.content.clone());
      }
    }

    match self.behavior {
      Behavior::Succeed => {}
      Behavior::Fail => return Err(AssetError::validation(self.kind.label(), "boom")),
      Behavior::Slow(delay) => tokio::time::sleep(delay).await,
    }

    let content = if parts.is_empty() {
      self.kind.label().to_string()
    } else {
      format!("{}({})", self.kind.label(), parts.join(","))
    };
    Ok(TestState {
      content,
      file: self.file.clone(),
    })
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<TestState>, AssetError> {
    match self.load_fault {
      Some(LoadFault::Corrupt) => return Err(AssetError::decode(self.kind.label(), "corrupt")),
      Some(LoadFault::Cancelled) => return Err(AssetError::Cancelled),
      None => {}
    }
    let Some(name) = &self.file else {
      return Ok(None);
    };
    let Some(file) = fetcher.fetch_by_name(name)? else {
      return Ok(None);
    };

    self.probe.log().loaded.push(self.kind);
    Ok(Some(TestState {
      content: String::from_utf8_lossy(&file.data).into_owned(),
      file: Some(name.clone()),
    }))
  }
}

pub fn catalog_of(assets: Vec<TestAsset>) -> Catalog<Kind> {
  assets.into_iter().fold(Catalog::new(), |catalog, asset| catalog.with(asset))
}

/// Like [`catalog_of`], with every asset reporting to `probe`.
pub fn probed_catalog(probe: &Probe, assets: Vec<TestAsset>) -> Catalog<Kind> {
  catalog_of(
    assets
      .into_iter()
      .map(|mut asset| {
        asset.probe = probe.clone();
        asset
      })
      .collect(),
  )
}
