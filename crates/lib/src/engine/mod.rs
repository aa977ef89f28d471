//! Target resolution and persistence.
//!
//! The [`Builder`] resolves a target kind by walking its dependency graph:
//! - every kind is resolved at most once per build, behind a single-flight cell
//! - a successful `load` short-circuits `generate` and the dependency subtree
//! - the first failure aborts the walk and is wrapped by each dependent
//! - independent subtrees run concurrently when `parallelism > 1`
//!
//! After the walk the files of every resolved asset are written to the install
//! directory in filename order.

pub mod graph;
pub mod types;
pub mod writer;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, try_join_all};
use tokio::sync::{OnceCell, Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use crate::asset::{
  AssetError, AssetKey, AssetState, BuildContext, Catalog, DirFetcher, DynAsset, File, FileFetcher, Parents,
};

pub use graph::AssetGraph;
pub use types::{BuildConfig, BuildError, BuildOutput, Resolution, ResolvedAsset};
pub use writer::{PersistError, WriteReport, write_files};

/// Resolves targets from a [`Catalog`] and persists their files.
pub struct Builder<K: AssetKey> {
  catalog: Catalog<K>,
  fetcher: Arc<dyn FileFetcher>,
  config: BuildConfig,
}

impl<K: AssetKey> Builder<K> {
  /// Create a builder that loads from and persists to `config.install_dir`.
  pub fn new(catalog: Catalog<K>, config: BuildConfig) -> Self {
    let fetcher = Arc::new(DirFetcher::new(&config.install_dir));
    Self {
      catalog,
      fetcher,
      config,
    }
  }

  /// Load persisted state through `fetcher` instead of the install directory.
  pub fn with_fetcher(mut self, fetcher: impl FileFetcher + 'static) -> Self {
    self.fetcher = Arc::new(fetcher);
    self
  }

  pub fn catalog(&self) -> &Catalog<K> {
    &self.catalog
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  /// The acyclic dependency graph of `target`.
  pub fn graph(&self, target: K) -> Result<AssetGraph<K>, BuildError> {
    AssetGraph::for_target(&self.catalog, target)
  }

  /// Resolve `target` and write the files of every resolved asset.
  ///
  /// On failure the files of assets that completed before the failure are
  /// still written, then the original error is returned.
  pub async fn build(&self, ctx: &BuildContext, target: K) -> Result<BuildOutput<K>, BuildError> {
    self.run(ctx, target, true).await
  }

  /// Resolve `target` without writing anything.
  pub async fn resolve(&self, ctx: &BuildContext, target: K) -> Result<BuildOutput<K>, BuildError> {
    self.run(ctx, target, false).await
  }

  async fn run(&self, ctx: &BuildContext, target: K, persist: bool) -> Result<BuildOutput<K>, BuildError> {
    let graph = self.graph(target)?;
    let target_name = self.catalog.name(target);
    info!(
      build_target = %target_name,
      assets = graph.len(),
      parallelism = self.config.parallelism,
      "starting build"
    );

    let session = Session::new(&self.catalog, self.fetcher.as_ref(), ctx, self.config.parallelism);
    let result = session.resolve(target, Vec::new()).await;
    let completed = session.finish();

    if let Err(err) = result {
      if persist {
        match self.persist(&completed) {
          Ok(report) => info!(
            completed = completed.len(),
            written = report.written.len(),
            "kept files of completed assets"
          ),
          Err(e) => warn!(error = %e, "failed to persist completed assets"),
        }
      }
      debug!(build_target = %target_name, error = %err, "build failed");
      return Err(err);
    }

    let report = if persist {
      self.persist(&completed)?
    } else {
      WriteReport::default()
    };

    info!(
      build_target = %target_name,
      resolved = completed.len(),
      written = report.written.len(),
      unchanged = report.unchanged.len(),
      "build complete"
    );

    let records = completed
      .iter()
      .map(|c| ResolvedAsset {
        kind: c.kind,
        name: c.name.to_string(),
        resolution: c.resolution,
      })
      .collect();
    let states = completed.into_iter().map(|c| (c.kind, c.state)).collect();
    Ok(BuildOutput::new(target, records, states, report))
  }

  fn persist(&self, completed: &[Completed<K>]) -> Result<WriteReport, BuildError> {
    let files = collect_files(completed)?;
    Ok(write_files(&self.config.install_dir, &files)?)
  }
}

/// Gather the files of every completed asset, sorted by filename.
fn collect_files<K: AssetKey>(completed: &[Completed<K>]) -> Result<Vec<File>, BuildError> {
  let mut owners: BTreeMap<String, (&'static str, File)> = BTreeMap::new();
  for entry in completed {
    for file in entry.state.files() {
      if let Some((first, _)) = owners.get(&file.filename) {
        return Err(BuildError::DuplicateFile {
          path: file.filename,
          first: first.to_string(),
          second: entry.name.to_string(),
        });
      }
      owners.insert(file.filename.clone(), (entry.name, file));
    }
  }
  Ok(owners.into_values().map(|(_, file)| file).collect())
}

struct Completed<K> {
  kind: K,
  name: &'static str,
  resolution: Resolution,
  state: Arc<dyn AssetState>,
}

/// `Err(())` marks a failed leader; the real error travels on the leader's
/// own return path.
type Outcome = Result<Arc<dyn AssetState>, ()>;

/// Mutable state of one build.
struct Session<'b, K: AssetKey> {
  catalog: &'b Catalog<K>,
  fetcher: &'b dyn FileFetcher,
  ctx: &'b BuildContext,
  parallel: bool,
  permits: Semaphore,
  cells: Mutex<HashMap<K, Arc<OnceCell<Outcome>>>>,
  completed: Mutex<Vec<Completed<K>>>,
}

impl<'b, K: AssetKey> Session<'b, K> {
  fn new(catalog: &'b Catalog<K>, fetcher: &'b dyn FileFetcher, ctx: &'b BuildContext, parallelism: usize) -> Self {
    let parallelism = parallelism.max(1);
    Self {
      catalog,
      fetcher,
      ctx,
      parallel: parallelism > 1,
      permits: Semaphore::new(parallelism),
      cells: Mutex::new(HashMap::new()),
      completed: Mutex::new(Vec::new()),
    }
  }

  fn finish(self) -> Vec<Completed<K>> {
    self.completed.into_inner().unwrap_or_else(PoisonError::into_inner)
  }

  /// Resolve `kind`; `path` holds the kinds currently being resolved above it.
  fn resolve<'s>(&'s self, kind: K, path: Vec<K>) -> BoxFuture<'s, Result<Arc<dyn AssetState>, BuildError>> {
    Box::pin(async move {
      if let Some(pos) = path.iter().position(|&k| k == kind) {
        let mut cycle: Vec<String> = path[pos..].iter().map(|&k| self.catalog.name(k)).collect();
        cycle.push(self.catalog.name(kind));
        return Err(BuildError::Cycle { path: cycle });
      }

      let asset = self.catalog.get(kind).cloned().ok_or_else(|| BuildError::UnknownAsset {
        kind: kind.to_string(),
        required_by: path.last().map(|&k| self.catalog.name(k)),
      })?;
      let name = asset.name();

      let cell = {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.entry(kind).or_default().clone()
      };

      if let Some(outcome) = cell.get() {
        debug!(asset = name, "reusing resolved asset");
        return outcome.clone().map_err(|()| BuildError::Aborted { asset: name.to_string() });
      }

      let mut failure = None;
      let slot = &mut failure;
      let outcome = cell
        .get_or_init(move || async move {
          match self.evaluate(kind, asset, path).await {
            Ok(state) => Ok(state),
            Err(err) => {
              *slot = Some(err);
              Err(())
            }
          }
        })
        .await
        .clone();

      match outcome {
        Ok(state) => Ok(state),
        Err(()) => Err(failure.unwrap_or_else(|| BuildError::Aborted { asset: name.to_string() })),
      }
    })
  }

  /// Load or generate `kind`. Runs once per kind, as the cell's leader.
  async fn evaluate(
    &self,
    kind: K,
    asset: Arc<dyn DynAsset<K>>,
    mut path: Vec<K>,
  ) -> Result<Arc<dyn AssetState>, BuildError> {
    let name = asset.name();

    self.checkpoint(name)?;
    let loaded = {
      let _permit = self.permit(name).await?;
      asset.load(self.fetcher)
    };
    match loaded {
      Ok(Some(state)) => {
        info!(asset = name, "loaded from disk");
        self.record(kind, name, Resolution::Loaded, &state);
        return Ok(state);
      }
      Ok(None) => debug!(asset = name, "nothing persisted"),
      Err(AssetError::Cancelled) => return Err(BuildError::Cancelled { asset: name.to_string() }),
      Err(source) => {
        return Err(BuildError::Load {
          asset: name.to_string(),
          source,
        });
      }
    }

    let deps = asset.dependencies();
    path.push(kind);
    let states = self
      .resolve_all(&deps, &path)
      .await
      .map_err(|source| BuildError::Dependency {
        asset: name.to_string(),
        source: Box::new(source),
      })?;

    let mut parents = Parents::new();
    for (&dep, state) in deps.iter().zip(states) {
      parents.add(dep, state);
    }

    self.checkpoint(name)?;
    let _permit = self.permit(name).await?;
    debug!(asset = name, parents = parents.len(), "generating");
    let generated = tokio::select! {
      biased;
      _ = self.ctx.cancelled() => return Err(BuildError::Cancelled { asset: name.to_string() }),
      result = asset.generate(self.ctx, &parents) => result,
    };

    match generated {
      Ok(state) => {
        info!(asset = name, "generated");
        self.record(kind, name, Resolution::Generated, &state);
        Ok(state)
      }
      Err(AssetError::Cancelled) => Err(BuildError::Cancelled { asset: name.to_string() }),
      Err(source) => Err(BuildError::Generate {
        asset: name.to_string(),
        source,
      }),
    }
  }

  /// Resolve `deps` in declaration order, concurrently when enabled.
  async fn resolve_all(&self, deps: &[K], path: &[K]) -> Result<Vec<Arc<dyn AssetState>>, BuildError> {
    if self.parallel && deps.len() > 1 {
      return try_join_all(deps.iter().map(|&dep| self.resolve(dep, path.to_vec()))).await;
    }

    let mut states = Vec::with_capacity(deps.len());
    for &dep in deps {
      states.push(self.resolve(dep, path.to_vec()).await?);
    }
    Ok(states)
  }

  fn checkpoint(&self, name: &str) -> Result<(), BuildError> {
    if self.ctx.is_cancelled() {
      return Err(BuildError::Cancelled { asset: name.to_string() });
    }
    Ok(())
  }

  async fn permit(&self, name: &str) -> Result<SemaphorePermit<'_>, BuildError> {
    self
      .permits
      .acquire()
      .await
      .map_err(|_| BuildError::Cancelled { asset: name.to_string() })
  }

  fn record(&self, kind: K, name: &'static str, resolution: Resolution, state: &Arc<dyn AssetState>) {
    let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
    completed.push(Completed {
      kind,
      name,
      resolution,
      state: Arc::clone(state),
    });
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::{Duration, Instant};

  use tempfile::TempDir;
  use tracing_test::traced_test;

  use crate::asset::MemoryFetcher;
  use crate::util::testutil::{Kind, Probe, TestState, node, probed_catalog};

  use super::*;

  fn builder(dir: &TempDir, catalog: Catalog<Kind>, parallelism: usize) -> Builder<Kind> {
    Builder::new(catalog, BuildConfig::new(dir.path()).with_parallelism(parallelism))
  }

  /// A <- (B, C), B <- D, C <- D
  fn diamond(probe: &Probe) -> Catalog<Kind> {
    probed_catalog(
      probe,
      vec![
        node(Kind::A, &[Kind::B, Kind::C]).writable(),
        node(Kind::B, &[Kind::D]).writable(),
        node(Kind::C, &[Kind::D]).writable(),
        node(Kind::D, &[]).writable(),
      ],
    )
  }

  #[tokio::test]
  async fn shared_dependency_resolves_once_per_build() {
    for parallelism in [1, 4] {
      let temp = TempDir::new().unwrap();
      let probe = Probe::default();
      let output = builder(&temp, diamond(&probe), parallelism)
        .build(&BuildContext::new(), Kind::A)
        .await
        .unwrap();

      assert_eq!(probe.generated(Kind::D), 1, "parallelism {parallelism}");
      assert_eq!(output.resolved.len(), 4);
      assert_eq!(output.state::<TestState>(Kind::A).unwrap().content, "A(B(D),C(D))");
    }
  }

  #[tokio::test]
  async fn dependents_share_one_state_instance() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    builder(&temp, diamond(&probe), 4)
      .resolve(&BuildContext::new(), Kind::A)
      .await
      .unwrap();

    let seen = probe.parent_states(Kind::D);
    assert_eq!(seen.len(), 2);
    assert!(Arc::ptr_eq(&seen[0], &seen[1]));
  }

  #[tokio::test]
  async fn concurrent_branches_wait_for_one_slow_generate() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let catalog = probed_catalog(
      &probe,
      vec![
        node(Kind::A, &[Kind::B, Kind::C]),
        node(Kind::B, &[Kind::D]),
        node(Kind::C, &[Kind::D]),
        node(Kind::D, &[]).slow(Duration::from_millis(50)),
      ],
    );

    builder(&temp, catalog, 4)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap();
    assert_eq!(probe.generated(Kind::D), 1);
  }

  #[tokio::test]
  async fn sequential_walk_is_depth_first_in_declaration_order() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let output = builder(&temp, diamond(&probe), 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap();

    let order: Vec<Kind> = output.resolved.iter().map(|r| r.kind).collect();
    assert_eq!(order, vec![Kind::D, Kind::B, Kind::C, Kind::A]);
  }

  #[tokio::test]
  async fn generate_sees_every_declared_dependency() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    builder(&temp, diamond(&probe), 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap();

    assert_eq!(probe.parents_of(Kind::A), vec![Kind::B, Kind::C]);
    assert_eq!(probe.parents_of(Kind::B), vec![Kind::D]);
    assert!(probe.parents_of(Kind::D).is_empty());
  }

  #[tokio::test]
  async fn files_are_written_sorted_and_reported() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let output = builder(&temp, diamond(&probe), 2)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap();

    assert_eq!(output.report.written, vec!["state/a", "state/b", "state/c", "state/d"]);
    let names: Vec<_> = output.files().into_iter().map(|f| f.filename).collect();
    assert_eq!(names, output.report.written);
    assert_eq!(fs::read_to_string(temp.path().join("state/a")).unwrap(), "A(B(D),C(D))");
  }

  #[tokio::test]
  async fn second_build_loads_and_skips_dependencies() {
    let temp = TempDir::new().unwrap();
    let first = Probe::default();
    builder(&temp, diamond(&first), 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap();

    let second = Probe::default();
    let output = builder(&temp, diamond(&second), 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap();

    assert_eq!(second.total_generated(), 0);
    assert_eq!(second.loaded(Kind::A), 1);
    assert_eq!(second.loaded(Kind::D), 0);
    assert_eq!(output.resolution(Kind::A), Some(Resolution::Loaded));
    assert_eq!(output.resolved.len(), 1);
    assert_eq!(output.report.unchanged, vec!["state/a"]);
    assert!(output.report.written.is_empty());
  }

  #[tokio::test]
  async fn missing_file_regenerates_only_its_subtree() {
    let temp = TempDir::new().unwrap();
    builder(&temp, diamond(&Probe::default()), 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap();
    fs::remove_file(temp.path().join("state/a")).unwrap();
    fs::write(temp.path().join("state/b"), "edited").unwrap();

    let probe = Probe::default();
    let output = builder(&temp, diamond(&probe), 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap();

    assert_eq!(probe.generated(Kind::A), 1);
    assert_eq!(probe.loaded(Kind::B), 1);
    assert_eq!(probe.loaded(Kind::C), 1);
    assert_eq!(probe.total_generated(), 1);
    assert_eq!(output.state::<TestState>(Kind::A).unwrap().content, "A(edited,C(D))");
  }

  #[tokio::test]
  #[traced_test]
  async fn failure_stops_dependents_and_keeps_completed_files() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let catalog = probed_catalog(
      &probe,
      vec![
        node(Kind::A, &[Kind::B, Kind::C]).writable(),
        node(Kind::B, &[]).writable(),
        node(Kind::C, &[]).failing(),
      ],
    );

    let err = builder(&temp, catalog, 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap_err();

    assert_eq!(probe.generated(Kind::A), 0);
    assert_eq!(err.chain(), vec!["A", "C"]);
    assert!(matches!(err.root_cause(), BuildError::Generate { .. }));
    assert!(err.to_string().starts_with("failed to fetch dependency of \"A\": failed to generate asset \"C\""));
    assert_eq!(fs::read_to_string(temp.path().join("state/b")).unwrap(), "B");
    assert!(!temp.path().join("state/a").exists());
    assert!(logs_contain("kept files of completed assets"));
  }

  #[tokio::test]
  async fn failure_in_concurrent_walk_is_reported_once() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let catalog = probed_catalog(
      &probe,
      vec![
        node(Kind::A, &[Kind::B, Kind::C]),
        node(Kind::B, &[Kind::D]),
        node(Kind::C, &[Kind::D]),
        node(Kind::D, &[]).failing(),
      ],
    );

    let err = builder(&temp, catalog, 4)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap_err();
    assert_eq!(err.failed_asset(), Some("D"));
    assert_eq!(probe.generated(Kind::D), 1);
    assert_eq!(probe.generated(Kind::A), 0);
  }

  #[tokio::test]
  async fn load_error_aborts_build() {
    let temp = TempDir::new().unwrap();
    let catalog = probed_catalog(&Probe::default(), vec![node(Kind::A, &[]).broken_load()]);

    let err = builder(&temp, catalog, 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap_err();
    assert!(matches!(err, BuildError::Load { ref asset, .. } if asset == "A"));
  }

  #[tokio::test]
  async fn cancelled_load_reports_cancellation() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let catalog = probed_catalog(&probe, vec![node(Kind::A, &[Kind::B]), node(Kind::B, &[]).cancelled_load()]);

    let err = builder(&temp, catalog, 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(err.root_cause(), BuildError::Cancelled { asset } if asset == "B"));
    assert_eq!(probe.total_generated(), 0);
  }

  #[tokio::test]
  async fn cycle_is_rejected_before_any_work() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let catalog = probed_catalog(&probe, vec![node(Kind::A, &[Kind::B]), node(Kind::B, &[Kind::A])]);

    let err = builder(&temp, catalog, 2)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap_err();
    assert!(matches!(err, BuildError::Cycle { .. }));
    assert_eq!(probe.total_generated(), 0);
  }

  #[tokio::test]
  async fn unknown_dependency_is_rejected() {
    let temp = TempDir::new().unwrap();
    let catalog = probed_catalog(&Probe::default(), vec![node(Kind::A, &[Kind::E])]);

    let err = builder(&temp, catalog, 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap_err();
    assert!(matches!(err, BuildError::UnknownAsset { .. }));
  }

  #[tokio::test]
  async fn duplicate_output_path_is_rejected() {
    let temp = TempDir::new().unwrap();
    let catalog = probed_catalog(
      &Probe::default(),
      vec![
        node(Kind::A, &[Kind::B]).writable_as("state/shared"),
        node(Kind::B, &[]).writable_as("state/shared"),
      ],
    );

    let err = builder(&temp, catalog, 1)
      .build(&BuildContext::new(), Kind::A)
      .await
      .unwrap_err();
    assert!(matches!(err, BuildError::DuplicateFile { ref path, .. } if path == "state/shared"));
  }

  #[tokio::test]
  async fn pre_cancelled_build_generates_nothing() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let ctx = BuildContext::new();
    ctx.cancel();

    let err = builder(&temp, diamond(&probe), 1).build(&ctx, Kind::A).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(probe.total_generated(), 0);
  }

  #[tokio::test]
  async fn cancellation_interrupts_slow_generate() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let catalog = probed_catalog(
      &probe,
      vec![
        node(Kind::A, &[Kind::B]).writable(),
        node(Kind::B, &[Kind::C]).slow(Duration::from_secs(30)),
        node(Kind::C, &[]).writable(),
      ],
    );
    let ctx = BuildContext::new();
    let token = ctx.token().clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      token.cancel();
    });

    let started = Instant::now();
    let err = builder(&temp, catalog, 1).build(&ctx, Kind::A).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(err.is_cancelled());
    assert_eq!(err.failed_asset(), Some("B"));
    assert_eq!(probe.generated(Kind::A), 0);
    assert!(temp.path().join("state/c").exists());
  }

  #[tokio::test]
  async fn custom_fetcher_supplies_persisted_state() {
    let temp = TempDir::new().unwrap();
    let probe = Probe::default();
    let fetcher: MemoryFetcher = [File::new("state/a", "from-memory")].into_iter().collect();

    let output = builder(&temp, diamond(&probe), 1)
      .with_fetcher(fetcher)
      .resolve(&BuildContext::new(), Kind::A)
      .await
      .unwrap();

    assert_eq!(output.state::<TestState>(Kind::A).unwrap().content, "from-memory");
    assert_eq!(probe.total_generated(), 0);
    assert!(output.report.written.is_empty());
    assert!(!temp.path().join("state/a").exists());
  }
}
