//! Cluster manifests.
//!
//! Each manifest is one YAML file rendered from its parents by a function in
//! [`templates`]. [`ManifestsAsset`] gathers every manifest, plus the control
//! plane machines, into the set the bootstrap ignition config embeds.

pub mod templates;

use async_trait::async_trait;

use crate::asset::{Asset, AssetError, AssetState, BuildContext, File, FileFetcher, Parents, file::sort_files};

use super::AssetKind;
use super::codec::{parse_yaml, yaml_file};

/// Renders a manifest document from resolved parents.
pub type Render = fn(&Parents<AssetKind>) -> Result<serde_json::Value, AssetError>;

/// A single rendered manifest file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
  pub file: File,
}

impl ManifestFile {
  pub fn document(&self) -> Result<serde_yaml::Value, AssetError> {
    parse_yaml(&self.file)
  }
}

impl AssetState for ManifestFile {
  fn files(&self) -> Vec<File> {
    vec![self.file.clone()]
  }
}

/// A writable asset producing one manifest file.
pub struct ManifestAsset {
  kind: AssetKind,
  name: &'static str,
  filename: &'static str,
  dependencies: &'static [AssetKind],
  render: Render,
}

impl ManifestAsset {
  pub const fn new(
    kind: AssetKind,
    name: &'static str,
    filename: &'static str,
    dependencies: &'static [AssetKind],
    render: Render,
  ) -> Self {
    Self {
      kind,
      name,
      filename,
      dependencies,
      render,
    }
  }

  pub fn filename(&self) -> &'static str {
    self.filename
  }
}

#[async_trait]
impl Asset<AssetKind> for ManifestAsset {
  type State = ManifestFile;

  fn kind(&self) -> AssetKind {
    self.kind
  }

  fn name(&self) -> &'static str {
    self.name
  }

  fn dependencies(&self) -> Vec<AssetKind> {
    self.dependencies.to_vec()
  }

  async fn generate(&self, _ctx: &BuildContext, parents: &Parents<AssetKind>) -> Result<ManifestFile, AssetError> {
    let document = (self.render)(parents)?;
    Ok(ManifestFile {
      file: yaml_file(self.filename, &document)?,
    })
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<ManifestFile>, AssetError> {
    let Some(file) = fetcher.fetch_by_name(self.filename)? else {
      return Ok(None);
    };
    parse_yaml::<serde_yaml::Value>(&file)?;
    Ok(Some(ManifestFile { file }))
  }
}

/// Every manifest file of the cluster, sorted by filename.
#[derive(Debug, Clone)]
pub struct ManifestSet {
  pub files: Vec<File>,
}

/// The file set lives in the member assets; the aggregate writes nothing.
impl AssetState for ManifestSet {}

/// Aggregate over every manifest kind and the control plane machines.
pub struct ManifestsAsset;

impl ManifestsAsset {
  pub fn members() -> Vec<AssetKind> {
    let mut members: Vec<AssetKind> = templates::all().iter().map(|m| m.kind).collect();
    members.push(AssetKind::ControlPlaneMachines);
    members
  }
}

#[async_trait]
impl Asset<AssetKind> for ManifestsAsset {
  type State = ManifestSet;

  fn kind(&self) -> AssetKind {
    AssetKind::Manifests
  }

  fn name(&self) -> &'static str {
    "Manifests"
  }

  fn dependencies(&self) -> Vec<AssetKind> {
    Self::members()
  }

  async fn generate(&self, _ctx: &BuildContext, parents: &Parents<AssetKind>) -> Result<ManifestSet, AssetError> {
    let mut files = Vec::new();
    for kind in Self::members() {
      files.extend(parents.files(kind)?);
    }
    sort_files(&mut files);
    Ok(ManifestSet { files })
  }
}
