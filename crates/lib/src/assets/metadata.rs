//! `metadata.json`: identifiers a later teardown needs to find the cluster.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetError, AssetState, BuildContext, File, FileFetcher, Parents};

use super::AssetKind;
use super::cluster_id::ClusterId;
use super::codec::{load_json, pretty_json_file};
use super::installconfig::InstallConfigState;

pub const METADATA_FILENAME: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
  pub cluster_name: String,
  #[serde(rename = "clusterID")]
  pub cluster_id: String,
  #[serde(rename = "infraID")]
  pub infra_id: String,
  pub platform: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub region: Option<String>,
}

#[derive(Debug)]
pub struct Metadata {
  pub metadata: ClusterMetadata,
  file: File,
}

impl AssetState for Metadata {
  fn files(&self) -> Vec<File> {
    vec![self.file.clone()]
  }
}

pub struct MetadataAsset;

#[async_trait]
impl Asset<AssetKind> for MetadataAsset {
  type State = Metadata;

  fn kind(&self) -> AssetKind {
    AssetKind::Metadata
  }

  fn name(&self) -> &'static str {
    "Metadata"
  }

  fn dependencies(&self) -> Vec<AssetKind> {
    vec![AssetKind::ClusterId, AssetKind::InstallConfig]
  }

  async fn generate(&self, _ctx: &BuildContext, parents: &Parents<AssetKind>) -> Result<Metadata, AssetError> {
    let config = &parents.get::<InstallConfigState>(AssetKind::InstallConfig)?.config;
    let id = parents.get::<ClusterId>(AssetKind::ClusterId)?;

    let metadata = ClusterMetadata {
      cluster_name: config.metadata.name.clone(),
      cluster_id: id.uuid.to_string(),
      infra_id: id.infra_id(&config.metadata.name),
      platform: config.platform().to_string(),
      region: config.region().map(str::to_string),
    };
    let file = pretty_json_file(METADATA_FILENAME, &metadata)?;
    Ok(Metadata { metadata, file })
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<Metadata>, AssetError> {
    Ok(load_json(fetcher, METADATA_FILENAME)?.map(|(metadata, file)| Metadata { metadata, file }))
  }
}
