use async_trait::async_trait;
use uuid::Uuid;

use crate::asset::{Asset, AssetError, AssetState, BuildContext, File, FileFetcher, Parents};

use super::AssetKind;

pub const CLUSTER_ID_FILENAME: &str = "cluster-id";

/// A random cluster UUID, generated once and then reused from `cluster-id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterId {
  pub uuid: Uuid,
}

impl ClusterId {
  /// Short infrastructure name: `<cluster-name>-<first five hex digits>`.
  pub fn infra_id(&self, cluster_name: &str) -> String {
    let simple = self.uuid.simple().to_string();
    format!("{}-{}", cluster_name, &simple[..5])
  }
}

impl AssetState for ClusterId {
  fn files(&self) -> Vec<File> {
    vec![File::new(CLUSTER_ID_FILENAME, self.uuid.to_string())]
  }
}

pub struct ClusterIdAsset;

#[async_trait]
impl Asset<AssetKind> for ClusterIdAsset {
  type State = ClusterId;

  fn kind(&self) -> AssetKind {
    AssetKind::ClusterId
  }

  fn name(&self) -> &'static str {
    "Cluster ID"
  }

  async fn generate(&self, _ctx: &BuildContext, _parents: &Parents<AssetKind>) -> Result<ClusterId, AssetError> {
    Ok(ClusterId { uuid: Uuid::new_v4() })
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<ClusterId>, AssetError> {
    let Some(file) = fetcher.fetch_by_name(CLUSTER_ID_FILENAME)? else {
      return Ok(None);
    };
    let text = file.text().unwrap_or_default().trim();
    let uuid = Uuid::parse_str(text).map_err(|e| AssetError::decode(CLUSTER_ID_FILENAME, e))?;
    Ok(Some(ClusterId { uuid }))
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use crate::asset::{Catalog, MemoryFetcher};
  use crate::engine::{BuildConfig, Builder, Resolution};

  use super::*;

  #[test]
  fn infra_id_uses_uuid_prefix() {
    let id = ClusterId {
      uuid: Uuid::parse_str("0b8f2c6e-1111-4222-8333-444455556666").unwrap(),
    };
    assert_eq!(id.infra_id("prod"), "prod-0b8f2");
  }

  #[test]
  fn corrupt_file_is_a_decode_error() {
    let fetcher: MemoryFetcher = [File::new(CLUSTER_ID_FILENAME, "not-a-uuid")].into_iter().collect();
    assert!(matches!(ClusterIdAsset.load(&fetcher), Err(AssetError::Decode { .. })));
  }

  #[tokio::test]
  async fn second_build_reuses_persisted_uuid() {
    let temp = TempDir::new().unwrap();
    let build = || {
      Builder::new(
        Catalog::new().with(ClusterIdAsset),
        BuildConfig::new(temp.path()).with_parallelism(1),
      )
    };

    let first = build().build(&BuildContext::new(), AssetKind::ClusterId).await.unwrap();
    let written = std::fs::read(temp.path().join(CLUSTER_ID_FILENAME)).unwrap();
    assert_eq!(first.resolution(AssetKind::ClusterId), Some(Resolution::Generated));

    let second = build().build(&BuildContext::new(), AssetKind::ClusterId).await.unwrap();
    assert_eq!(second.resolution(AssetKind::ClusterId), Some(Resolution::Loaded));
    assert_eq!(
      second.state::<ClusterId>(AssetKind::ClusterId).unwrap(),
      first.state::<ClusterId>(AssetKind::ClusterId).unwrap()
    );
    assert_eq!(std::fs::read(temp.path().join(CLUSTER_ID_FILENAME)).unwrap(), written);
    assert_eq!(second.report.unchanged, vec![CLUSTER_ID_FILENAME]);
  }
}
