//! Control plane machine manifests.
//!
//! One `Machine` manifest per control plane replica, plus a user-data secret
//! the machines share. The secret records how many machines belong to the
//! set, so loading can tell a complete set from one with files missing.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::asset::{
  Asset, AssetError, AssetState, BuildContext, File, FileFetcher, Parents, file::sort_files, require_complete,
};
use crate::consts::MAX_CONTROL_PLANE_REPLICAS;

use super::AssetKind;
use super::cluster_id::ClusterId;
use super::codec::{parse_yaml, yaml_file};
use super::installconfig::InstallConfigState;

const DIRECTORY: &str = "openshift";
const MACHINE_PREFIX: &str = "99_openshift-cluster-api_master-machines-";
pub const USER_DATA_FILENAME: &str = "openshift/99_openshift-cluster-api_master-user-data-secret.yaml";
const MACHINE_COUNT_ANNOTATION: &str = "kiln.io/machine-count";
const NAMESPACE: &str = "openshift-machine-api";

fn machine_pattern() -> String {
  format!("{DIRECTORY}/{MACHINE_PREFIX}*.yaml")
}

/// Machine manifest names for a set of `count`, indices zero-padded to the
/// width of `count`.
pub fn machine_filenames(count: usize) -> Vec<String> {
  let width = count.to_string().len();
  (0..count)
    .map(|i| format!("{DIRECTORY}/{MACHINE_PREFIX}{i:0width$}.yaml"))
    .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretMeta {
  name: String,
  namespace: String,
  #[serde(default)]
  annotations: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserDataSecret {
  metadata: SecretMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneMachines {
  pub user_data: File,
  pub machines: Vec<File>,
}

impl AssetState for ControlPlaneMachines {
  fn files(&self) -> Vec<File> {
    let mut files = Vec::with_capacity(self.machines.len() + 1);
    files.push(self.user_data.clone());
    files.extend(self.machines.iter().cloned());
    files
  }
}

pub struct ControlPlaneMachinesAsset;

impl ControlPlaneMachinesAsset {
  fn machine_count(user_data: &File) -> Result<usize, AssetError> {
    let secret: UserDataSecret = parse_yaml(user_data)?;
    let raw = secret
      .metadata
      .annotations
      .get(MACHINE_COUNT_ANNOTATION)
      .ok_or_else(|| AssetError::decode(&user_data.filename, format!("missing {MACHINE_COUNT_ANNOTATION} annotation")))?;
    let count: u32 = raw
      .parse()
      .map_err(|e| AssetError::decode(&user_data.filename, format!("invalid machine count {raw:?}: {e}")))?;
    if count == 0 || count > MAX_CONTROL_PLANE_REPLICAS {
      return Err(AssetError::decode(
        &user_data.filename,
        format!("machine count {count} outside 1..={MAX_CONTROL_PLANE_REPLICAS}"),
      ));
    }
    Ok(count as usize)
  }
}

#[async_trait]
impl Asset<AssetKind> for ControlPlaneMachinesAsset {
  type State = ControlPlaneMachines;

  fn kind(&self) -> AssetKind {
    AssetKind::ControlPlaneMachines
  }

  fn name(&self) -> &'static str {
    "Master Machines"
  }

  fn dependencies(&self) -> Vec<AssetKind> {
    vec![AssetKind::InstallConfig, AssetKind::ClusterId]
  }

  async fn generate(
    &self,
    _ctx: &BuildContext,
    parents: &Parents<AssetKind>,
  ) -> Result<ControlPlaneMachines, AssetError> {
    let config = &parents.get::<InstallConfigState>(AssetKind::InstallConfig)?.config;
    let infra_id = parents
      .get::<ClusterId>(AssetKind::ClusterId)?
      .infra_id(&config.metadata.name);
    let count = config.control_plane.replicas as usize;

    let pointer = json!({
      "ignition": {
        "config": {
          "merge": [{ "source": format!("https://api-int.{}:22623/config/master", config.cluster_domain()) }],
        },
      },
    });
    let user_data = yaml_file(
      USER_DATA_FILENAME,
      &json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": {
          "name": "master-user-data",
          "namespace": NAMESPACE,
          "annotations": { (MACHINE_COUNT_ANNOTATION): count.to_string() },
        },
        "data": {
          "userData": STANDARD.encode(pointer.to_string()),
        },
      }),
    )?;

    let mut provider = json!({ "userDataSecret": { "name": "master-user-data" } });
    if let Some(region) = config.region() {
      provider["region"] = json!(region);
    }

    let machines = machine_filenames(count)
      .into_iter()
      .enumerate()
      .map(|(i, filename)| {
        yaml_file(
          &filename,
          &json!({
            "apiVersion": "machine.openshift.io/v1beta1",
            "kind": "Machine",
            "metadata": {
              "name": format!("{infra_id}-master-{i}"),
              "namespace": NAMESPACE,
              "labels": {
                "machine.openshift.io/cluster-api-cluster": infra_id,
                "machine.openshift.io/cluster-api-machine-role": "master",
                "machine.openshift.io/cluster-api-machine-type": "master",
              },
            },
            "spec": { "providerSpec": { "value": provider } },
          }),
        )
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(ControlPlaneMachines { user_data, machines })
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<ControlPlaneMachines>, AssetError> {
    let user_data = fetcher.fetch_by_name(USER_DATA_FILENAME)?;
    let mut machines = fetcher.fetch_by_pattern(&machine_pattern())?;

    let Some(user_data) = user_data else {
      if machines.is_empty() {
        return Ok(None);
      }
      return Err(AssetError::PartialState {
        asset: self.name().to_string(),
        present: machines.into_iter().map(|f| f.filename).collect(),
        missing: vec![USER_DATA_FILENAME.to_string()],
      });
    };

    let expected = machine_filenames(Self::machine_count(&user_data)?);
    if let Some(extra) = machines.iter().find(|f| !expected.contains(&f.filename)) {
      return Err(AssetError::validation(
        &extra.filename,
        format!("not part of a set of {} machines", expected.len()),
      ));
    }

    let mut all_expected = expected;
    all_expected.push(USER_DATA_FILENAME.to_string());
    let mut found = machines.clone();
    found.push(user_data.clone());
    require_complete(self.name(), &all_expected, &found)?;

    sort_files(&mut machines);
    debug!(machines = machines.len(), "loaded control plane machines");
    Ok(Some(ControlPlaneMachines { user_data, machines }))
  }
}
