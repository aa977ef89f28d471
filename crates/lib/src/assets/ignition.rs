//! Ignition configs for the bootstrap node and the two machine pools.
//!
//! `bootstrap.ign` embeds every manifest as a data URL with a SHA-256
//! verification hash. `master.ign` and `worker.ign` only point at the machine
//! config server of the cluster.

use std::fmt;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetError, AssetState, BuildContext, File, FileFetcher, Parents};
use crate::consts::IGNITION_VERSION;
use crate::util::hash::hash_bytes;

use super::AssetKind;
use super::codec::{json_file, load_json};
use super::installconfig::{InstallConfig, InstallConfigState};
use super::manifests::ManifestSet;

/// Where the bootstrap node finds the rendered manifests.
const BOOTSTRAP_ROOT: &str = "/opt/openshift";
const FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnitionConfig {
  pub ignition: IgnitionMeta,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub passwd: Option<Passwd>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub storage: Option<Storage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnitionMeta {
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config: Option<ConfigReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReference {
  pub merge: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
  pub source: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub verification: Option<Verification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
  pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passwd {
  pub users: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub name: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub ssh_authorized_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
  pub files: Vec<StorageFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFile {
  pub path: String,
  pub mode: u32,
  pub overwrite: bool,
  pub contents: Resource,
}

impl StorageFile {
  fn embed(path: String, data: &[u8]) -> Self {
    Self {
      path,
      mode: FILE_MODE,
      overwrite: true,
      contents: Resource {
        source: format!("data:text/plain;charset=utf-8;base64,{}", STANDARD.encode(data)),
        verification: Some(Verification {
          hash: format!("sha256-{}", hash_bytes(data)),
        }),
      },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Bootstrap,
  Master,
  Worker,
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      Role::Bootstrap => "bootstrap",
      Role::Master => "master",
      Role::Worker => "worker",
    }
  }

  pub fn filename(self) -> String {
    format!("{}.ign", self.as_str())
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug)]
pub struct Ignition {
  pub role: Role,
  pub config: IgnitionConfig,
  file: File,
}

impl AssetState for Ignition {
  fn files(&self) -> Vec<File> {
    vec![self.file.clone()]
  }
}

fn passwd(config: &InstallConfig) -> Option<Passwd> {
  config.ssh_key.as_ref().map(|key| Passwd {
    users: vec![User {
      name: "core".to_string(),
      ssh_authorized_keys: vec![key.clone()],
    }],
  })
}

/// Writes `<role>.ign`.
pub struct IgnitionAsset {
  role: Role,
}

impl IgnitionAsset {
  pub fn bootstrap() -> Self {
    Self { role: Role::Bootstrap }
  }

  pub fn master() -> Self {
    Self { role: Role::Master }
  }

  pub fn worker() -> Self {
    Self { role: Role::Worker }
  }

  fn render(&self, parents: &Parents<AssetKind>) -> Result<IgnitionConfig, AssetError> {
    let config = &parents.get::<InstallConfigState>(AssetKind::InstallConfig)?.config;
    let mut ignition = IgnitionConfig {
      ignition: IgnitionMeta {
        version: IGNITION_VERSION.to_string(),
        config: None,
      },
      passwd: passwd(config),
      storage: None,
    };

    match self.role {
      Role::Bootstrap => {
        let manifests = parents.get::<ManifestSet>(AssetKind::Manifests)?;
        let files = manifests
          .files
          .iter()
          .map(|f| StorageFile::embed(format!("{BOOTSTRAP_ROOT}/{}", f.filename), &f.data))
          .collect();
        ignition.storage = Some(Storage { files });
      }
      Role::Master | Role::Worker => {
        ignition.ignition.config = Some(ConfigReference {
          merge: vec![Resource {
            source: format!("https://api-int.{}:22623/config/{}", config.cluster_domain(), self.role),
            verification: None,
          }],
        });
      }
    }
    Ok(ignition)
  }
}

#[async_trait]
impl Asset<AssetKind> for IgnitionAsset {
  type State = Ignition;

  fn kind(&self) -> AssetKind {
    match self.role {
      Role::Bootstrap => AssetKind::BootstrapIgnition,
      Role::Master => AssetKind::MasterIgnition,
      Role::Worker => AssetKind::WorkerIgnition,
    }
  }

  fn name(&self) -> &'static str {
    match self.role {
      Role::Bootstrap => "Bootstrap Ignition Config",
      Role::Master => "Master Ignition Config",
      Role::Worker => "Worker Ignition Config",
    }
  }

  fn dependencies(&self) -> Vec<AssetKind> {
    match self.role {
      Role::Bootstrap => vec![AssetKind::InstallConfig, AssetKind::Manifests],
      Role::Master | Role::Worker => vec![AssetKind::InstallConfig],
    }
  }

  async fn generate(&self, _ctx: &BuildContext, parents: &Parents<AssetKind>) -> Result<Ignition, AssetError> {
    let config = self.render(parents)?;
    let file = json_file(&self.role.filename(), &config)?;
    Ok(Ignition {
      role: self.role,
      config,
      file,
    })
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<Ignition>, AssetError> {
    let filename = self.role.filename();
    let Some((config, file)) = load_json::<IgnitionConfig>(fetcher, &filename)? else {
      return Ok(None);
    };
    if !config.ignition.version.starts_with("3.") {
      return Err(AssetError::validation(
        format!("{filename}: ignition.version"),
        format!("unsupported version {:?}", config.ignition.version),
      ));
    }
    Ok(Some(Ignition {
      role: self.role,
      config,
      file,
    }))
  }
}

/// The generated ignition filenames.
#[derive(Debug, Clone)]
pub struct IgnitionSet {
  pub filenames: Vec<String>,
}

impl AssetState for IgnitionSet {}

/// Aggregate over the three ignition configs and the cluster metadata.
pub struct IgnitionConfigsAsset;

#[async_trait]
impl Asset<AssetKind> for IgnitionConfigsAsset {
  type State = IgnitionSet;

  fn kind(&self) -> AssetKind {
    AssetKind::IgnitionConfigs
  }

  fn name(&self) -> &'static str {
    "Ignition Configs"
  }

  fn dependencies(&self) -> Vec<AssetKind> {
    vec![
      AssetKind::BootstrapIgnition,
      AssetKind::MasterIgnition,
      AssetKind::WorkerIgnition,
      AssetKind::Metadata,
    ]
  }

  async fn generate(&self, _ctx: &BuildContext, parents: &Parents<AssetKind>) -> Result<IgnitionSet, AssetError> {
    let mut filenames = Vec::new();
    for kind in [
      AssetKind::BootstrapIgnition,
      AssetKind::MasterIgnition,
      AssetKind::WorkerIgnition,
    ] {
      filenames.extend(parents.files(kind)?.into_iter().map(|f| f.filename));
    }
    Ok(IgnitionSet { filenames })
  }
}
