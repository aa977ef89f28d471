//! `install-config.yaml`: the user's decisions in one validated document.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetError, AssetState, BuildContext, File, FileFetcher, Parents};
use crate::consts::MAX_CONTROL_PLANE_REPLICAS;

use super::AssetKind;
use super::codec::{load_yaml, yaml_file};
use super::inputs::{InstallInputs, Platform};

pub const INSTALL_CONFIG_FILENAME: &str = "install-config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallConfig {
  pub api_version: String,
  pub metadata: ObjectMeta,
  pub base_domain: String,
  pub platform: PlatformConfig,
  pub control_plane: MachinePool,
  pub compute: Vec<MachinePool>,
  pub networking: Networking,
  pub pull_secret: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ssh_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
  pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub aws: Option<CloudPlatform>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub azure: Option<CloudPlatform>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gcp: Option<CloudPlatform>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub none: Option<NonePlatform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudPlatform {
  pub region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonePlatform {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachinePool {
  pub name: String,
  pub replicas: u32,
  #[serde(default = "default_architecture")]
  pub architecture: String,
}

fn default_architecture() -> String {
  "amd64".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
  pub network_type: String,
  pub cluster_network: Vec<ClusterNetworkEntry>,
  pub machine_network: Vec<MachineNetworkEntry>,
  pub service_network: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkEntry {
  pub cidr: String,
  pub host_prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineNetworkEntry {
  pub cidr: String,
}

impl InstallConfig {
  pub fn from_inputs(inputs: &InstallInputs) -> Self {
    let region = || CloudPlatform {
      region: inputs.region.clone().unwrap_or_default(),
    };
    let platform = match inputs.platform {
      Platform::Aws => PlatformConfig {
        aws: Some(region()),
        ..Default::default()
      },
      Platform::Azure => PlatformConfig {
        azure: Some(region()),
        ..Default::default()
      },
      Platform::Gcp => PlatformConfig {
        gcp: Some(region()),
        ..Default::default()
      },
      Platform::None => PlatformConfig {
        none: Some(NonePlatform {}),
        ..Default::default()
      },
    };

    Self {
      api_version: "v1".to_string(),
      metadata: ObjectMeta {
        name: inputs.cluster_name.clone(),
      },
      base_domain: inputs.base_domain.clone(),
      platform,
      control_plane: MachinePool {
        name: "master".to_string(),
        replicas: inputs.control_plane_replicas,
        architecture: default_architecture(),
      },
      compute: vec![MachinePool {
        name: "worker".to_string(),
        replicas: inputs.compute_replicas,
        architecture: default_architecture(),
      }],
      networking: Networking {
        network_type: "OVNKubernetes".to_string(),
        cluster_network: vec![ClusterNetworkEntry {
          cidr: inputs.cluster_network.clone(),
          host_prefix: inputs.host_prefix,
        }],
        machine_network: vec![MachineNetworkEntry {
          cidr: inputs.machine_network.clone(),
        }],
        service_network: vec![inputs.service_network.clone()],
      },
      pull_secret: inputs.pull_secret.clone(),
      ssh_key: inputs.ssh_key.clone(),
    }
  }

  /// The configured platform. Only meaningful after [`validate`](Self::validate).
  pub fn platform(&self) -> Platform {
    let p = &self.platform;
    if p.aws.is_some() {
      Platform::Aws
    } else if p.azure.is_some() {
      Platform::Azure
    } else if p.gcp.is_some() {
      Platform::Gcp
    } else {
      Platform::None
    }
  }

  pub fn region(&self) -> Option<&str> {
    let p = &self.platform;
    p.aws
      .as_ref()
      .or(p.azure.as_ref())
      .or(p.gcp.as_ref())
      .map(|c| c.region.as_str())
  }

  /// `<name>.<baseDomain>`
  pub fn cluster_domain(&self) -> String {
    format!("{}.{}", self.metadata.name, self.base_domain)
  }

  pub fn compute_replicas(&self) -> u32 {
    self.compute.iter().map(|p| p.replicas).sum()
  }

  pub fn validate(&self) -> Result<(), AssetError> {
    if self.api_version != "v1" {
      return Err(AssetError::validation("apiVersion", format!("unsupported version {:?}", self.api_version)));
    }
    validate_dns_label("metadata.name", &self.metadata.name)?;
    validate_domain("baseDomain", &self.base_domain)?;
    validate_domain("baseDomain", &self.cluster_domain())?;
    self.validate_platform()?;

    if self.control_plane.name != "master" {
      return Err(AssetError::validation("controlPlane.name", "must be \"master\""));
    }
    if self.control_plane.replicas == 0 {
      return Err(AssetError::validation("controlPlane.replicas", "must be at least 1"));
    }
    if self.control_plane.replicas > MAX_CONTROL_PLANE_REPLICAS {
      return Err(AssetError::validation(
        "controlPlane.replicas",
        format!("must be at most {MAX_CONTROL_PLANE_REPLICAS}"),
      ));
    }
    for (i, pool) in self.compute.iter().enumerate() {
      if pool.name != "worker" {
        return Err(AssetError::validation(format!("compute[{i}].name"), "must be \"worker\""));
      }
    }

    self.validate_networking()?;
    validate_pull_secret(&self.pull_secret)?;
    if let Some(key) = &self.ssh_key
      && !(key.starts_with("ssh-") || key.starts_with("ecdsa-"))
    {
      return Err(AssetError::validation("sshKey", "must be an OpenSSH public key"));
    }
    Ok(())
  }

  fn validate_platform(&self) -> Result<(), AssetError> {
    let p = &self.platform;
    let set = [p.aws.is_some(), p.azure.is_some(), p.gcp.is_some(), p.none.is_some()]
      .iter()
      .filter(|&&s| s)
      .count();
    if set != 1 {
      return Err(AssetError::validation("platform", "exactly one platform must be configured"));
    }
    if self.platform().needs_region() && self.region().is_none_or(|r| r.trim().is_empty()) {
      return Err(AssetError::validation(
        format!("platform.{}.region", self.platform()),
        "region is required",
      ));
    }
    Ok(())
  }

  fn validate_networking(&self) -> Result<(), AssetError> {
    let net = &self.networking;
    if net.cluster_network.is_empty() {
      return Err(AssetError::validation("networking.clusterNetwork", "at least one entry is required"));
    }
    for (i, entry) in net.cluster_network.iter().enumerate() {
      let field = format!("networking.clusterNetwork[{i}]");
      let (_, prefix) = parse_cidr(&format!("{field}.cidr"), &entry.cidr)?;
      if entry.host_prefix < prefix || entry.host_prefix > 30 {
        return Err(AssetError::validation(
          format!("{field}.hostPrefix"),
          format!("must be between {prefix} and 30"),
        ));
      }
    }
    for (i, entry) in net.machine_network.iter().enumerate() {
      parse_cidr(&format!("networking.machineNetwork[{i}].cidr"), &entry.cidr)?;
    }
    if net.service_network.len() != 1 {
      return Err(AssetError::validation("networking.serviceNetwork", "exactly one entry is required"));
    }
    parse_cidr("networking.serviceNetwork[0]", &net.service_network[0])?;
    Ok(())
  }
}

fn validate_dns_label(field: &str, value: &str) -> Result<(), AssetError> {
  let valid = !value.is_empty()
    && value.len() <= 63
    && value.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    && !value.starts_with('-')
    && !value.ends_with('-');
  if !valid {
    return Err(AssetError::validation(
      field,
      format!("{value:?} must be a lowercase RFC 1123 label"),
    ));
  }
  Ok(())
}

fn validate_domain(field: &str, value: &str) -> Result<(), AssetError> {
  if value.is_empty() || value.len() > 253 {
    return Err(AssetError::validation(field, format!("{value:?} is not a valid domain name")));
  }
  for label in value.split('.') {
    validate_dns_label(field, label)?;
  }
  Ok(())
}

fn parse_cidr(field: &str, value: &str) -> Result<(Ipv4Addr, u8), AssetError> {
  let invalid = || AssetError::validation(field, format!("{value:?} is not an IPv4 CIDR"));
  let (addr, prefix) = value.split_once('/').ok_or_else(invalid)?;
  let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
  let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
  if prefix > 32 {
    return Err(invalid());
  }
  Ok((addr, prefix))
}

fn validate_pull_secret(secret: &str) -> Result<(), AssetError> {
  let value: serde_json::Value = serde_json::from_str(secret)
    .map_err(|e| AssetError::validation("pullSecret", format!("must be valid JSON: {e}")))?;
  if !value.get("auths").is_some_and(|a| a.is_object()) {
    return Err(AssetError::validation("pullSecret", "must contain an \"auths\" object"));
  }
  Ok(())
}

#[derive(Debug)]
pub struct InstallConfigState {
  pub config: InstallConfig,
  file: File,
}

impl AssetState for InstallConfigState {
  fn files(&self) -> Vec<File> {
    vec![self.file.clone()]
  }
}

/// Generates `install-config.yaml` from [`InstallInputs`], or honours an
/// existing (possibly hand-edited) one.
pub struct InstallConfigAsset {
  inputs: InstallInputs,
}

impl InstallConfigAsset {
  pub fn new(inputs: InstallInputs) -> Self {
    Self { inputs }
  }
}

#[async_trait]
impl Asset<AssetKind> for InstallConfigAsset {
  type State = InstallConfigState;

  fn kind(&self) -> AssetKind {
    AssetKind::InstallConfig
  }

  fn name(&self) -> &'static str {
    "Install Config"
  }

  async fn generate(&self, ctx: &BuildContext, _parents: &Parents<AssetKind>) -> Result<Self::State, AssetError> {
    ctx.check()?;
    let config = InstallConfig::from_inputs(&self.inputs);
    config.validate()?;
    let file = yaml_file(INSTALL_CONFIG_FILENAME, &config)?;
    Ok(InstallConfigState { config, file })
  }

  fn load(&self, fetcher: &dyn FileFetcher) -> Result<Option<Self::State>, AssetError> {
    let Some((config, file)) = load_yaml::<InstallConfig>(fetcher, INSTALL_CONFIG_FILENAME)? else {
      return Ok(None);
    };
    config.validate()?;
    Ok(Some(InstallConfigState { config, file }))
  }
}
