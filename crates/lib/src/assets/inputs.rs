//! User decisions that seed the asset graph.
//!
//! Values come from built-in defaults, then `KILN_*` environment variables,
//! then whatever the caller overrides (the CLI applies its flags last).

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asset::AssetError;
use crate::consts::ENV_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
  Aws,
  Azure,
  Gcp,
  None,
}

impl Platform {
  pub const ALL: [Platform; 4] = [Platform::Aws, Platform::Azure, Platform::Gcp, Platform::None];

  pub fn as_str(self) -> &'static str {
    match self {
      Platform::Aws => "aws",
      Platform::Azure => "azure",
      Platform::Gcp => "gcp",
      Platform::None => "none",
    }
  }

  /// Cloud platforms need a region; `none` does not.
  pub fn needs_region(self) -> bool {
    self != Platform::None
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Platform {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Platform::ALL
      .into_iter()
      .find(|p| p.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("unknown platform {s:?} (expected one of: aws, azure, gcp, none)"))
  }
}

/// Everything the `InstallConfig` leaf needs to generate its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallInputs {
  pub cluster_name: String,
  pub base_domain: String,
  pub platform: Platform,
  pub region: Option<String>,
  pub control_plane_replicas: u32,
  pub compute_replicas: u32,
  pub pull_secret: String,
  pub ssh_key: Option<String>,
  pub machine_network: String,
  pub cluster_network: String,
  pub host_prefix: u8,
  pub service_network: String,
}

impl Default for InstallInputs {
  fn default() -> Self {
    Self {
      cluster_name: "kiln".to_string(),
      base_domain: "example.com".to_string(),
      platform: Platform::None,
      region: None,
      control_plane_replicas: 3,
      compute_replicas: 3,
      pull_secret: r#"{"auths":{}}"#.to_string(),
      ssh_key: None,
      machine_network: "10.0.0.0/16".to_string(),
      cluster_network: "10.128.0.0/14".to_string(),
      host_prefix: 23,
      service_network: "172.30.0.0/16".to_string(),
    }
  }
}

fn var(name: &str) -> Option<String> {
  env::var(format!("{ENV_PREFIX}{name}")).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `KILN_<name>` when it is set.
fn parsed<T>(name: &str) -> Result<Option<T>, AssetError>
where
  T: FromStr,
  T::Err: fmt::Display,
{
  let Some(raw) = var(name) else {
    return Ok(None);
  };
  raw
    .trim()
    .parse()
    .map(Some)
    .map_err(|e| AssetError::validation(format!("{ENV_PREFIX}{name}"), format!("{raw:?}: {e}")))
}

impl InstallInputs {
  /// Defaults overlaid with any `KILN_*` environment variables.
  ///
  /// Blank variables are treated as unset. A value that fails to parse is a
  /// [`AssetError::Validation`] naming the variable.
  pub fn from_env() -> Result<Self, AssetError> {
    let mut inputs = Self::default();

    if let Some(v) = var("CLUSTER_NAME") {
      inputs.cluster_name = v;
    }
    if let Some(v) = var("BASE_DOMAIN") {
      inputs.base_domain = v;
    }
    if let Some(p) = parsed("PLATFORM")? {
      inputs.platform = p;
    }
    if let Some(v) = var("REGION") {
      inputs.region = Some(v);
    }
    if let Some(n) = parsed("CONTROL_PLANE_REPLICAS")? {
      inputs.control_plane_replicas = n;
    }
    if let Some(n) = parsed("COMPUTE_REPLICAS")? {
      inputs.compute_replicas = n;
    }
    if let Some(v) = var("PULL_SECRET") {
      inputs.pull_secret = v;
    }
    if let Some(v) = var("SSH_KEY") {
      inputs.ssh_key = Some(v);
    }

    debug!(platform = %inputs.platform, cluster = %inputs.cluster_name, "resolved install inputs from environment");
    Ok(inputs)
  }
}
