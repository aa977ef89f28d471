//! Named build targets.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::AssetKind;

/// A kind a user can ask `kiln create` for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
  InstallConfig,
  Manifests,
  IgnitionConfigs,
}

impl Target {
  pub const ALL: [Target; 3] = [Target::InstallConfig, Target::Manifests, Target::IgnitionConfigs];

  pub fn kind(self) -> AssetKind {
    match self {
      Target::InstallConfig => AssetKind::InstallConfig,
      Target::Manifests => AssetKind::Manifests,
      Target::IgnitionConfigs => AssetKind::IgnitionConfigs,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Target::InstallConfig => "install-config",
      Target::Manifests => "manifests",
      Target::IgnitionConfigs => "ignition-configs",
    }
  }

  pub fn description(self) -> &'static str {
    match self {
      Target::InstallConfig => "Generates the install config asset",
      Target::Manifests => "Generates the cluster manifests and machine definitions",
      Target::IgnitionConfigs => "Generates the ignition configs for bootstrap, master and worker nodes",
    }
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Target {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Target::ALL
      .into_iter()
      .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| {
        let known: Vec<&str> = Target::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown target {s:?} (expected one of: {})", known.join(", "))
      })
  }
}
