//! The installer's asset graph.
//!
//! Leaves turn [`InstallInputs`] into an install config, a cluster ID and an
//! admin password. Manifests, machines, metadata and ignition configs derive
//! from those. Three [`Target`]s name the kinds a user can ask for.
//!
//! # Submodules
//!
//! - [`installconfig`] - `install-config.yaml` and its validation
//! - [`cluster_id`], [`password`] - generated identifiers and credentials
//! - [`manifests`] - cluster configuration manifests and their aggregate
//! - [`machines`] - control plane machine manifests
//! - [`metadata`] - `metadata.json`
//! - [`ignition`] - bootstrap, master and worker ignition configs

pub mod cluster_id;
mod codec;
pub mod ignition;
pub mod inputs;
pub mod installconfig;
pub mod machines;
pub mod manifests;
pub mod metadata;
pub mod password;
pub mod targets;

use std::fmt;

use serde::Serialize;

use crate::asset::Catalog;

pub use inputs::{InstallInputs, Platform};
pub use targets::Target;

/// Every asset kind in the installer graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
  InstallConfig,
  ClusterId,
  KubeadminPassword,
  InfrastructureConfig,
  DnsConfig,
  NetworkConfig,
  ProxyConfig,
  SchedulerConfig,
  IngressConfig,
  FeatureGate,
  CvoOverrides,
  ClusterConfig,
  CloudProviderConfig,
  PullSecret,
  KubeadminPasswordSecret,
  ControlPlaneMachines,
  Manifests,
  Metadata,
  BootstrapIgnition,
  MasterIgnition,
  WorkerIgnition,
  IgnitionConfigs,
}

impl AssetKind {
  pub fn as_str(self) -> &'static str {
    match self {
      AssetKind::InstallConfig => "install-config",
      AssetKind::ClusterId => "cluster-id",
      AssetKind::KubeadminPassword => "kubeadmin-password",
      AssetKind::InfrastructureConfig => "infrastructure-config",
      AssetKind::DnsConfig => "dns-config",
      AssetKind::NetworkConfig => "network-config",
      AssetKind::ProxyConfig => "proxy-config",
      AssetKind::SchedulerConfig => "scheduler-config",
      AssetKind::IngressConfig => "ingress-config",
      AssetKind::FeatureGate => "feature-gate",
      AssetKind::CvoOverrides => "cvo-overrides",
      AssetKind::ClusterConfig => "cluster-config",
      AssetKind::CloudProviderConfig => "cloud-provider-config",
      AssetKind::PullSecret => "pull-secret",
      AssetKind::KubeadminPasswordSecret => "kubeadmin-password-secret",
      AssetKind::ControlPlaneMachines => "control-plane-machines",
      AssetKind::Manifests => "manifests",
      AssetKind::Metadata => "metadata",
      AssetKind::BootstrapIgnition => "bootstrap-ignition",
      AssetKind::MasterIgnition => "master-ignition",
      AssetKind::WorkerIgnition => "worker-ignition",
      AssetKind::IgnitionConfigs => "ignition-configs",
    }
  }
}

impl fmt::Display for AssetKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The full installer catalog, seeded with `inputs`.
pub fn catalog(inputs: InstallInputs) -> Catalog<AssetKind> {
  let mut catalog = Catalog::new();
  catalog
    .register(installconfig::InstallConfigAsset::new(inputs))
    .register(cluster_id::ClusterIdAsset)
    .register(password::KubeadminPasswordAsset)
    .register(machines::ControlPlaneMachinesAsset)
    .register(manifests::ManifestsAsset)
    .register(metadata::MetadataAsset)
    .register(ignition::IgnitionAsset::bootstrap())
    .register(ignition::IgnitionAsset::master())
    .register(ignition::IgnitionAsset::worker())
    .register(ignition::IgnitionConfigsAsset);
  for asset in manifests::templates::all() {
    catalog.register(asset);
  }
  catalog
}
