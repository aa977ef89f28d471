//! Render functions for the individual cluster manifests.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::asset::{AssetError, Parents};
use crate::assets::AssetKind;
use crate::assets::cluster_id::ClusterId;
use crate::assets::inputs::Platform;
use crate::assets::installconfig::{InstallConfig, InstallConfigState};
use crate::assets::password::KubeadminPassword;

use super::ManifestAsset;

const CONFIG_API: &str = "config.openshift.io/v1";
const UPGRADE_SERVICE: &str = "https://api.openshift.com/api/upgrades_info/v1/graph";

const INSTALL_CONFIG: &[AssetKind] = &[AssetKind::InstallConfig];
const INSTALL_CONFIG_AND_ID: &[AssetKind] = &[AssetKind::InstallConfig, AssetKind::ClusterId];

/// Every manifest asset, in registration order.
pub fn all() -> Vec<ManifestAsset> {
  vec![
    ManifestAsset::new(
      AssetKind::InfrastructureConfig,
      "Infrastructure Config",
      "manifests/cluster-infrastructure-02-config.yml",
      INSTALL_CONFIG_AND_ID,
      infrastructure,
    ),
    ManifestAsset::new(
      AssetKind::DnsConfig,
      "DNS Config",
      "manifests/cluster-dns-02-config.yml",
      INSTALL_CONFIG,
      dns,
    ),
    ManifestAsset::new(
      AssetKind::NetworkConfig,
      "Network Config",
      "manifests/cluster-network-02-config.yml",
      INSTALL_CONFIG,
      network,
    ),
    ManifestAsset::new(
      AssetKind::ProxyConfig,
      "Proxy Config",
      "manifests/cluster-proxy-01-config.yaml",
      INSTALL_CONFIG,
      proxy,
    ),
    ManifestAsset::new(
      AssetKind::SchedulerConfig,
      "Scheduler Config",
      "manifests/cluster-scheduler-02-config.yml",
      INSTALL_CONFIG,
      scheduler,
    ),
    ManifestAsset::new(
      AssetKind::IngressConfig,
      "Ingress Config",
      "manifests/cluster-ingress-02-config.yml",
      INSTALL_CONFIG,
      ingress,
    ),
    ManifestAsset::new(
      AssetKind::FeatureGate,
      "Feature Gate Config",
      "manifests/99_feature-gate.yaml",
      INSTALL_CONFIG,
      feature_gate,
    ),
    ManifestAsset::new(
      AssetKind::CvoOverrides,
      "CVO Overrides",
      "manifests/cvo-overrides.yaml",
      INSTALL_CONFIG_AND_ID,
      cvo_overrides,
    ),
    ManifestAsset::new(
      AssetKind::ClusterConfig,
      "Cluster Config",
      "manifests/cluster-config.yaml",
      INSTALL_CONFIG,
      cluster_config,
    ),
    ManifestAsset::new(
      AssetKind::CloudProviderConfig,
      "Cloud Provider Config",
      "manifests/cloud-provider-config.yaml",
      INSTALL_CONFIG,
      cloud_provider_config,
    ),
    ManifestAsset::new(
      AssetKind::PullSecret,
      "Pull Secret",
      "openshift/99_openshift-config-pull-secret.yaml",
      INSTALL_CONFIG,
      pull_secret,
    ),
    ManifestAsset::new(
      AssetKind::KubeadminPasswordSecret,
      "Kubeadmin Password Secret",
      "openshift/99_kubeadmin-password-secret.yaml",
      &[AssetKind::KubeadminPassword],
      kubeadmin_secret,
    ),
  ]
}

fn install_config(parents: &Parents<AssetKind>) -> Result<&InstallConfig, AssetError> {
  Ok(&parents.get::<InstallConfigState>(AssetKind::InstallConfig)?.config)
}

/// Platform type as the cluster config API spells it.
fn platform_type(platform: Platform) -> &'static str {
  match platform {
    Platform::Aws => "AWS",
    Platform::Azure => "Azure",
    Platform::Gcp => "GCP",
    Platform::None => "None",
  }
}

fn config_object(kind: &str, spec: Value) -> Value {
  json!({
    "apiVersion": CONFIG_API,
    "kind": kind,
    "metadata": { "name": "cluster" },
    "spec": spec,
  })
}

fn infrastructure(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let config = install_config(parents)?;
  let id = parents.get::<ClusterId>(AssetKind::ClusterId)?;
  let domain = config.cluster_domain();
  let platform = platform_type(config.platform());

  let mut object = config_object(
    "Infrastructure",
    json!({
      "cloudConfig": { "name": "" },
      "platformSpec": { "type": platform },
    }),
  );
  object["status"] = json!({
    "infrastructureName": id.infra_id(&config.metadata.name),
    "platform": platform,
    "apiServerURL": format!("https://api.{domain}:6443"),
    "apiServerInternalURI": format!("https://api-int.{domain}:6443"),
  });
  if config.platform().needs_region() {
    object["spec"]["cloudConfig"] = json!({ "name": "cloud-provider-config", "key": "config" });
  }
  Ok(object)
}

fn dns(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let config = install_config(parents)?;
  Ok(config_object("DNS", json!({ "baseDomain": config.cluster_domain() })))
}

fn network(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let net = &install_config(parents)?.networking;
  let cluster_network: Vec<Value> = net
    .cluster_network
    .iter()
    .map(|e| json!({ "cidr": e.cidr, "hostPrefix": e.host_prefix }))
    .collect();
  Ok(config_object(
    "Network",
    json!({
      "clusterNetwork": cluster_network,
      "serviceNetwork": net.service_network,
      "networkType": net.network_type,
    }),
  ))
}

fn proxy(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  install_config(parents)?;
  Ok(config_object("Proxy", json!({ "trustedCA": { "name": "" } })))
}

fn scheduler(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let config = install_config(parents)?;
  Ok(config_object(
    "Scheduler",
    json!({
      "mastersSchedulable": config.compute_replicas() == 0,
      "policy": { "name": "" },
    }),
  ))
}

fn ingress(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let config = install_config(parents)?;
  Ok(config_object(
    "Ingress",
    json!({ "domain": format!("apps.{}", config.cluster_domain()) }),
  ))
}

fn feature_gate(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  install_config(parents)?;
  Ok(config_object("FeatureGate", json!({ "featureSet": "" })))
}

fn cvo_overrides(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  install_config(parents)?;
  let id = parents.get::<ClusterId>(AssetKind::ClusterId)?;
  Ok(json!({
    "apiVersion": CONFIG_API,
    "kind": "ClusterVersion",
    "metadata": { "namespace": "openshift-cluster-version", "name": "version" },
    "spec": {
      "upstream": UPGRADE_SERVICE,
      "channel": "stable",
      "clusterID": id.uuid.to_string(),
    },
  }))
}

/// The install config, minus the pull secret, published for operators.
fn cluster_config(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let mut redacted = install_config(parents)?.clone();
  redacted.pull_secret = String::new();
  let text = serde_yaml::to_string(&redacted).map_err(|e| AssetError::encode("manifests/cluster-config.yaml", e))?;
  Ok(json!({
    "apiVersion": "v1",
    "kind": "ConfigMap",
    "metadata": { "namespace": "kube-system", "name": "cluster-config-v1" },
    "data": { "install-config": text },
  }))
}

fn cloud_provider_config(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let config = install_config(parents)?;
  let body = match config.region() {
    Some(region) => json!({ "platform": config.platform().as_str(), "region": region }).to_string(),
    None => String::new(),
  };
  Ok(json!({
    "apiVersion": "v1",
    "kind": "ConfigMap",
    "metadata": { "namespace": "openshift-config", "name": "cloud-provider-config" },
    "data": { "config": body },
  }))
}

fn pull_secret(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let config = install_config(parents)?;
  Ok(json!({
    "apiVersion": "v1",
    "kind": "Secret",
    "type": "kubernetes.io/dockerconfigjson",
    "metadata": { "namespace": "openshift-config", "name": "pull-secret" },
    "data": { ".dockerconfigjson": STANDARD.encode(config.pull_secret.as_bytes()) },
  }))
}

fn kubeadmin_secret(parents: &Parents<AssetKind>) -> Result<Value, AssetError> {
  let password = parents.get::<KubeadminPassword>(AssetKind::KubeadminPassword)?;
  Ok(json!({
    "apiVersion": "v1",
    "kind": "Secret",
    "type": "Opaque",
    "metadata": { "namespace": "kube-system", "name": "kubeadmin" },
    "data": { "kubeadmin": STANDARD.encode(password.hash().0.as_bytes()) },
  }))
}
