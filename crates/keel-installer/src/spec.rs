//! Cluster specification consumed by the installer
//!
//! Only the parts of a cluster spec that drive the management components
//! are modelled: cluster identity and role, the infrastructure provider
//! reference, proxy settings and the versions bundle entry for the
//! components themselves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use keel_common::{yaml, Error, Result};

use crate::registry_mirror::RegistryMirrorConfiguration;

/// Proxy environment variable names, in the order they are reported
pub const HTTP_PROXY: &str = "HTTP_PROXY";
/// See [`HTTP_PROXY`]
pub const HTTPS_PROXY: &str = "HTTPS_PROXY";
/// See [`HTTP_PROXY`]
pub const NO_PROXY: &str = "NO_PROXY";

/// A cluster together with the versions bundle it should run
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster metadata
    pub cluster: Cluster,
    /// Component versions for this cluster
    pub versions_bundle: VersionsBundle,
}

impl ClusterSpec {
    /// Decode a spec from a YAML document with camelCase keys
    pub fn from_yaml(input: &str) -> Result<Self> {
        let value = yaml::parse_yaml(input)
            .map_err(|e| Error::serialization(format!("invalid cluster spec YAML: {}", e)))?;
        serde_json::from_value(value)
            .map_err(|e| Error::serialization(format!("invalid cluster spec: {}", e)))
    }

    /// Version of the management components in this spec's bundle
    pub fn components_version(&self) -> &str {
        &self.versions_bundle.components.version
    }
}

/// Cluster identity, role and provider
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cluster name
    pub name: String,
    /// Name of the cluster managing this one; unset or equal to `name` for
    /// a self-managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_cluster_name: Option<String>,
    /// Infrastructure provider configuration of the cluster
    pub datacenter_ref: Ref,
    /// Outbound proxy settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_configuration: Option<ProxyConfiguration>,
    /// Private mirror for the public image registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_mirror_configuration: Option<RegistryMirrorConfiguration>,
}

impl Cluster {
    /// Whether the cluster manages its own control plane
    pub fn is_self_managed(&self) -> bool {
        match &self.management_cluster_name {
            None => true,
            Some(m) => m.is_empty() || *m == self.name,
        }
    }

    /// Proxy environment for workloads on this cluster; empty without proxy
    /// configuration
    pub fn proxy_environment(&self) -> HashMap<String, String> {
        self.proxy_configuration
            .as_ref()
            .map(ProxyConfiguration::environment)
            .unwrap_or_default()
    }
}

/// Reference to another object by kind and name
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Ref {
    /// Object kind
    pub kind: String,
    /// Object name
    pub name: String,
}

/// Outbound proxy settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    /// Proxy for plain HTTP traffic
    #[serde(default)]
    pub http_proxy: String,
    /// Proxy for HTTPS traffic
    #[serde(default)]
    pub https_proxy: String,
    /// Destinations bypassing the proxy
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

impl ProxyConfiguration {
    /// Environment variables carrying this configuration; empty values are
    /// left out
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if !self.http_proxy.is_empty() {
            env.insert(HTTP_PROXY.to_string(), self.http_proxy.clone());
        }
        if !self.https_proxy.is_empty() {
            env.insert(HTTPS_PROXY.to_string(), self.https_proxy.clone());
        }
        if !self.no_proxy.is_empty() {
            env.insert(NO_PROXY.to_string(), self.no_proxy.join(","));
        }
        env
    }
}

/// Versions bundle entries used by the installer
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct VersionsBundle {
    /// The management components
    pub components: ComponentsBundle,
}

/// Version and manifest of the management components
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ComponentsBundle {
    /// Version string, compared verbatim
    pub version: String,
    /// Where the component manifest lives
    pub manifest: ManifestReference,
}

/// Locator of a manifest inside a bundle
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestReference {
    /// Local path, `file://` URI or `http(s)://` URL
    pub uri: String,
}

impl ManifestReference {
    /// Reference the manifest at `uri`
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}
