//! Cluster-specific configuration of the management components
//!
//! Feature gates and proxy settings are injected into the first container of
//! the primary Deployment. The step functions append unconditionally, so
//! calling one twice on the same Deployment duplicates its output. The
//! [`Configurator`] consumes a freshly parsed [`ComponentObjectSet`] which
//! rules that out for the install path.

use std::collections::HashMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, EnvVar};
use tracing::debug;

use keel_common::features::{FeatureChecker, FULL_LIFECYCLE_API};
use keel_common::{Error, Result};

use crate::components::{ComponentObjectSet, ConfiguredComponents};
use crate::spec::Cluster;
use crate::COMPONENTS_NAMESPACE;

/// Gate enabling the full lifecycle controllers
pub const FULL_LIFECYCLE_GATE: &str = "FullLifecycleAPI";

/// Datacenter kinds that always run with [`FULL_LIFECYCLE_GATE`]
pub const FULL_LIFECYCLE_PROVIDERS: &[&str] = &["VSphereDatacenterConfig", "DockerDatacenterConfig"];

struct FeatureGate {
    name: &'static str,
    enabled: fn(&Cluster, &dyn FeatureChecker) -> bool,
}

/// Known gates in the order they are rendered
const FEATURE_GATES: &[FeatureGate] = &[FeatureGate {
    name: FULL_LIFECYCLE_GATE,
    enabled: full_lifecycle_enabled,
}];

fn full_lifecycle_enabled(cluster: &Cluster, features: &dyn FeatureChecker) -> bool {
    features.is_active(FULL_LIFECYCLE_API)
        || FULL_LIFECYCLE_PROVIDERS.contains(&cluster.datacenter_ref.kind.as_str())
}

/// Gates to enable for `cluster`, in rendering order
pub fn active_feature_gates(cluster: &Cluster, features: &dyn FeatureChecker) -> Vec<&'static str> {
    FEATURE_GATES
        .iter()
        .filter(|gate| (gate.enabled)(cluster, features))
        .map(|gate| gate.name)
        .collect()
}

/// Append one `--feature-gates=a=true,b=true` argument to the first
/// container. An empty gate list leaves the Deployment untouched.
pub fn with_feature_gates(mut deployment: Deployment, gates: &[&str]) -> Result<Deployment> {
    if gates.is_empty() {
        return Ok(deployment);
    }
    let flag = format!(
        "--feature-gates={}",
        gates
            .iter()
            .map(|g| format!("{}=true", g))
            .collect::<Vec<_>>()
            .join(",")
    );
    first_container(&mut deployment)?
        .args
        .get_or_insert_with(Vec::new)
        .push(flag);
    Ok(deployment)
}

/// Append `env` to the first container's environment sorted by name.
///
/// Existing variables with the same name are kept.
pub fn with_proxy_env(mut deployment: Deployment, env: &HashMap<String, String>) -> Result<Deployment> {
    if env.is_empty() {
        return Ok(deployment);
    }
    let mut names: Vec<&String> = env.keys().collect();
    names.sort();

    let container_env = first_container(&mut deployment)?
        .env
        .get_or_insert_with(Vec::new);
    for name in names {
        container_env.push(EnvVar {
            name: name.clone(),
            value: Some(env[name].clone()),
            value_from: None,
        });
    }
    Ok(deployment)
}

/// Place the Deployment in `namespace` unless it already names one
pub fn with_default_namespace(mut deployment: Deployment, namespace: &str) -> Deployment {
    if deployment.metadata.namespace.as_deref().map_or(true, str::is_empty) {
        deployment.metadata.namespace = Some(namespace.to_string());
    }
    deployment
}

fn first_container(deployment: &mut Deployment) -> Result<&mut Container> {
    let name = deployment.metadata.name.clone().unwrap_or_default();
    deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|p| p.containers.first_mut())
        .ok_or_else(|| Error::configuration(format!("deployment {} has no containers", name)))
}

/// Configures a parsed component set for one cluster
pub struct Configurator<'a> {
    cluster: &'a Cluster,
    features: &'a dyn FeatureChecker,
}

impl<'a> Configurator<'a> {
    /// Configure for `cluster` with the given active features
    pub fn new(cluster: &'a Cluster, features: &'a dyn FeatureChecker) -> Self {
        Self { cluster, features }
    }

    /// Inject feature gates and proxy environment into the primary
    /// Deployment and default its namespace to [`COMPONENTS_NAMESPACE`];
    /// auxiliary objects pass through unchanged
    pub fn configure(&self, components: ComponentObjectSet) -> Result<ConfiguredComponents> {
        let (primary, auxiliary) = components.into_parts();

        let gates = active_feature_gates(self.cluster, self.features);
        let env = self.cluster.proxy_environment();
        debug!(
            cluster = %self.cluster.name,
            gates = ?gates,
            proxy_vars = env.len(),
            "configuring management components"
        );

        let primary = with_default_namespace(primary, COMPONENTS_NAMESPACE);
        let primary = with_feature_gates(primary, &gates)?;
        let primary = with_proxy_env(primary, &env)?;
        Ok(ConfiguredComponents::new(primary, auxiliary))
    }
}
