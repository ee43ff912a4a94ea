//! Shared Kubernetes utilities using kube-rs
//!
//! Provides the kubectl-equivalent pieces the installer needs: client
//! construction from a kubeconfig, server-side apply of arbitrary manifests
//! through API discovery, and cancellable condition polling.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition};
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{Discovery, Scope};
use kube::{Client, Config};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{Error, Result, FIELD_MANAGER};

/// The "Available" condition type for deployments
pub const CONDITION_AVAILABLE: &str = "Available";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default polling interval for wait operations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use keel_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Get priority for a Kubernetes resource kind (lower = apply first)
///
/// Workloads rank 8; everything ranked lower is something a workload may
/// need in place before its pods start.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Issuer" | "ClusterIssuer" | "Certificate" => 6,
        "Service" => 7,
        "Deployment" | "DaemonSet" | "StatefulSet" => 8,
        "MutatingWebhookConfiguration" | "ValidatingWebhookConfiguration" => 9,
        _ => 10,
    }
}

/// Priority of workload kinds in [`kind_priority`]
pub const WORKLOAD_PRIORITY: u8 = 8;

/// Check if a condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for DeploymentCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Poll until a condition is met, the timeout elapses or `cancel` fires.
///
/// `check_fn` returns `Ok(true)` when done and `Ok(false)` to keep polling.
/// Errors from `check_fn` are treated as transient and polled through; the
/// last one is included in the timeout message. A timeout too large to
/// represent as a deadline never expires. Each check is raced against
/// `cancel`, so a stalled check does not hold up cancellation.
pub async fn poll_until<F, Fut>(
    cancel: &CancellationToken,
    timeout: Duration,
    poll_interval: Duration,
    what: &str,
    mut check_fn: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now().checked_add(timeout);
    let mut last_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("waiting for {}", what)));
        }

        let checked = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::cancelled(format!("waiting for {}", what)));
            }
            checked = check_fn() => checked,
        };
        match checked {
            Ok(true) => return Ok(()),
            Ok(false) => trace!(what, "condition not met yet"),
            Err(e) => {
                trace!(what, error = %e, "poll check failed, retrying");
                last_error = Some(e.to_string());
            }
        }

        let now = Instant::now();
        let nap = match deadline {
            Some(deadline) if now >= deadline => {
                let mut message = format!("{} after {:?}", what, timeout);
                if let Some(e) = last_error {
                    message.push_str(&format!(" (last error: {})", e));
                }
                return Err(Error::timeout(message));
            }
            Some(deadline) => poll_interval.min(deadline - now),
            None => poll_interval,
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::cancelled(format!("waiting for {}", what)));
            }
            _ = tokio::time::sleep(nap) => {}
        }
    }
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Run API discovery against the cluster
pub async fn run_discovery(client: &Client) -> Result<Discovery> {
    Discovery::new(client.clone())
        .run()
        .await
        .map_err(|e| Error::internal_with_context("discovery", e.to_string()))
}

/// Read the group/version/kind of a manifest
pub fn object_gvk(manifest: &serde_json::Value) -> Result<GroupVersionKind> {
    let field = |pointer: &str| manifest.pointer(pointer).and_then(|v| v.as_str());
    let kind = field("/kind").ok_or_else(|| Error::manifest("object has no kind"))?;
    let api_version = field("/apiVersion")
        .ok_or_else(|| Error::manifest(format!("{} has no apiVersion", kind)))?;
    let (group, version) = parse_api_version(api_version);
    Ok(GroupVersionKind {
        group,
        version,
        kind: kind.to_string(),
    })
}

/// Server-side apply one manifest, resolving its resource through discovery.
///
/// Namespaced resources without `metadata.namespace` go to `default`.
pub async fn apply_object(
    client: &Client,
    discovery: &Discovery,
    manifest: &serde_json::Value,
) -> Result<()> {
    let field = |pointer: &str| manifest.pointer(pointer).and_then(|v| v.as_str());
    let gvk = object_gvk(manifest)?;
    let kind = gvk.kind.as_str();
    let name = field("/metadata/name")
        .ok_or_else(|| Error::manifest(format!("{} has no metadata.name", kind)))?;

    let (resource, capabilities) = discovery.resolve_gvk(&gvk).ok_or_else(|| {
        Error::internal_with_context(
            "apply_object",
            format!("unknown resource type {}/{} {}", gvk.group, gvk.version, kind),
        )
    })?;

    let api: Api<DynamicObject> = match capabilities.scope {
        Scope::Namespaced => Api::namespaced_with(
            client.clone(),
            field("/metadata/namespace").unwrap_or("default"),
            &resource,
        ),
        Scope::Cluster => Api::all_with(client.clone(), &resource),
    };

    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(manifest),
    )
    .await?;

    debug!(kind = %kind, name = %name, "applied object");
    Ok(())
}

/// Wait until a deployment reports `condition` as "True"
pub async fn wait_for_deployment_condition(
    client: &Client,
    cancel: &CancellationToken,
    name: &str,
    namespace: &str,
    condition: &str,
    timeout: Duration,
) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let what = format!("deployment {}/{} to be {}", namespace, name, condition);

    poll_until(cancel, timeout, DEFAULT_POLL_INTERVAL, &what, || {
        let deployments = deployments.clone();
        async move {
            match deployments.get_opt(name).await? {
                Some(deployment) => {
                    let conditions = deployment
                        .status
                        .as_ref()
                        .and_then(|s| s.conditions.as_deref());
                    Ok(has_condition(conditions, condition))
                }
                None => Ok(false),
            }
        }
    })
    .await
}
