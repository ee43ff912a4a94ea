//! Cluster access for the installer
//!
//! Provides a trait-based abstraction over apply and readiness checks, so
//! tests can mock the cluster while production code talks to the API server
//! through kube-rs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::discovery::Discovery;
use kube::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use keel_common::kube_utils;
use keel_common::Result;

/// Cluster the components are installed on
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TargetCluster {
    /// Cluster name, used for logging and connection caching
    pub name: String,
    /// Kubeconfig for the cluster; inferred from the environment when unset
    pub kubeconfig: Option<PathBuf>,
}

impl TargetCluster {
    /// Target `name` through the given kubeconfig
    pub fn new(name: impl Into<String>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kubeconfig,
        }
    }
}

/// Trait abstracting the cluster operations the installer performs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubernetesClient: Send + Sync {
    /// Create or update one object with server-side apply
    async fn apply(&self, target: &TargetCluster, manifest: &Value) -> Result<()>;

    /// Block until the deployment reports `condition` as "True", `timeout`
    /// elapses or `cancel` fires
    async fn wait_for_deployment(
        &self,
        cancel: &CancellationToken,
        target: &TargetCluster,
        timeout: Duration,
        condition: &str,
        name: &str,
        namespace: &str,
    ) -> Result<()>;
}

#[derive(Clone)]
struct Connection {
    client: Client,
    discovery: Arc<Discovery>,
}

/// [`KubernetesClient`] backed by kube-rs.
///
/// Connections and API discovery are created on first use and cached per
/// target. Discovery is refreshed when an object's type is unknown, which
/// happens after the manifest's own CRDs have been applied.
#[derive(Default)]
pub struct KubeClient {
    connections: Mutex<HashMap<TargetCluster, Connection>>,
}

impl KubeClient {
    /// Create a client with no open connections
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(&self, target: &TargetCluster) -> Result<Connection> {
        let mut connections = self.connections.lock().await;
        if let Some(connection) = connections.get(target) {
            return Ok(connection.clone());
        }

        debug!(cluster = %target.name, "connecting to cluster");
        let client = kube_utils::create_client(target.kubeconfig.as_deref()).await?;
        let discovery = Arc::new(kube_utils::run_discovery(&client).await?);
        let connection = Connection { client, discovery };
        connections.insert(target.clone(), connection.clone());
        Ok(connection)
    }

    async fn refresh_discovery(&self, target: &TargetCluster, client: Client) -> Result<Connection> {
        debug!(cluster = %target.name, "refreshing API discovery");
        let discovery = Arc::new(kube_utils::run_discovery(&client).await?);
        let connection = Connection { client, discovery };
        self.connections
            .lock()
            .await
            .insert(target.clone(), connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl KubernetesClient for KubeClient {
    async fn apply(&self, target: &TargetCluster, manifest: &Value) -> Result<()> {
        let mut connection = self.connection(target).await?;
        let gvk = kube_utils::object_gvk(manifest)?;
        if connection.discovery.resolve_gvk(&gvk).is_none() {
            connection = self.refresh_discovery(target, connection.client).await?;
        }
        kube_utils::apply_object(&connection.client, &connection.discovery, manifest).await
    }

    async fn wait_for_deployment(
        &self,
        cancel: &CancellationToken,
        target: &TargetCluster,
        timeout: Duration,
        condition: &str,
        name: &str,
        namespace: &str,
    ) -> Result<()> {
        let connection = self.connection(target).await?;
        kube_utils::wait_for_deployment_condition(
            &connection.client,
            cancel,
            name,
            namespace,
            condition,
            timeout,
        )
        .await
    }
}
