//! Management component installer and upgrade reconciler
//!
//! An install loads the component manifest named by the spec's versions
//! bundle, parses it, configures the primary Deployment for the cluster,
//! applies every object and waits for the Deployment to become available.
//! An upgrade decides whether an install is needed at all:
//!
//! - the cluster is not self-managed: skip, its management cluster owns
//!   the components
//! - the component version did not change: skip
//! - otherwise: install the new version and report the version change
//!
//! Applies are sequential and not rolled back; a failed install leaves
//! whatever was applied before the failure in place. Re-running is safe
//! because every apply is a server-side apply.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel_common::kube_utils::CONDITION_AVAILABLE;
use keel_common::{Error, FeatureChecker, Result};

use crate::client::{KubernetesClient, TargetCluster};
use crate::components::{component_parser, ApplyOrder, ComponentObjectSet, ConfiguredComponents};
use crate::configure::Configurator;
use crate::diff::{components_change_diff, ChangeDiff};
use crate::reader::ManifestReader;
use crate::spec::ClusterSpec;
use crate::COMPONENTS_NAMESPACE;

/// Default bound on the readiness wait
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(600);

/// Installer tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallerConfig {
    /// How long to wait for the primary Deployment to become available
    pub readiness_timeout: Duration,
    /// Order in which objects are applied
    pub apply_order: ApplyOrder,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            apply_order: ApplyOrder::default(),
        }
    }
}

/// Installs and upgrades the management components
pub struct ComponentsInstaller {
    client: Arc<dyn KubernetesClient>,
    reader: Arc<dyn ManifestReader>,
    features: Arc<dyn FeatureChecker>,
    config: InstallerConfig,
}

impl ComponentsInstaller {
    /// Create an installer from its collaborators
    pub fn new(
        client: Arc<dyn KubernetesClient>,
        reader: Arc<dyn ManifestReader>,
        features: Arc<dyn FeatureChecker>,
        config: InstallerConfig,
    ) -> Self {
        Self {
            client,
            reader,
            features,
            config,
        }
    }

    /// Installer configuration
    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Load, parse and configure the components for `spec` without touching
    /// a cluster
    pub async fn prepare(&self, spec: &ClusterSpec) -> Result<ConfiguredComponents> {
        let reference = &spec.versions_bundle.components.manifest;
        let manifest = self
            .reader
            .read(reference)
            .await
            .map_err(|e| e.context("loading manifest for management components"))?;
        debug!(
            manifest = %manifest.filename,
            bytes = manifest.content.len(),
            "loaded management components manifest"
        );

        let components: ComponentObjectSet = component_parser()
            .and_then(|parser| parser.parse_into(&manifest.content))
            .map_err(|e| e.context("parsing management components"))?;

        Configurator::new(&spec.cluster, self.features.as_ref())
            .configure(components)
            .map_err(|e| e.context("configuring management components"))
    }

    /// Install the components for `spec` on `target` and wait until they are
    /// available
    pub async fn install(
        &self,
        cancel: &CancellationToken,
        target: &TargetCluster,
        spec: &ClusterSpec,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("installing management components"));
        }

        let components = self.prepare(spec).await?;
        let objects = components
            .to_manifest(self.config.apply_order)
            .map_err(|e| e.context("applying management components"))?;

        info!(
            cluster = %target.name,
            version = %spec.components_version(),
            objects = objects.len(),
            "applying management components"
        );
        for object in &objects {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("applying management components"));
            }
            self.client
                .apply(target, object)
                .await
                .map_err(|e| e.context("applying management components"))?;
        }

        let name = components.primary_name();
        let namespace = components.primary_namespace().unwrap_or(COMPONENTS_NAMESPACE);
        info!(
            cluster = %target.name,
            deployment = %name,
            namespace = %namespace,
            timeout = ?self.config.readiness_timeout,
            "waiting for management components"
        );
        self.client
            .wait_for_deployment(
                cancel,
                target,
                self.config.readiness_timeout,
                CONDITION_AVAILABLE,
                name,
                namespace,
            )
            .await
            .map_err(|e| e.context(format!("waiting for {} to be available", name)))?;

        info!(cluster = %target.name, deployment = %name, "management components available");
        Ok(())
    }

    /// Upgrade the components on `target` from `current` to `new`.
    ///
    /// Returns the version change when an install was performed and `None`
    /// when nothing needed to be done.
    pub async fn upgrade(
        &self,
        cancel: &CancellationToken,
        target: &TargetCluster,
        current: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<Option<ChangeDiff>> {
        if !new.cluster.is_self_managed() {
            debug!(
                cluster = %new.cluster.name,
                "cluster is not self-managed, skipping management components upgrade"
            );
            return Ok(None);
        }

        let Some(diff) = components_change_diff(current, new) else {
            debug!(
                cluster = %new.cluster.name,
                version = %new.components_version(),
                "management components version unchanged, skipping upgrade"
            );
            return Ok(None);
        };

        info!(
            cluster = %new.cluster.name,
            from = %current.components_version(),
            to = %new.components_version(),
            "upgrading management components"
        );
        self.install(cancel, target, new).await.map_err(|e| {
            e.context(format!(
                "upgrading management components from version {} to version {}",
                current.components_version(),
                new.components_version()
            ))
        })?;
        Ok(Some(diff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubernetesClient;
    use crate::reader::{Manifest, MockManifestReader};
    use crate::spec::{Cluster, ComponentsBundle, ManifestReference, Ref, VersionsBundle};
    use keel_common::features::FULL_LIFECYCLE_API;
    use keel_common::StaticFeatures;
    use mockall::predicate::*;
    use mockall::Sequence;
    use serde_json::Value;
    use std::sync::Mutex;

    const MANIFEST: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: keel-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: keel-controller-manager
  namespace: keel-system
spec:
  selector:
    matchLabels:
      app: keel
  template:
    metadata:
      labels:
        app: keel
    spec:
      containers:
        - name: manager
          image: keel/controller:v2
          args: [--leader-elect]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: keel-manager-rolebinding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: keel-manager-role
subjects: []
"#;

    fn spec(version: &str, management_cluster: Option<&str>) -> ClusterSpec {
        ClusterSpec {
            cluster: Cluster {
                name: "mgmt".to_string(),
                management_cluster_name: management_cluster.map(str::to_string),
                datacenter_ref: Ref {
                    kind: "TinkerbellDatacenterConfig".to_string(),
                    name: "dc".to_string(),
                },
                proxy_configuration: None,
                registry_mirror_configuration: None,
            },
            versions_bundle: VersionsBundle {
                components: ComponentsBundle {
                    version: version.to_string(),
                    manifest: ManifestReference::new(format!("keel/{}/components.yaml", version)),
                },
            },
        }
    }

    fn target() -> TargetCluster {
        TargetCluster::new("mgmt", None)
    }

    fn reader_returning(content: &'static str) -> MockManifestReader {
        let mut reader = MockManifestReader::new();
        reader.expect_read().returning(move |_| {
            Ok(Manifest {
                filename: "components.yaml".to_string(),
                content: content.to_string(),
            })
        });
        reader
    }

    fn installer(
        client: MockKubernetesClient,
        reader: MockManifestReader,
        features: StaticFeatures,
    ) -> ComponentsInstaller {
        ComponentsInstaller::new(
            Arc::new(client),
            Arc::new(reader),
            Arc::new(features),
            InstallerConfig::default(),
        )
    }

    fn kind_of(value: &Value) -> String {
        value["kind"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn install_applies_primary_first_then_waits() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let recorder = applied.clone();

        let mut client = MockKubernetesClient::new();
        let mut seq = Sequence::new();
        client
            .expect_apply()
            .times(3)
            .in_sequence(&mut seq)
            .returning(move |_, object| {
                recorder.lock().unwrap().push(kind_of(object));
                Ok(())
            });
        client
            .expect_wait_for_deployment()
            .with(
                always(),
                eq(target()),
                eq(DEFAULT_READINESS_TIMEOUT),
                eq(CONDITION_AVAILABLE),
                eq("keel-controller-manager"),
                eq("keel-system"),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _, _| Ok(()));

        let installer = installer(client, reader_returning(MANIFEST), StaticFeatures::none());
        installer
            .install(&CancellationToken::new(), &target(), &spec("v2", None))
            .await
            .unwrap();

        assert_eq!(
            *applied.lock().unwrap(),
            ["Deployment", "Namespace", "ClusterRoleBinding"]
        );
    }

    #[tokio::test]
    async fn install_honours_prerequisites_first() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let recorder = applied.clone();

        let mut client = MockKubernetesClient::new();
        client.expect_apply().returning(move |_, object| {
            recorder.lock().unwrap().push(kind_of(object));
            Ok(())
        });
        client
            .expect_wait_for_deployment()
            .returning(|_, _, _, _, _, _| Ok(()));

        let installer = ComponentsInstaller::new(
            Arc::new(client),
            Arc::new(reader_returning(MANIFEST)),
            Arc::new(StaticFeatures::none()),
            InstallerConfig {
                apply_order: ApplyOrder::PrerequisitesFirst,
                ..Default::default()
            },
        );
        installer
            .install(&CancellationToken::new(), &target(), &spec("v2", None))
            .await
            .unwrap();

        assert_eq!(
            *applied.lock().unwrap(),
            ["Namespace", "ClusterRoleBinding", "Deployment"]
        );
    }

    #[tokio::test]
    async fn install_sends_configured_primary() {
        let mut client = MockKubernetesClient::new();
        client
            .expect_apply()
            .withf(|_, object| kind_of(object) == "Deployment")
            .times(1)
            .returning(|_, object| {
                let args = &object["spec"]["template"]["spec"]["containers"][0]["args"];
                assert_eq!(
                    *args,
                    serde_json::json!(["--leader-elect", "--feature-gates=FullLifecycleAPI=true"])
                );
                Ok(())
            });
        client
            .expect_apply()
            .withf(|_, object| kind_of(object) != "Deployment")
            .times(2)
            .returning(|_, _| Ok(()));
        client
            .expect_wait_for_deployment()
            .returning(|_, _, _, _, _, _| Ok(()));

        let installer = installer(
            client,
            reader_returning(MANIFEST),
            StaticFeatures::new([FULL_LIFECYCLE_API]),
        );
        installer
            .install(&CancellationToken::new(), &target(), &spec("v2", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn primary_without_namespace_is_applied_where_it_is_awaited() {
        const UNNAMESPACED: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: mgr
spec:
  selector:
    matchLabels:
      app: keel
  template:
    spec:
      containers:
        - name: manager
          image: keel/controller:v2
"#;
        let applied = Arc::new(Mutex::new(Vec::new()));
        let recorder = applied.clone();
        let waited = Arc::new(Mutex::new(Vec::new()));
        let waiter = waited.clone();

        let mut client = MockKubernetesClient::new();
        client.expect_apply().times(1).returning(move |_, object| {
            recorder
                .lock()
                .unwrap()
                .push(object["metadata"]["namespace"].as_str().map(str::to_string));
            Ok(())
        });
        client
            .expect_wait_for_deployment()
            .times(1)
            .returning(move |_, _, _, _, _, namespace| {
                waiter.lock().unwrap().push(namespace.to_string());
                Ok(())
            });

        let installer = installer(client, reader_returning(UNNAMESPACED), StaticFeatures::none());
        installer
            .install(&CancellationToken::new(), &target(), &spec("v2", None))
            .await
            .unwrap();

        assert_eq!(*applied.lock().unwrap(), [Some(COMPONENTS_NAMESPACE.to_string())]);
        assert_eq!(*waited.lock().unwrap(), [COMPONENTS_NAMESPACE]);
    }

    #[tokio::test]
    async fn apply_failure_aborts_remaining_applies() {
        let mut client = MockKubernetesClient::new();
        client
            .expect_apply()
            .times(1)
            .returning(|_, _| Err(Error::internal_with_context("apply_object", "conflict")));
        client.expect_wait_for_deployment().never();

        let installer = installer(client, reader_returning(MANIFEST), StaticFeatures::none());
        let err = installer
            .install(&CancellationToken::new(), &target(), &spec("v2", None))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("applying management components"));
    }

    #[tokio::test]
    async fn load_failure_is_wrapped() {
        let mut reader = MockManifestReader::new();
        reader
            .expect_read()
            .returning(|r| Err(Error::load(&r.uri, "no such file")));
        let mut client = MockKubernetesClient::new();
        client.expect_apply().never();

        let installer = installer(client, reader, StaticFeatures::none());
        let err = installer
            .install(&CancellationToken::new(), &target(), &spec("v2", None))
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("loading manifest for management components"));
        assert!(matches!(err.root(), Error::Load { .. }));
    }

    #[tokio::test]
    async fn manifest_without_deployment_fails_before_apply() {
        let mut client = MockKubernetesClient::new();
        client.expect_apply().never();

        let installer = installer(
            client,
            reader_returning("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: keel-system\n"),
            StaticFeatures::none(),
        );
        let err = installer
            .install(&CancellationToken::new(), &target(), &spec("v2", None))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("parsing management components"));
        assert!(matches!(err.root(), Error::Assembly { .. }));
    }

    #[tokio::test]
    async fn readiness_timeout_is_wrapped() {
        let mut client = MockKubernetesClient::new();
        client.expect_apply().returning(|_, _| Ok(()));
        client
            .expect_wait_for_deployment()
            .returning(|_, _, _, _, _, _| Err(Error::timeout("deployment not available")));

        let installer = installer(client, reader_returning(MANIFEST), StaticFeatures::none());
        let err = installer
            .install(&CancellationToken::new(), &target(), &spec("v2", None))
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("waiting for keel-controller-manager to be available"));
        assert!(matches!(err.root(), Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancelled_install_applies_nothing() {
        let mut client = MockKubernetesClient::new();
        client.expect_apply().never();
        client.expect_wait_for_deployment().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let installer = installer(client, reader_returning(MANIFEST), StaticFeatures::none());
        let err = installer
            .install(&cancel, &target(), &spec("v2", None))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_between_applies_stops_install() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut client = MockKubernetesClient::new();
        client.expect_apply().times(1).returning(move |_, _| {
            trigger.cancel();
            Ok(())
        });
        client.expect_wait_for_deployment().never();

        let installer = installer(client, reader_returning(MANIFEST), StaticFeatures::none());
        let err = installer
            .install(&cancel, &target(), &spec("v2", None))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn upgrade_skips_cluster_not_self_managed() {
        let mut client = MockKubernetesClient::new();
        client.expect_apply().never();
        client.expect_wait_for_deployment().never();
        let mut reader = MockManifestReader::new();
        reader.expect_read().never();

        let installer = installer(client, reader, StaticFeatures::none());
        let diff = installer
            .upgrade(
                &CancellationToken::new(),
                &target(),
                &spec("v1", Some("other")),
                &spec("v2", Some("other")),
            )
            .await
            .unwrap();
        assert_eq!(diff, None);
    }

    #[tokio::test]
    async fn upgrade_skips_unchanged_version() {
        let mut client = MockKubernetesClient::new();
        client.expect_apply().never();
        let mut reader = MockManifestReader::new();
        reader.expect_read().never();

        let installer = installer(client, reader, StaticFeatures::none());
        let diff = installer
            .upgrade(
                &CancellationToken::new(),
                &target(),
                &spec("v1", None),
                &spec("v1", None),
            )
            .await
            .unwrap();
        assert_eq!(diff, None);
    }

    #[tokio::test]
    async fn upgrade_installs_new_version_and_reports_diff() {
        let mut client = MockKubernetesClient::new();
        client.expect_apply().times(3).returning(|_, _| Ok(()));
        client
            .expect_wait_for_deployment()
            .times(1)
            .returning(|_, _, _, _, _, _| Ok(()));
        let mut reader = MockManifestReader::new();
        reader
            .expect_read()
            .with(eq(ManifestReference::new("keel/v2/components.yaml")))
            .times(1)
            .returning(|_| {
                Ok(Manifest {
                    filename: "components.yaml".to_string(),
                    content: MANIFEST.to_string(),
                })
            });

        let installer = installer(client, reader, StaticFeatures::none());
        let diff = installer
            .upgrade(
                &CancellationToken::new(),
                &target(),
                &spec("v1", Some("mgmt")),
                &spec("v2", Some("mgmt")),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(diff.component_reports.len(), 1);
        assert_eq!(diff.component_reports[0].old_version, "v1");
        assert_eq!(diff.component_reports[0].new_version, "v2");
    }

    #[tokio::test]
    async fn upgrade_failure_names_versions() {
        let mut client = MockKubernetesClient::new();
        client
            .expect_apply()
            .returning(|_, _| Err(Error::internal_with_context("apply_object", "forbidden")));

        let installer = installer(client, reader_returning(MANIFEST), StaticFeatures::none());
        let err = installer
            .upgrade(
                &CancellationToken::new(),
                &target(),
                &spec("v1", None),
                &spec("v2", None),
            )
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("upgrading management components from version v1 to version v2"));
    }

    #[tokio::test]
    async fn prepare_touches_no_cluster() {
        let mut client = MockKubernetesClient::new();
        client.expect_apply().never();

        let installer = installer(client, reader_returning(MANIFEST), StaticFeatures::none());
        let components = installer.prepare(&spec("v2", None)).await.unwrap();
        assert_eq!(components.primary_name(), "keel-controller-manager");
        assert_eq!(components.auxiliary().len(), 2);
    }
}
