//! Keel management component installer
//!
//! Loads the component manifest referenced by a cluster's versions bundle,
//! parses it into one primary Deployment plus auxiliary objects, configures
//! the Deployment for the target cluster and converges the cluster with
//! server-side apply and a readiness wait.

#![deny(missing_docs)]

pub mod client;
pub mod components;
pub mod configure;
pub mod diff;
pub mod installer;
pub mod reader;
pub mod registry_mirror;
pub mod spec;

pub use client::{KubeClient, KubernetesClient, TargetCluster};
pub use components::{ApplyOrder, ComponentObject, ComponentObjectSet, ConfiguredComponents};
pub use configure::Configurator;
pub use diff::{components_change_diff, ChangeDiff, ComponentChangeDiff};
pub use installer::{ComponentsInstaller, InstallerConfig};
pub use reader::{BundleManifestReader, FileManifestReader, HttpManifestReader, Manifest, ManifestReader};
pub use registry_mirror::{OsFamily, RegistryMirrorConfiguration};
pub use spec::{Cluster, ClusterSpec, ManifestReference};

/// Namespace the management components run in when the manifest leaves it unset
pub const COMPONENTS_NAMESPACE: &str = "keel-system";

/// Name reported for the management components in change diffs
pub const COMPONENTS_NAME: &str = "Keel";
