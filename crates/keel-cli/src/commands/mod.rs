//! CLI commands

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use keel_common::{EnvFeatures, FeatureChecker, StaticFeatures};
use keel_installer::{
    ApplyOrder, BundleManifestReader, ClusterSpec, ComponentsInstaller, InstallerConfig,
    KubeClient,
};

use crate::{Error, Result};

pub mod install;
pub mod mirror;
pub mod render;
pub mod upgrade;

/// Arguments shared by every command that loads the component manifest
#[derive(Args, Debug, Clone)]
pub struct ComponentArgs {
    /// Cluster spec YAML to install
    #[arg(long)]
    pub spec: PathBuf,

    /// Directory that relative manifest references resolve against
    #[arg(long, env = "KEEL_BUNDLE_DIR", default_value = ".")]
    pub bundle_dir: PathBuf,

    /// Readiness timeout in seconds
    #[arg(long, env = "KEEL_READINESS_TIMEOUT", default_value_t = 600)]
    pub timeout: u64,

    /// Activate a feature in addition to those set in the environment
    #[arg(long = "feature")]
    pub feature: Vec<String>,

    /// Apply namespaces, CRDs and RBAC before the controller Deployment
    #[arg(long)]
    pub prerequisites_first: bool,
}

impl ComponentArgs {
    /// Installer settings selected by the flags
    pub fn installer_config(&self) -> InstallerConfig {
        InstallerConfig {
            readiness_timeout: Duration::from_secs(self.timeout),
            apply_order: if self.prerequisites_first {
                ApplyOrder::PrerequisitesFirst
            } else {
                ApplyOrder::PrimaryFirst
            },
        }
    }

    /// Build an installer talking to clusters through kube-rs
    pub fn installer(&self) -> Result<ComponentsInstaller> {
        let features = CliFeatures {
            env: EnvFeatures::from_env(),
            flags: StaticFeatures::new(self.feature.iter().cloned()),
        };
        Ok(ComponentsInstaller::new(
            Arc::new(KubeClient::new()),
            Arc::new(BundleManifestReader::new(&self.bundle_dir)?),
            Arc::new(features),
            self.installer_config(),
        ))
    }
}

/// Features active in the environment or named on the command line
struct CliFeatures {
    env: EnvFeatures,
    flags: StaticFeatures,
}

impl FeatureChecker for CliFeatures {
    fn is_active(&self, feature: &str) -> bool {
        self.env.is_active(feature) || self.flags.is_active(feature)
    }
}

pub(crate) async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) async fn load_spec(path: &Path) -> Result<ClusterSpec> {
    Ok(ClusterSpec::from_yaml(&read_file(path).await?)?)
}

/// Join JSON documents into one YAML stream
pub(crate) fn to_stream(documents: &[serde_json::Value]) -> Result<String> {
    let rendered = documents
        .iter()
        .map(serde_json::to_string_pretty)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rendered.join("\n---\n"))
}
