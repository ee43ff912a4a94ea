//! Install command - apply the management components and wait for them

use std::path::PathBuf;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use keel_installer::TargetCluster;

use super::{load_spec, ComponentArgs};
use crate::Result;

/// Install the management components on a cluster
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Kubeconfig of the target cluster
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    #[command(flatten)]
    pub components: ComponentArgs,
}

pub async fn run(args: InstallArgs, cancel: &CancellationToken) -> Result<()> {
    let spec = load_spec(&args.components.spec).await?;
    let installer = args.components.installer()?;
    let target = TargetCluster::new(spec.cluster.name.clone(), args.kubeconfig);

    installer.install(cancel, &target, &spec).await?;
    info!(
        cluster = %target.name,
        version = %spec.components_version(),
        "management components installed"
    );
    Ok(())
}
