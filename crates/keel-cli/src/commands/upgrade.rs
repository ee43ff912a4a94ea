//! Upgrade command - reinstall the management components when the bundle
//! version changed and print the version diff as JSON

use std::path::PathBuf;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use keel_installer::TargetCluster;

use super::{load_spec, ComponentArgs};
use crate::Result;

/// Upgrade the management components on a cluster
#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Kubeconfig of the target cluster
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Cluster spec currently running on the cluster
    #[arg(long)]
    pub current_spec: PathBuf,

    #[command(flatten)]
    pub components: ComponentArgs,
}

pub async fn run(args: UpgradeArgs, cancel: &CancellationToken) -> Result<()> {
    let current = load_spec(&args.current_spec).await?;
    let new = load_spec(&args.components.spec).await?;
    let installer = args.components.installer()?;
    let target = TargetCluster::new(new.cluster.name.clone(), args.kubeconfig);

    match installer.upgrade(cancel, &target, &current, &new).await? {
        Some(diff) => println!("{}", serde_json::to_string_pretty(&diff)?),
        None => info!(cluster = %target.name, "management components already up to date"),
    }
    Ok(())
}
