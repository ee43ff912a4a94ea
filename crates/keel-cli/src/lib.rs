//! Keel CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// Keel - install and upgrade management components on Kubernetes clusters
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the management components on a cluster
    Install(commands::install::InstallArgs),
    /// Upgrade the management components if the bundle version changed
    Upgrade(commands::upgrade::UpgradeArgs),
    /// Print the configured component objects without touching a cluster
    Render(commands::render::RenderArgs),
    /// Add registry mirror configuration to kubeadm objects
    Mirror(commands::mirror::MirrorArgs),
}

impl Cli {
    /// Run the CLI command until it finishes or `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        match self.command {
            Commands::Install(args) => commands::install::run(args, &cancel).await,
            Commands::Upgrade(args) => commands::upgrade::run(args, &cancel).await,
            Commands::Render(args) => commands::render::run(args).await,
            Commands::Mirror(args) => commands::mirror::run(args).await,
        }
    }
}
