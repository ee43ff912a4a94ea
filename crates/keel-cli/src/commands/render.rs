//! Render command - print the configured component objects in apply order

use clap::Args;

use super::{load_spec, to_stream, ComponentArgs};
use crate::Result;

/// Print the objects an install would apply
#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub components: ComponentArgs,
}

pub async fn run(args: RenderArgs) -> Result<()> {
    println!("{}", render(&args).await?);
    Ok(())
}

/// Configured objects as a multi-document stream
pub async fn render(args: &RenderArgs) -> Result<String> {
    let spec = load_spec(&args.components.spec).await?;
    let installer = args.components.installer()?;
    let components = installer.prepare(&spec).await?;
    to_stream(&components.to_manifest(installer.config().apply_order)?)
}
