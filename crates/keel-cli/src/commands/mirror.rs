//! Mirror command - add a cluster's registry mirror to kubeadm objects

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tracing::{debug, warn};

use keel_common::yaml;
use keel_installer::registry_mirror::set_registry_mirror;
use keel_installer::OsFamily;

use super::{load_spec, read_file, to_stream};
use crate::{Error, Result};

/// Node operating system
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Os {
    Bottlerocket,
    Ubuntu,
}

impl From<Os> for OsFamily {
    fn from(os: Os) -> Self {
        match os {
            Os::Bottlerocket => OsFamily::Bottlerocket,
            Os::Ubuntu => OsFamily::Ubuntu,
        }
    }
}

/// Configure the registry mirror from a cluster spec on kubeadm objects
#[derive(Args, Debug)]
pub struct MirrorArgs {
    /// Cluster spec holding the registry mirror configuration
    #[arg(long)]
    pub spec: PathBuf,

    /// KubeadmControlPlane / KubeadmConfigTemplate YAML
    #[arg(long)]
    pub objects: PathBuf,

    /// Operating system of the nodes
    #[arg(long, value_enum)]
    pub os: Os,
}

pub async fn run(args: MirrorArgs) -> Result<()> {
    println!("{}", configure(&args).await?);
    Ok(())
}

/// The objects with the mirror configured, as a multi-document stream
pub async fn configure(args: &MirrorArgs) -> Result<String> {
    let spec = load_spec(&args.spec).await?;
    let mirror = spec.cluster.registry_mirror_configuration.as_ref();
    if mirror.is_none() {
        warn!(cluster = %spec.cluster.name, "cluster has no registry mirror configuration");
    }

    let content = read_file(&args.objects).await?;
    let documents = yaml::parse_documents(&content).map_err(|(index, e)| {
        Error::validation(format!(
            "{} document {}: {}",
            args.objects.display(),
            index,
            e
        ))
    })?;

    let mut objects = Vec::with_capacity(documents.len());
    for document in documents {
        let mut object = document.value;
        if !set_registry_mirror(&mut object, args.os.into(), mirror)? {
            debug!(document = document.index, "no bootstrap configuration, leaving as is");
        }
        objects.push(object);
    }
    to_stream(&objects)
}
