//! Registry mirror configuration for kubeadm-bootstrapped nodes.
//!
//! Redirects pulls from the public image registry through a private mirror.
//! Bottlerocket nodes take the mirror as structured kubeadm configuration;
//! Ubuntu nodes get a containerd config fragment and the mirror's CA written
//! as bootstrap files.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use keel_common::{Error, Result};

/// Registry whose pulls are redirected to the mirror
pub const UPSTREAM_REGISTRY: &str = "public.ecr.aws";

/// Containerd configuration fragment written on Ubuntu nodes
pub const CONTAINERD_CONFIG_PATH: &str = "/etc/containerd/config_append.toml";

const CONTAINERD_CERTS_DIR: &str = "/etc/containerd/certs.d";
const FILE_OWNER: &str = "root:root";

/// Mirror endpoint and TLS settings from the cluster spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMirrorConfiguration {
    /// Mirror host
    pub endpoint: String,
    /// Mirror port
    pub port: String,
    /// PEM CA bundle for the mirror; empty to use system roots
    #[serde(default)]
    pub ca_cert_content: String,
    /// Skip TLS verification of the mirror
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl RegistryMirrorConfiguration {
    /// `host:port` of the mirror
    pub fn address(&self) -> String {
        format!("{}:{}", self.endpoint, self.port)
    }

    fn ca_path(&self) -> String {
        format!("{}/{}/ca.crt", CONTAINERD_CERTS_DIR, self.address())
    }
}

/// Containerd config fragment pointing the upstream registry at the mirror
pub fn containerd_config(mirror: &RegistryMirrorConfiguration) -> String {
    let address = mirror.address();
    let mut lines = vec![
        r#"[plugins."io.containerd.grpc.v1.cri".registry.mirrors]"#.to_string(),
        format!(
            r#"  [plugins."io.containerd.grpc.v1.cri".registry.mirrors."{}"]"#,
            UPSTREAM_REGISTRY
        ),
        format!(r#"    endpoint = ["https://{}"]"#, address),
    ];

    let has_ca = !mirror.ca_cert_content.is_empty();
    if has_ca || mirror.insecure_skip_verify {
        lines.push(format!(
            r#"  [plugins."io.containerd.grpc.v1.cri".registry.configs."{}".tls]"#,
            address
        ));
        if has_ca {
            lines.push(format!(r#"    ca_file = "{}""#, mirror.ca_path()));
        }
        if mirror.insecure_skip_verify {
            lines.push("    insecure_skip_verify = true".to_string());
        }
    }
    lines.join("\n")
}

/// Bootstrap files configuring containerd on Ubuntu nodes
pub fn ubuntu_bootstrap_files(mirror: Option<&RegistryMirrorConfiguration>) -> Vec<Value> {
    let Some(mirror) = mirror else {
        return Vec::new();
    };

    let mut files = vec![json!({
        "path": CONTAINERD_CONFIG_PATH,
        "owner": FILE_OWNER,
        "content": containerd_config(mirror),
    })];
    if !mirror.ca_cert_content.is_empty() {
        files.push(json!({
            "path": mirror.ca_path(),
            "owner": FILE_OWNER,
            "content": mirror.ca_cert_content,
        }));
    }
    files
}

/// kubeadm `registryMirror` block for Bottlerocket nodes
pub fn bottlerocket_registry_mirror(mirror: &RegistryMirrorConfiguration) -> Value {
    let mut block = Map::new();
    block.insert("endpoint".to_string(), Value::String(mirror.address()));
    if !mirror.ca_cert_content.is_empty() {
        block.insert(
            "caCert".to_string(),
            Value::String(mirror.ca_cert_content.clone()),
        );
    }
    Value::Object(block)
}

/// Set the mirror on a Bottlerocket `KubeadmControlPlane`
pub fn set_control_plane_mirror_bottlerocket(
    control_plane: &mut Value,
    mirror: Option<&RegistryMirrorConfiguration>,
) -> Result<()> {
    let Some(mirror) = mirror else {
        return Ok(());
    };
    let block = bottlerocket_registry_mirror(mirror);
    for section in ["clusterConfiguration", "joinConfiguration"] {
        object_at(control_plane, &["spec", "kubeadmConfigSpec", section])?
            .insert("registryMirror".to_string(), block.clone());
    }
    Ok(())
}

/// Set the mirror on a Bottlerocket `KubeadmConfigTemplate`
pub fn set_config_template_mirror_bottlerocket(
    template: &mut Value,
    mirror: Option<&RegistryMirrorConfiguration>,
) -> Result<()> {
    let Some(mirror) = mirror else {
        return Ok(());
    };
    object_at(template, &["spec", "template", "spec", "joinConfiguration"])?
        .insert("registryMirror".to_string(), bottlerocket_registry_mirror(mirror));
    Ok(())
}

/// Add the containerd mirror files to an Ubuntu `KubeadmControlPlane`
pub fn set_control_plane_mirror_ubuntu(
    control_plane: &mut Value,
    mirror: Option<&RegistryMirrorConfiguration>,
) -> Result<()> {
    append_files(control_plane, &["spec", "kubeadmConfigSpec"], mirror)
}

/// Add the containerd mirror files to an Ubuntu `KubeadmConfigTemplate`
pub fn set_config_template_mirror_ubuntu(
    template: &mut Value,
    mirror: Option<&RegistryMirrorConfiguration>,
) -> Result<()> {
    append_files(template, &["spec", "template", "spec"], mirror)
}

/// Node operating system family, which decides how the mirror is configured
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsFamily {
    /// Mirror set through kubeadm `registryMirror`
    Bottlerocket,
    /// Mirror set through containerd bootstrap files
    Ubuntu,
}

/// Configure the mirror on a kubeadm object according to its kind.
///
/// Returns false for kinds that carry no node bootstrap configuration.
pub fn set_registry_mirror(
    object: &mut Value,
    os: OsFamily,
    mirror: Option<&RegistryMirrorConfiguration>,
) -> Result<bool> {
    let kind = object.get("kind").and_then(Value::as_str).unwrap_or_default();
    match (kind, os) {
        ("KubeadmControlPlane", OsFamily::Bottlerocket) => {
            set_control_plane_mirror_bottlerocket(object, mirror)?
        }
        ("KubeadmControlPlane", OsFamily::Ubuntu) => set_control_plane_mirror_ubuntu(object, mirror)?,
        ("KubeadmConfigTemplate", OsFamily::Bottlerocket) => {
            set_config_template_mirror_bottlerocket(object, mirror)?
        }
        ("KubeadmConfigTemplate", OsFamily::Ubuntu) => {
            set_config_template_mirror_ubuntu(object, mirror)?
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn append_files(
    object: &mut Value,
    config_path: &[&str],
    mirror: Option<&RegistryMirrorConfiguration>,
) -> Result<()> {
    let files = ubuntu_bootstrap_files(mirror);
    if files.is_empty() {
        return Ok(());
    }
    let config = object_at(object, config_path)?;
    match config
        .entry("files")
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(existing) => {
            existing.extend(files);
            Ok(())
        }
        _ => Err(Error::configuration(format!(
            "{}.files is not a list",
            config_path.join(".")
        ))),
    }
}

/// Walk `path` from `value`, creating missing objects along the way
fn object_at<'a>(value: &'a mut Value, path: &[&str]) -> Result<&'a mut Map<String, Value>> {
    let mut current = value;
    for (depth, segment) in path.iter().enumerate() {
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ if depth == 0 => return Err(Error::configuration("document is not an object")),
            _ => {
                return Err(Error::configuration(format!(
                    "{} is not an object",
                    path[..depth].join(".")
                )))
            }
        };
    }
    match current {
        Value::Object(map) => Ok(map),
        _ => Err(Error::configuration(format!("{} is not an object", path.join(".")))),
    }
}
