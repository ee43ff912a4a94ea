//! Version change reports

use serde::Serialize;

use crate::spec::ClusterSpec;
use crate::COMPONENTS_NAME;

/// Version transitions performed by an upgrade
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDiff {
    /// One entry per upgraded component
    pub component_reports: Vec<ComponentChangeDiff>,
}

/// Version transition of one component
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentChangeDiff {
    /// Component name
    pub component_name: String,
    /// Version before the upgrade
    pub old_version: String,
    /// Version after the upgrade
    pub new_version: String,
}

impl ChangeDiff {
    /// A diff with a single component report
    pub fn single(report: ComponentChangeDiff) -> Self {
        Self {
            component_reports: vec![report],
        }
    }
}

/// Compare the management component versions of two specs.
///
/// Returns `None` when the version strings are equal.
pub fn components_change_diff(current: &ClusterSpec, new: &ClusterSpec) -> Option<ChangeDiff> {
    let old_version = current.components_version();
    let new_version = new.components_version();
    if old_version == new_version {
        return None;
    }
    Some(ChangeDiff::single(ComponentChangeDiff {
        component_name: COMPONENTS_NAME.to_string(),
        old_version: old_version.to_string(),
        new_version: new_version.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Cluster, ComponentsBundle, ManifestReference, Ref, VersionsBundle};

    fn spec(version: &str) -> ClusterSpec {
        ClusterSpec {
            cluster: Cluster {
                name: "mgmt".to_string(),
                management_cluster_name: None,
                datacenter_ref: Ref {
                    kind: "DockerDatacenterConfig".to_string(),
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

    #[test]
    fn equal_versions_have_no_diff() {
        assert_eq!(components_change_diff(&spec("v1"), &spec("v1")), None);
    }

    #[test]
    fn different_versions_yield_one_report() {
        let diff = components_change_diff(&spec("v1"), &spec("v2")).unwrap();
        assert_eq!(
            diff.component_reports,
            [ComponentChangeDiff {
                component_name: "Keel".to_string(),
                old_version: "v1".to_string(),
                new_version: "v2".to_string(),
            }]
        );
    }

    #[test]
    fn downgrade_is_still_a_change() {
        let diff = components_change_diff(&spec("v2"), &spec("v1")).unwrap();
        assert_eq!(diff.component_reports[0].old_version, "v2");
    }

    #[test]
    fn serializes_camel_case() {
        let diff = components_change_diff(&spec("v1"), &spec("v2")).unwrap();
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json["componentReports"][0]["newVersion"], "v2");
    }
}
