//! Management component object set
//!
//! A component manifest holds exactly one Deployment (the controller manager
//! whose readiness gates an install) and any number of supporting objects
//! that are applied untouched.

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::DynamicObject;
use serde_json::Value;

use keel_common::kube_utils::{kind_priority, WORKLOAD_PRIORITY};
use keel_common::{BuildFromParsed, Error, KindRegistry, ManifestParser, ParsedObjects, Result};

/// Kind of the primary object
pub const PRIMARY_KIND: &str = "Deployment";

/// One object of a component manifest
#[derive(Clone, Debug)]
pub enum ComponentObject {
    /// The typed primary workload
    Deployment(Box<Deployment>),
    /// Anything else, preserved as-is
    Opaque(Box<DynamicObject>),
}

impl ComponentObject {
    fn to_value(&self) -> Result<Value> {
        match self {
            ComponentObject::Deployment(d) => serde_json::to_value(d.as_ref()),
            ComponentObject::Opaque(o) => serde_json::to_value(o.as_ref()),
        }
        .map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Registry for component manifests: `Deployment` is typed, every other kind
/// decodes into a [`DynamicObject`]
pub fn component_registry() -> Result<KindRegistry<ComponentObject>> {
    let mut registry = KindRegistry::new();
    registry.register_typed::<Deployment, _>(PRIMARY_KIND, |d| {
        ComponentObject::Deployment(Box::new(d))
    })?;
    registry.register_fallback(|value| {
        serde_json::from_value::<DynamicObject>(value).map(|o| ComponentObject::Opaque(Box::new(o)))
    })?;
    Ok(registry)
}

/// Parser for component manifests
pub fn component_parser() -> Result<ManifestParser<ComponentObject>> {
    Ok(ManifestParser::new(component_registry()?))
}

/// Order in which configured components are sent to the cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplyOrder {
    /// Primary Deployment, then every auxiliary object in manifest order
    #[default]
    PrimaryFirst,
    /// Auxiliary objects a workload depends on (namespaces, CRDs, RBAC,
    /// config, services), then the primary, then the remaining objects.
    /// Manifest order is kept within each group.
    PrerequisitesFirst,
}

/// A parsed component manifest before cluster-specific configuration
#[derive(Clone, Debug)]
pub struct ComponentObjectSet {
    primary: Deployment,
    auxiliary: Vec<DynamicObject>,
}

impl ComponentObjectSet {
    /// The primary Deployment
    pub fn primary(&self) -> &Deployment {
        &self.primary
    }

    /// Auxiliary objects in manifest order
    pub fn auxiliary(&self) -> &[DynamicObject] {
        &self.auxiliary
    }

    /// Split into primary and auxiliary objects
    pub fn into_parts(self) -> (Deployment, Vec<DynamicObject>) {
        (self.primary, self.auxiliary)
    }
}

impl BuildFromParsed<ComponentObject> for ComponentObjectSet {
    fn build_from_parsed(objects: ParsedObjects<ComponentObject>) -> Result<Self> {
        let mut primary: Option<Deployment> = None;
        let mut auxiliary = Vec::new();

        for (key, object) in objects {
            match object {
                ComponentObject::Deployment(d) => {
                    if primary.is_some() {
                        return Err(Error::assembly(format!(
                            "duplicate primary {}: manifest must hold exactly one {}",
                            key, PRIMARY_KIND
                        )));
                    }
                    primary = Some(*d);
                }
                ComponentObject::Opaque(o) => auxiliary.push(*o),
            }
        }

        let primary = primary.ok_or_else(|| {
            Error::assembly(format!("missing primary: manifest has no {}", PRIMARY_KIND))
        })?;
        Ok(Self { primary, auxiliary })
    }
}

/// Component objects configured for one cluster, ready to apply.
///
/// Only [`crate::Configurator`] produces this type, so a parsed set is
/// configured at most once.
#[derive(Clone, Debug)]
pub struct ConfiguredComponents {
    primary: Deployment,
    auxiliary: Vec<DynamicObject>,
}

impl ConfiguredComponents {
    pub(crate) fn new(primary: Deployment, auxiliary: Vec<DynamicObject>) -> Self {
        Self { primary, auxiliary }
    }

    /// The configured primary Deployment
    pub fn primary(&self) -> &Deployment {
        &self.primary
    }

    /// Auxiliary objects in manifest order
    pub fn auxiliary(&self) -> &[DynamicObject] {
        &self.auxiliary
    }

    /// Name of the primary Deployment
    pub fn primary_name(&self) -> &str {
        self.primary.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace of the primary Deployment, if the manifest sets one
    pub fn primary_namespace(&self) -> Option<&str> {
        self.primary.metadata.namespace.as_deref()
    }

    /// Every object as JSON, in apply order
    pub fn to_manifest(&self, order: ApplyOrder) -> Result<Vec<Value>> {
        let primary = ComponentObject::Deployment(Box::new(self.primary.clone()));
        let auxiliary: Vec<ComponentObject> = self
            .auxiliary
            .iter()
            .map(|o| ComponentObject::Opaque(Box::new(o.clone())))
            .collect();

        let ordered: Vec<&ComponentObject> = match order {
            ApplyOrder::PrimaryFirst => std::iter::once(&primary).chain(&auxiliary).collect(),
            ApplyOrder::PrerequisitesFirst => {
                let (before, after): (Vec<_>, Vec<_>) =
                    auxiliary.iter().partition(|o| is_prerequisite(o));
                before
                    .into_iter()
                    .chain(std::iter::once(&primary))
                    .chain(after)
                    .collect()
            }
        };

        ordered.into_iter().map(ComponentObject::to_value).collect()
    }
}

fn is_prerequisite(object: &ComponentObject) -> bool {
    match object {
        ComponentObject::Deployment(_) => false,
        ComponentObject::Opaque(o) => o
            .types
            .as_ref()
            .is_some_and(|t| kind_priority(&t.kind) < WORKLOAD_PRIORITY),
    }
}
