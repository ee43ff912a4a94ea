//! Feature activation
//!
//! Features are opt-in switches read once from the environment. The checker is
//! passed explicitly to whatever needs it instead of being consulted through
//! process-wide state.

use std::collections::HashSet;

/// Feature that enables the full lifecycle controller in the management
/// components regardless of infrastructure provider
pub const FULL_LIFECYCLE_API: &str = "FULL_LIFECYCLE_API";

/// Answers whether a named feature is active
pub trait FeatureChecker: Send + Sync {
    /// Returns true when `feature` is active
    fn is_active(&self, feature: &str) -> bool;
}

/// Features activated through environment variables set to `true`
#[derive(Clone, Debug, Default)]
pub struct EnvFeatures {
    active: HashSet<String>,
}

impl EnvFeatures {
    /// Snapshot the current process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit `(name, value)` pairs
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let active = vars
            .into_iter()
            .filter(|(_, v)| v.as_ref().trim().eq_ignore_ascii_case("true"))
            .map(|(k, _)| k.into())
            .collect();
        Self { active }
    }
}

impl FeatureChecker for EnvFeatures {
    fn is_active(&self, feature: &str) -> bool {
        self.active.contains(feature)
    }
}

/// A fixed set of active features
#[derive(Clone, Debug, Default)]
pub struct StaticFeatures(HashSet<String>);

impl StaticFeatures {
    /// Activate exactly the given features
    pub fn new<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(features.into_iter().map(Into::into).collect())
    }

    /// No feature active
    pub fn none() -> Self {
        Self::default()
    }
}

impl FeatureChecker for StaticFeatures {
    fn is_active(&self, feature: &str) -> bool {
        self.0.contains(feature)
    }
}
