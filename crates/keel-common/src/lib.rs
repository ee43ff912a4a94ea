//! Common building blocks for Keel: errors, YAML decoding, kind-dispatched
//! manifest parsing, feature activation and kube-rs helpers.

#![deny(missing_docs)]

pub mod error;
pub mod features;
pub mod kube_utils;
pub mod manifest;
pub mod yaml;

pub use error::Error;
pub use features::{EnvFeatures, FeatureChecker, StaticFeatures};
pub use manifest::{BuildFromParsed, KindRegistry, ManifestParser, ObjectKey, ParsedObjects};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply issued by Keel
pub const FIELD_MANAGER: &str = "keel";
