//! Multi-document manifest parser
//!
//! Splits a manifest into documents, reads each document's `kind` before any
//! typed decoding, dispatches through a [`KindRegistry`] and hands the ordered
//! result to an assembler implementing [`BuildFromParsed`].

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;
use tracing::{debug, trace};

use super::registry::KindRegistry;
use crate::kube_utils::parse_api_version;
use crate::yaml::{self, Document};
use crate::{Error, Result};

/// Identity of an object inside one manifest
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// API group, empty for the core group
    pub group: String,
    /// Object kind
    pub kind: String,
    /// Namespace, empty for cluster-scoped objects
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}/{}", self.group, self.kind)?;
        }
        if self.namespace.is_empty() {
            write!(f, " {}", self.name)
        } else {
            write!(f, " {}/{}", self.namespace, self.name)
        }
    }
}

/// Parsed objects in the order they appear in the manifest
#[derive(Debug)]
pub struct ParsedObjects<O> {
    entries: Vec<(ObjectKey, O)>,
    seen: HashSet<ObjectKey>,
}

impl<O> ParsedObjects<O> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Append an object; a repeated identity is a [`Error::DuplicateObject`]
    pub fn insert(&mut self, key: ObjectKey, object: O) -> Result<()> {
        if !self.seen.insert(key.clone()) {
            return Err(Error::DuplicateObject {
                key: key.to_string(),
            });
        }
        self.entries.push((key, object));
        Ok(())
    }

    /// Look up an object by identity
    pub fn get(&self, key: &ObjectKey) -> Option<&O> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no object was parsed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in encounter order
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, &O)> {
        self.entries.iter().map(|(k, o)| (k, o))
    }

    /// Identities in encounter order
    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl<O> Default for ParsedObjects<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> IntoIterator for ParsedObjects<O> {
    type Item = (ObjectKey, O);
    type IntoIter = std::vec::IntoIter<(ObjectKey, O)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Builds a domain-specific view from a fully parsed manifest
pub trait BuildFromParsed<O>: Sized {
    /// Consume the parsed objects; fail on structural violations
    fn build_from_parsed(objects: ParsedObjects<O>) -> Result<Self>;
}

/// Fields read from a document before it is decoded
#[derive(Debug)]
struct DocumentHeader {
    api_version: String,
    kind: String,
    name: String,
    namespace: Option<String>,
}

impl DocumentHeader {
    fn read(document: &Document) -> Result<Self> {
        let value = &document.value;
        if !value.is_object() {
            return Err(Error::manifest_at(document.index, "document is not a mapping"));
        }
        let field = |pointer: &str| value.pointer(pointer).and_then(Value::as_str);

        let kind = field("/kind")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::manifest_at(document.index, "missing kind"))?;
        let name = field("/metadata/name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::manifest_at(document.index, format!("{} missing metadata.name", kind)))?;

        Ok(Self {
            api_version: field("/apiVersion").unwrap_or_default().to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: field("/metadata/namespace").map(str::to_string),
        })
    }

    fn key(&self) -> ObjectKey {
        let (group, _) = parse_api_version(&self.api_version);
        ObjectKey {
            group,
            kind: self.kind.clone(),
            namespace: self.namespace.clone().unwrap_or_default(),
            name: self.name.clone(),
        }
    }
}

/// Parses manifests into objects of type `O` using a kind registry
#[derive(Debug)]
pub struct ManifestParser<O> {
    registry: KindRegistry<O>,
}

impl<O> ManifestParser<O> {
    /// Create a parser dispatching through `registry`
    pub fn new(registry: KindRegistry<O>) -> Self {
        Self { registry }
    }

    /// The registry used for dispatch
    pub fn registry(&self) -> &KindRegistry<O> {
        &self.registry
    }

    /// Parse every document of `raw` in order.
    ///
    /// Fails on malformed YAML, a document without `kind` or
    /// `metadata.name`, a kind with no mapping, a decode error or a repeated
    /// identity. Nothing is returned on failure.
    pub fn parse(&self, raw: &str) -> Result<ParsedObjects<O>> {
        let documents = yaml::parse_documents(raw)
            .map_err(|(index, e)| Error::manifest_at(index, e.to_string()))?;

        let mut objects = ParsedObjects::new();
        for document in documents {
            let header = DocumentHeader::read(&document)?;
            let key = header.key();
            trace!(object = %key, document = document.index, "decoding manifest document");

            let object = self
                .registry
                .decode(&header.kind, document.value)
                .map_err(|e| e.context(format!("decoding document {} ({})", document.index, key)))?;
            objects.insert(key, object)?;
        }

        debug!(objects = objects.len(), "parsed manifest");
        Ok(objects)
    }

    /// Parse `raw` and hand the result to the assembler `A`
    pub fn parse_into<A: BuildFromParsed<O>>(&self, raw: &str) -> Result<A> {
        A::build_from_parsed(self.parse(raw)?)
    }
}
