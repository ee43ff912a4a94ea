//! Kind registry
//!
//! Binds the `kind` discriminator of a manifest document to a decoder that
//! turns the whole document into a typed value, with one optional fallback
//! for kinds nobody registered.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Error, Result};

/// Decodes a full manifest document into an object of type `O`
pub type Decoder<O> = Box<dyn Fn(Value) -> serde_json::Result<O> + Send + Sync>;

/// Mapping from kind names to decoders for a family of objects `O`.
///
/// `O` is usually an enum with one variant per typed kind and one opaque
/// variant filled by the fallback.
pub struct KindRegistry<O> {
    kinds: HashMap<String, Decoder<O>>,
    fallback: Option<Decoder<O>>,
}

impl<O> KindRegistry<O> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
            fallback: None,
        }
    }

    /// Bind `kind` to `decoder`.
    ///
    /// Fails with [`Error::DuplicateKind`] if `kind` is already bound.
    pub fn register<F>(&mut self, kind: impl Into<String>, decoder: F) -> Result<()>
    where
        F: Fn(Value) -> serde_json::Result<O> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.kinds.contains_key(&kind) {
            return Err(Error::DuplicateKind { kind });
        }
        self.kinds.insert(kind, Box::new(decoder));
        Ok(())
    }

    /// Bind `kind` to serde deserialization into `T`, wrapped into `O`.
    pub fn register_typed<T, W>(&mut self, kind: impl Into<String>, wrap: W) -> Result<()>
    where
        T: DeserializeOwned + 'static,
        W: Fn(T) -> O + Send + Sync + 'static,
        O: 'static,
    {
        self.register(kind, move |value| serde_json::from_value::<T>(value).map(&wrap))
    }

    /// Set the decoder used for every kind without an exact binding.
    ///
    /// Fails with [`Error::DuplicateFallback`] when called twice.
    pub fn register_fallback<F>(&mut self, decoder: F) -> Result<()>
    where
        F: Fn(Value) -> serde_json::Result<O> + Send + Sync + 'static,
    {
        if self.fallback.is_some() {
            return Err(Error::DuplicateFallback);
        }
        self.fallback = Some(Box::new(decoder));
        Ok(())
    }

    /// Look up the decoder for `kind`: exact match first, then the fallback.
    pub fn resolve(&self, kind: &str) -> Result<&Decoder<O>> {
        self.kinds
            .get(kind)
            .or(self.fallback.as_ref())
            .ok_or_else(|| Error::UnresolvableKind {
                kind: kind.to_string(),
            })
    }

    /// Resolve the decoder for `kind` and run it on `document`
    pub fn decode(&self, kind: &str, document: Value) -> Result<O> {
        let decoder = self.resolve(kind)?;
        decoder(document).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
    }

    /// Whether `kind` has an exact binding
    pub fn is_registered(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Whether a fallback decoder is set
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

impl<O> Default for KindRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> fmt::Debug for KindRegistry<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("KindRegistry")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Widget {
        kind: String,
        size: u32,
    }

    #[derive(Debug, PartialEq)]
    enum Obj {
        Widget(Widget),
        Other(Value),
    }

    fn registry() -> KindRegistry<Obj> {
        let mut registry = KindRegistry::new();
        registry
            .register_typed::<Widget, _>("Widget", Obj::Widget)
            .unwrap();
        registry
    }

    #[test]
    fn resolves_exact_kind() {
        let obj = registry()
            .decode("Widget", json!({"kind": "Widget", "size": 3}))
            .unwrap();
        assert_eq!(
            obj,
            Obj::Widget(Widget {
                kind: "Widget".to_string(),
                size: 3
            })
        );
    }

    #[test]
    fn duplicate_kind_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register_typed::<Widget, _>("Widget", Obj::Widget)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKind { kind } if kind == "Widget"));
    }

    #[test]
    fn duplicate_fallback_is_rejected() {
        let mut registry = registry();
        registry.register_fallback(|v| Ok(Obj::Other(v))).unwrap();
        let err = registry
            .register_fallback(|v| Ok(Obj::Other(v)))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateFallback));
    }

    #[test]
    fn unknown_kind_without_fallback_fails() {
        let err = registry().resolve("Gadget").err().unwrap();
        assert!(matches!(err, Error::UnresolvableKind { kind } if kind == "Gadget"));
    }

    #[test]
    fn unknown_kind_uses_fallback() {
        let mut registry = registry();
        registry.register_fallback(|v| Ok(Obj::Other(v))).unwrap();
        let doc = json!({"kind": "Gadget"});
        assert_eq!(
            registry.decode("Gadget", doc.clone()).unwrap(),
            Obj::Other(doc)
        );
        assert!(!registry.is_registered("Gadget"));
        assert!(registry.has_fallback());
    }

    #[test]
    fn exact_kind_wins_over_fallback() {
        let mut registry = registry();
        registry.register_fallback(|v| Ok(Obj::Other(v))).unwrap();
        let obj = registry
            .decode("Widget", json!({"kind": "Widget", "size": 1}))
            .unwrap();
        assert!(matches!(obj, Obj::Widget(_)));
    }

    #[test]
    fn decode_failure_names_kind() {
        let err = registry()
            .decode("Widget", json!({"kind": "Widget", "size": "big"}))
            .unwrap_err();
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Widget")),
            other => panic!("expected serialization error, got {other:?}"),
        }
    }
}
