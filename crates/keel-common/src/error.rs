//! Error types for Keel
//!
//! Every failure of an install or upgrade is one of: a load error (manifest
//! unreachable), a parse error (malformed document, unresolvable kind,
//! structural violation), an apply error, or a readiness timeout/cancellation.
//! Phases wrap the underlying error with `Error::context` so the final message
//! reads like a path through the reconciler.

use thiserror::Error;

/// Main error type for Keel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A manifest reference could not be resolved to content
    #[error("failed to load manifest {reference}: {message}")]
    Load {
        /// The reference that was being loaded
        reference: String,
        /// Description of what failed
        message: String,
    },

    /// A manifest document is malformed
    #[error("invalid manifest: {message}")]
    Manifest {
        /// Description of what's wrong
        message: String,
        /// Zero-based index of the offending document, when known
        document: Option<usize>,
    },

    /// A kind was registered twice
    #[error("kind {kind} is already registered")]
    DuplicateKind {
        /// The kind that was registered twice
        kind: String,
    },

    /// The fallback decoder was registered twice
    #[error("a fallback mapping is already registered")]
    DuplicateFallback,

    /// No decoder registered for a kind and no fallback available
    #[error("no mapping registered for kind {kind}")]
    UnresolvableKind {
        /// The kind that could not be resolved
        kind: String,
    },

    /// Two documents in one manifest share the same identity
    #[error("duplicate object {key} in manifest")]
    DuplicateObject {
        /// Display form of the repeated identity
        key: String,
    },

    /// Parsed objects do not form a valid component set
    #[error("invalid component set: {message}")]
    Assembly {
        /// Description of the structural violation
        message: String,
    },

    /// An object could not be configured for the target cluster
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being (de)serialized, if known
        kind: Option<String>,
    },

    /// A bounded wait expired before its condition held
    #[error("timed out: {message}")]
    Timeout {
        /// What was being waited for
        message: String,
    },

    /// The caller cancelled the operation
    #[error("cancelled while {operation}")]
    Cancelled {
        /// The operation that was interrupted
        operation: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "create_client", "discovery")
        context: String,
    },

    /// An error annotated with the phase it happened in
    #[error("{context}: {source}")]
    Context {
        /// Static, human-readable description of the phase
        context: String,
        /// The wrapped error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a load error for a manifest reference
    pub fn load(reference: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Load {
            reference: reference.into(),
            message: msg.into(),
        }
    }

    /// Create a manifest error without a document position
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: msg.into(),
            document: None,
        }
    }

    /// Create a manifest error pointing at a specific document
    pub fn manifest_at(document: usize, msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: format!("document {}: {}", document, msg.into()),
            document: Some(document),
        }
    }

    /// Create an assembly error
    pub fn assembly(msg: impl Into<String>) -> Self {
        Self::Assembly {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout {
            message: msg.into(),
        }
    }

    /// Create a cancellation error for the interrupted operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Wrap this error with a description of the phase it happened in
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the operation was stopped by the caller
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled { .. })
    }

    /// Check if retrying the whole operation may succeed
    ///
    /// Manifest, registry and assembly errors need a different bundle.
    /// Cluster-side failures and timeouts may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Context { source, .. } => source.is_retryable(),
            Error::Kube { source } => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            Error::Load { .. } => true,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
            Error::Manifest { .. }
            | Error::DuplicateKind { .. }
            | Error::DuplicateFallback
            | Error::UnresolvableKind { .. }
            | Error::DuplicateObject { .. }
            | Error::Assembly { .. }
            | Error::Configuration { .. }
            | Error::Serialization { .. }
            | Error::Cancelled { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefixes_message() {
        let err = Error::timeout("deployment keel-controller-manager not available")
            .context("waiting for keel-controller-manager");
        assert_eq!(
            err.to_string(),
            "waiting for keel-controller-manager: timed out: deployment keel-controller-manager not available"
        );
    }

    #[test]
    fn nested_context_reads_outermost_first() {
        let err = Error::UnresolvableKind {
            kind: "Widget".to_string(),
        }
        .context("parsing management components")
        .context("upgrading management components from version v1 to version v2");
        let msg = err.to_string();
        assert!(msg.starts_with("upgrading management components"));
        assert!(msg.contains("parsing management components"));
        assert!(msg.ends_with("no mapping registered for kind Widget"));
    }

    #[test]
    fn root_skips_context_wrappers() {
        let err = Error::cancelled("waiting for readiness")
            .context("a")
            .context("b");
        assert!(err.is_cancelled());
        assert!(matches!(err.root(), Error::Cancelled { .. }));
    }

    #[test]
    fn manifest_at_records_document_index() {
        let err = Error::manifest_at(3, "missing kind");
        match &err {
            Error::Manifest { document, .. } => assert_eq!(*document, Some(3)),
            _ => panic!("Expected Manifest variant"),
        }
        assert!(err.to_string().contains("document 3"));
    }

    #[test]
    fn retryability_follows_root_cause() {
        assert!(Error::timeout("slow").context("waiting").is_retryable());
        assert!(Error::load("bundle/x.yaml", "connection reset").is_retryable());
        assert!(!Error::assembly("no Deployment").context("parsing").is_retryable());
        assert!(!Error::DuplicateFallback.is_retryable());
        assert!(!Error::cancelled("applying").is_retryable());
    }

    #[test]
    fn retryability_sees_through_nested_context() {
        let timed_out = Error::timeout("deployment keel-system/mgr")
            .context("waiting for mgr to be available")
            .context("upgrading management components from version v1 to version v2");
        assert!(timed_out.is_retryable());

        let duplicate = Error::DuplicateObject {
            key: "apps/Deployment keel-system/mgr".to_string(),
        }
        .context("parsing management components")
        .context("upgrading management components from version v1 to version v2");
        assert!(!duplicate.is_retryable());
    }

    #[test]
    fn serialization_for_kind_keeps_kind() {
        let err = Error::serialization_for_kind("Deployment", "missing field `spec`");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Deployment")),
            _ => panic!("Expected Serialization variant"),
        }
    }
}
