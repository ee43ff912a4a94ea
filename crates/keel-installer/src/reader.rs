//! Manifest loading from bundle references
//!
//! References are local paths, `file://` URIs or `http(s)://` URLs. Relative
//! paths resolve against the bundle directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use keel_common::{Error, Result};

use crate::spec::ManifestReference;

/// Timeout for fetching a manifest over HTTP
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Raw manifest content
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    /// Last path segment of the reference
    pub filename: String,
    /// Multi-document YAML
    pub content: String,
}

/// Resolves manifest references to content
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestReader: Send + Sync {
    /// Load the manifest at `reference`
    async fn read(&self, reference: &ManifestReference) -> Result<Manifest>;
}

fn filename_of(uri: &str) -> String {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(uri)
        .to_string()
}

/// Reads manifests from the local filesystem
#[derive(Clone, Debug)]
pub struct FileManifestReader {
    base_dir: PathBuf,
}

impl FileManifestReader {
    /// Resolve relative references against `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, uri: &str) -> PathBuf {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl ManifestReader for FileManifestReader {
    async fn read(&self, reference: &ManifestReference) -> Result<Manifest> {
        let path = self.resolve(&reference.uri);
        debug!(path = %path.display(), "reading manifest");
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::load(&reference.uri, format!("{}: {}", path.display(), e)))?;
        Ok(Manifest {
            filename: filename_of(&reference.uri),
            content,
        })
    }
}

/// Fetches manifests over HTTP(S)
#[derive(Clone, Debug)]
pub struct HttpManifestReader {
    client: reqwest::Client,
}

impl HttpManifestReader {
    /// Create a reader with the default request timeout
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::internal_with_context("http_client", e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ManifestReader for HttpManifestReader {
    async fn read(&self, reference: &ManifestReference) -> Result<Manifest> {
        debug!(url = %reference.uri, "fetching manifest");
        let response = self
            .client
            .get(&reference.uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::load(&reference.uri, e.to_string()))?;
        let content = response
            .text()
            .await
            .map_err(|e| Error::load(&reference.uri, e.to_string()))?;
        Ok(Manifest {
            filename: filename_of(&reference.uri),
            content,
        })
    }
}

/// Dispatches on the reference scheme: `http://` and `https://` go over the
/// network, `file://` and scheme-less references to the filesystem
#[derive(Clone, Debug)]
pub struct BundleManifestReader {
    files: FileManifestReader,
    http: HttpManifestReader,
}

impl BundleManifestReader {
    /// Read local references relative to `bundle_dir`
    pub fn new(bundle_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            files: FileManifestReader::new(bundle_dir),
            http: HttpManifestReader::new()?,
        })
    }
}

#[async_trait]
impl ManifestReader for BundleManifestReader {
    async fn read(&self, reference: &ManifestReference) -> Result<Manifest> {
        match reference.uri.split_once("://") {
            Some(("http" | "https", _)) => self.http.read(reference).await,
            Some(("file", _)) | None => self.files.read(reference).await,
            Some((scheme, _)) => Err(Error::load(
                &reference.uri,
                format!("unsupported scheme {}", scheme),
            )),
        }
    }
}
