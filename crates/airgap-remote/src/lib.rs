//! Package distribution for airgap.
//!
//! This crate pushes package layouts to OCI registries as content-addressed
//! blobs under a platform-keyed tag index, pulls them back with component
//! filtering (only the layers the selected components need), fetches
//! packages from HTTP and local sources, and collects container images into
//! a package's OCI image layout.

pub mod config;
pub mod http;
pub mod images;
pub mod memory;
pub mod reference;
pub mod source;
pub mod transfer;

pub use config::RemoteConfig;
pub use http::HttpRegistry;
pub use images::{ImageCollector, RegistryImageCollector};
pub use memory::MemoryRegistry;
pub use reference::PackageReference;
pub use source::{fetch_url, PackageSource};
pub use transfer::{
    annotations_from_metadata, assemble_layers, fetch_definition, pull_package, push_package,
    resolve_root, LayerSelector, PullOptions, PullResult, PushOptions, PushResult,
};

use airgap_schema::OciDigest;
use airgap_store::StoreError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default number of concurrent blob transfers.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Operating system recorded in the platform of package manifests.
pub const PACKAGE_OS: &str = "multi";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("component '{0}' does not exist in the remote package")]
    ComponentNotFound(String),
    #[error("no manifest for architecture '{architecture}' at {reference}")]
    NoPlatform {
        reference: String,
        architecture: String,
    },
    #[error("digest mismatch for {digest}: got {actual}")]
    DigestMismatch { digest: OciDigest, actual: String },
    #[error("invalid package: {0}")]
    InvalidPackage(String),
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub(crate) fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> RemoteError + '_ {
    move |source| RemoteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Manifest bytes together with the media type the registry reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedManifest {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// A registry speaking the OCI distribution API, narrowed to what package
/// transfer needs.
pub trait RegistryBackend: Send + Sync {
    fn has_blob(&self, repo: &str, digest: &OciDigest) -> Result<bool, RemoteError>;

    fn get_blob(&self, repo: &str, digest: &OciDigest) -> Result<Vec<u8>, RemoteError>;

    fn put_blob(&self, repo: &str, digest: &OciDigest, data: &[u8]) -> Result<(), RemoteError>;

    /// Fetch a manifest or index by tag or digest.
    fn get_manifest(&self, repo: &str, reference: &str) -> Result<FetchedManifest, RemoteError>;

    fn put_manifest(
        &self,
        repo: &str,
        reference: &str,
        media_type: &str,
        data: &[u8],
    ) -> Result<(), RemoteError>;

    /// Upload the file at `src` as blob `digest`, returning its size.
    fn push_blob_from(&self, repo: &str, digest: &OciDigest, src: &Path) -> Result<u64, RemoteError> {
        let data = std::fs::read(src).map_err(io_at(src))?;
        self.put_blob(repo, digest, &data)?;
        Ok(data.len() as u64)
    }

    /// Download a blob into `dest`, checking its digest.
    fn fetch_blob_to(&self, repo: &str, digest: &OciDigest, dest: &Path) -> Result<u64, RemoteError> {
        let data = self.get_blob(repo, digest)?;
        verify_digest(digest, &data)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        std::fs::write(dest, &data).map_err(io_at(dest))?;
        Ok(data.len() as u64)
    }
}

pub(crate) fn verify_digest(digest: &OciDigest, data: &[u8]) -> Result<(), RemoteError> {
    let actual = airgap_store::sha256_bytes(data).to_digest();
    if actual == *digest {
        Ok(())
    } else {
        Err(RemoteError::DigestMismatch {
            digest: digest.clone(),
            actual: actual.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_check() {
        let digest = airgap_store::sha256_bytes(b"abc").to_digest();
        verify_digest(&digest, b"abc").unwrap();
        assert!(matches!(
            verify_digest(&digest, b"abd"),
            Err(RemoteError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn component_not_found_names_component() {
        let e = RemoteError::ComponentNotFound("db".to_owned());
        assert!(e.to_string().contains("'db'"));
    }
}
