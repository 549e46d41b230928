//! On-disk package layout engine for airgap.
//!
//! This crate provides the storage layer: the `checksums.txt` ledger
//! ([`ChecksumLedger`]), chunked split/reassembly for size-bounded transport,
//! deterministic tar packing of component trees, OCI image-layout types,
//! ed25519 signing behind narrow [`PackageSigner`]/[`PackageVerifier`]
//! capabilities, and [`PackageLayout`], the loaded and verified view of a
//! built package.

pub mod archive;
pub mod checksum;
pub mod layout;
pub mod oci;
pub mod signing;
pub mod split;

pub use archive::{
    create_package_archive, extract_package_archive, pack_dir, unpack_tar, write_tar_file,
};
pub use checksum::{
    list_files, sha256_bytes, sha256_file, ChecksumLedger, IntegrityReport, LedgerEntry,
};
pub use layout::{package_file_name, ComponentSection, LoadOptions, PackageLayout};
pub use signing::{
    sign_definition, verify_definition, PackageSigner, PackageVerifier, PublicKey, SigningKeyPair,
};
pub use split::{part_path, reassemble, split_base, split_file, SplitFileMetadata, MAX_SPLIT_PARTS};

use airgap_schema::{FilterError, SchemaError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

pub use airgap_schema::PACKAGE_DEFINITION;
pub const CHECKSUMS: &str = "checksums.txt";
pub const SIGNATURE: &str = "zarf.yaml.sig";
pub const COMPONENTS_DIR: &str = "components";
pub const IMAGES_DIR: &str = "images";
pub const SBOM_TAR: &str = "sboms.tar";

/// Files at the layout root that the checksum ledger never lists.
pub const LEDGER_EXEMPT: [&str; 3] = [PACKAGE_DEFINITION, CHECKSUMS, SIGNATURE];

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("file '{0}' is listed in checksums.txt but missing")]
    MissingFile(String),
    #[error("files present but not listed in checksums.txt: {}", .0.join(", "))]
    UnexpectedFiles(Vec<String>),
    #[error("malformed checksums.txt line {line}: '{content}'")]
    MalformedLine { line: usize, content: String },
    #[error("aggregate checksum mismatch: expected {expected}, got {actual}")]
    AggregateMismatch { expected: String, actual: String },
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("package is signed but no public key was provided")]
    SignedButNoKey,
    #[error("a public key was provided but the package is not signed")]
    KeyButNotSigned,
    #[error("package signature does not verify: {0}")]
    Mismatch(String),
    #[error("invalid key file {path}: {reason}")]
    InvalidKey { path: PathBuf, reason: String },
    #[error("signing failed: {0}")]
    SignFailed(String),
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("splitting would need {parts} parts, more than the maximum of {max}")]
    TooManyParts { parts: u64, max: u64 },
    #[error("split header '{0}' not found")]
    MissingHeader(PathBuf),
    #[error("invalid split header '{path}': {reason}")]
    InvalidHeader { path: PathBuf, reason: String },
    #[error("split count mismatch: header records {expected} parts, found {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("reassembled file does not match split header: {0}")]
    Verification(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("signature check failed: {0}")]
    Signature(#[from] SignatureError),
    #[error("split transport error: {0}")]
    Split(#[from] SplitError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),
    #[error("component '{0}' not found in package")]
    ComponentNotFound(String),
    #[error("invalid component name '{0}'")]
    InvalidComponentName(String),
    #[error("section '{section}' not found in component '{component}'")]
    SectionNotFound { component: String, section: String },
    #[error("no SBOM available in package")]
    NoSbom,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Map an I/O error to [`StoreError::Io`] naming the failing path.
pub(crate) fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), StoreError> {
    let f = std::fs::File::open(dir).map_err(io_at(dir))?;
    f.sync_all().map_err(io_at(dir))
}

/// Write `data` to `dest` through a temp file in the same directory and rename it into place.
pub fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_at(dir))?;
    tmp.write_all(data).map_err(io_at(dest))?;
    tmp.as_file().sync_all().map_err(io_at(dest))?;
    tmp.persist(dest).map_err(|e| StoreError::Io {
        path: dest.to_path_buf(),
        source: e.error,
    })?;
    fsync_dir(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_path() {
        let err = std::fs::read("/definitely/not/here").map_err(io_at(Path::new("/definitely/not/here")));
        let msg = err.unwrap_err().to_string();
        assert!(msg.contains("/definitely/not/here"));
    }

    #[test]
    fn signature_errors_are_distinguishable() {
        let signed = SignatureError::SignedButNoKey.to_string();
        let unsigned = SignatureError::KeyButNotSigned.to_string();
        let mismatch = SignatureError::Mismatch("bad".to_owned()).to_string();
        assert_ne!(signed, unsigned);
        assert!(signed.contains("no public key"));
        assert!(unsigned.contains("not signed"));
        assert!(mismatch.contains("bad"));
    }

    #[test]
    fn unexpected_files_lists_every_path() {
        let e = IntegrityError::UnexpectedFiles(vec!["a".to_owned(), "b/c".to_owned()]);
        assert!(e.to_string().contains("a, b/c"));
    }

    #[test]
    fn write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
    }
}
