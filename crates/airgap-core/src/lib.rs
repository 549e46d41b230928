//! Package composition and build orchestration for airgap.
//!
//! This crate resolves component imports into a flat [`ResolvedPackage`]
//! ([`Composer`]), materializes resolved packages into verified on-disk
//! layouts ([`PackageBuilder`]), and ties the store and remote crates
//! together into the `create`/`publish`/`pull`/`load_from_source` flows used
//! by the CLI. It also provides cooperative cancellation and a cache lock.
//!
//! [`ResolvedPackage`]: airgap_schema::ResolvedPackage

pub mod actions;
pub mod builder;
pub mod compose;
pub mod concurrency;
pub mod packager;
mod stage;

pub use actions::ActionRunner;
pub use builder::{
    BuildOptions, BuildResult, ChartFetcher, ManifestRenderer, PackageBuilder, RepoCollector,
    SbomGenerator,
};
pub use compose::{Composer, FetchedSkeleton, OciSkeletonFetcher, SkeletonFetcher};
pub use concurrency::{install_signal_handler, CacheLock, CancelToken};
pub use packager::{
    build_layout, create, load_from_registry, load_from_source, publish, publish_skeleton, pull,
    CreateOptions, CreateResult, SourceOptions,
};

use airgap_remote::RemoteError;
use airgap_schema::{SchemaError, ValidationError};
use airgap_store::StoreError;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a component import could not be resolved.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("component '{component}' has an invalid import: {}", .reasons.join("; "))]
    Invalid {
        component: String,
        reasons: Vec<String>,
    },
    #[error("detected circular import chain: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },
    #[error("component '{name}' not found in {location}")]
    NotFound { name: String, location: String },
    #[error("multiple components named '{name}' found in {location} satisfying the build target")]
    Ambiguous { name: String, location: String },
    #[error("component '{component}' has conflicting localOS: '{base}' vs '{overlay}'")]
    ConflictingLocalOs {
        component: String,
        base: String,
        overlay: String,
    },
    #[error("malformed import chain at '{component}': {reason}")]
    Malformed { component: String, reason: String },
    #[error("cannot read imported definition {location}: {source}")]
    Definition {
        location: String,
        source: SchemaError,
    },
    #[error("cannot fetch skeleton {url}: {source}")]
    Fetch { url: String, source: RemoteError },
    #[error("{}", ImportErrors(.0))]
    Multiple(Vec<ImportError>),
}

struct ImportErrors<'a>(&'a [ImportError]);

impl fmt::Display for ImportErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} import errors:", self.0.len())?;
        for e in self.0 {
            write!(f, "\n  - {e}")?;
        }
        Ok(())
    }
}

impl ImportError {
    /// Collapse a list of errors: one stays as-is, several become [`ImportError::Multiple`].
    pub fn aggregate(mut errors: Vec<ImportError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("import error: {0}")]
    Import(#[from] ImportError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("action '{cmd}' failed: {reason}")]
    Action { cmd: String, reason: String },
    #[error("component '{component}': {reason}")]
    Staging { component: String, reason: String },
    #[error("unsupported package source '{0}'")]
    UnsupportedSource(String),
    #[error("lock error: {0}")]
    Lock(String),
    #[error("operation cancelled")]
    Cancelled,
}

pub(crate) fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> CoreError + '_ {
    move |source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_keeps_single_error_unwrapped() {
        assert!(ImportError::aggregate(Vec::new()).is_none());
        let one = ImportError::aggregate(vec![ImportError::Cycle {
            chain: vec!["a".to_owned(), "a".to_owned()],
        }]);
        assert!(matches!(one, Some(ImportError::Cycle { .. })));
    }

    #[test]
    fn multiple_lists_every_error() {
        let e = ImportError::aggregate(vec![
            ImportError::NotFound {
                name: "web".to_owned(),
                location: "../web".to_owned(),
            },
            ImportError::Ambiguous {
                name: "db".to_owned(),
                location: "../db".to_owned(),
            },
        ])
        .unwrap();
        let text = e.to_string();
        assert!(text.starts_with("2 import errors:"));
        assert!(text.contains("'web' not found in ../web"));
        assert!(text.contains("multiple components named 'db'"));
    }
}
