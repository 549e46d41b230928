//! End-to-end flows built from the composer, the builder, and the transports.

use crate::builder::{BuildOptions, BuildResult, PackageBuilder};
use crate::compose::{Composer, OciSkeletonFetcher, SkeletonFetcher};
use crate::concurrency::CacheLock;
use crate::{io_at, CoreError};
use airgap_remote::{
    fetch_url, pull_package, push_package, HttpRegistry, LayerSelector, PackageReference,
    PackageSource, PullOptions, PushOptions, PushResult, RegistryBackend, RemoteConfig,
};
use airgap_schema::{migrate_deprecated, parse_package_file, Sha256Hex, PACKAGE_DEFINITION};
use airgap_store::{LoadOptions, PackageLayout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const CACHE_LOCK: &str = ".lock";

#[derive(Clone, Default)]
pub struct CreateOptions {
    pub build: BuildOptions,
    /// Directory the package archive is written to.
    pub output_dir: PathBuf,
    /// Split the archive into parts of this many MB (10^6 bytes); 0 disables splitting.
    pub max_package_size_mb: u64,
    /// Skeleton cache for URL imports. URL imports fail without one.
    pub cache_dir: Option<PathBuf>,
    pub remote: RemoteConfig,
    /// Overrides the registry-backed fetcher built from `cache_dir` and `remote`.
    pub fetcher: Option<Arc<dyn SkeletonFetcher>>,
}

#[derive(Debug)]
pub struct CreateResult {
    /// The archive, or the `.part000` header when it was split.
    pub archive: PathBuf,
    pub aggregate_checksum: Sha256Hex,
    pub components_packed: Vec<String>,
    pub images: Vec<String>,
}

/// Parse, compose, and build the package defined in `definition_dir` into a
/// layout at `dest`.
pub fn build_layout(
    definition_dir: &Path,
    dest: &Path,
    opts: &CreateOptions,
) -> Result<BuildResult, CoreError> {
    let mut pkg = parse_package_file(definition_dir.join(PACKAGE_DEFINITION))?;
    for warning in migrate_deprecated(&mut pkg) {
        warn!("{warning}");
    }

    let mut composer = Composer::new(&opts.build.architecture, &opts.build.flavor);
    let fetcher = match (&opts.fetcher, &opts.cache_dir) {
        (Some(fetcher), _) => Some(Arc::clone(fetcher)),
        (None, Some(cache)) => Some(
            Arc::new(OciSkeletonFetcher::http(opts.remote.clone(), cache)) as Arc<dyn SkeletonFetcher>
        ),
        (None, None) => None,
    };
    if let Some(fetcher) = fetcher {
        composer = composer.with_fetcher(fetcher);
    }

    let resolved = {
        let _lock = opts
            .cache_dir
            .as_ref()
            .map(|cache| lock_cache(&cache.join(CACHE_LOCK)))
            .transpose()?;
        composer.resolve(pkg, definition_dir)?
    };
    PackageBuilder::new(opts.build.clone()).build(&resolved, definition_dir, dest)
}

fn lock_cache(lock_path: &Path) -> Result<CacheLock, CoreError> {
    if let Some(lock) = CacheLock::try_acquire(lock_path)? {
        return Ok(lock);
    }
    info!("waiting for cache lock {}", lock_path.display());
    CacheLock::acquire(lock_path)
}

/// Build the package defined in `definition_dir` and write its archive to
/// `opts.output_dir`.
pub fn create(definition_dir: &Path, opts: &CreateOptions) -> Result<CreateResult, CoreError> {
    let work = tempfile::Builder::new()
        .prefix("airgap-create-")
        .tempdir()
        .map_err(io_at(&std::env::temp_dir()))?;
    let layout_dir = work.path().join("layout");
    let build = build_layout(definition_dir, &layout_dir, opts)?;

    let load = LoadOptions {
        skip_signature_validation: true,
        ..LoadOptions::default()
    };
    let layout = PackageLayout::load(&layout_dir, &load)?;
    let archive = layout.archive(&opts.output_dir, opts.max_package_size_mb)?;
    info!("created {}", archive.display());
    Ok(CreateResult {
        archive,
        aggregate_checksum: build.aggregate_checksum,
        components_packed: build.components_packed,
        images: build.images,
    })
}

/// How [`load_from_source`] and [`pull`] reach and verify a package.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub load: LoadOptions,
    pub remote: RemoteConfig,
    /// Platform to pick from an OCI tag index.
    pub architecture: String,
    pub selector: LayerSelector,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            load: LoadOptions::default(),
            remote: RemoteConfig::default(),
            architecture: airgap_schema::host_architecture().to_owned(),
            selector: LayerSelector::All,
        }
    }
}

/// Load a package from a directory, tarball, split set, HTTP URL, or OCI
/// reference. Remote packages are fetched into a directory the returned
/// layout owns.
pub fn load_from_source(source: &str, opts: &SourceOptions) -> Result<PackageLayout, CoreError> {
    let identified = PackageSource::identify(source)?
        .ok_or_else(|| CoreError::UnsupportedSource(source.to_owned()))?;
    info!("loading {} package from {identified}", identified.kind());
    match identified {
        PackageSource::Directory(dir) => Ok(PackageLayout::load(&dir, &opts.load)?),
        PackageSource::Tarball(path) | PackageSource::Split(path) => {
            Ok(PackageLayout::load_from_archive(&path, &opts.load)?)
        }
        PackageSource::Http(url) => {
            let tmp = tempfile::tempdir().map_err(io_at(&std::env::temp_dir()))?;
            let name = url
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or("package.tar.zst");
            let archive = tmp.path().join(name);
            fetch_url(&url, &archive, None)?;
            Ok(PackageLayout::load_from_archive(&archive, &opts.load)?)
        }
        PackageSource::Oci(reference) => {
            let backend = HttpRegistry::for_reference(&reference, &opts.remote);
            load_from_registry(&backend, &reference, opts)
        }
    }
}

/// Pull `reference` from `backend` into a layout the result owns.
///
/// A filtered or narrowed pull is loaded with partial verification.
pub fn load_from_registry(
    backend: &dyn RegistryBackend,
    reference: &PackageReference,
    opts: &SourceOptions,
) -> Result<PackageLayout, CoreError> {
    let tmp = tempfile::Builder::new()
        .prefix("airgap-pull-")
        .tempdir()
        .map_err(io_at(&std::env::temp_dir()))?;
    let pull_opts = PullOptions {
        architecture: opts.architecture.clone(),
        filter: opts.load.filter.clone(),
        selector: opts.selector,
        concurrency: opts.remote.concurrency.max(1),
    };
    let pulled = pull_package(backend, reference, tmp.path(), &pull_opts)?;
    let load = LoadOptions {
        is_partial: opts.load.is_partial || pulled.is_partial,
        ..opts.load.clone()
    };
    Ok(PackageLayout::load_owned(tmp, &load)?)
}

/// Pull `reference` and write it to `output_dir` as a package archive.
pub fn pull(
    backend: &dyn RegistryBackend,
    reference: &PackageReference,
    output_dir: &Path,
    opts: &SourceOptions,
) -> Result<PathBuf, CoreError> {
    let layout = load_from_registry(backend, reference, opts)?;
    let archive = layout.archive(output_dir, 0)?;
    layout.cleanup()?;
    info!("pulled {reference} to {}", archive.display());
    Ok(archive)
}

/// Push `layout` under `base` (`oci://<registry>/<namespace>`).
pub fn publish(
    layout: &PackageLayout,
    backend: &dyn RegistryBackend,
    base: &str,
    opts: &PushOptions,
) -> Result<PushResult, CoreError> {
    let reference = PackageReference::for_package(base, layout.pkg())?;
    Ok(push_package(layout, backend, &reference, opts)?)
}

/// Build the package in `definition_dir` as a skeleton and push it under `base`.
pub fn publish_skeleton(
    definition_dir: &Path,
    backend: &dyn RegistryBackend,
    base: &str,
    opts: &CreateOptions,
    push: &PushOptions,
) -> Result<PushResult, CoreError> {
    let work = tempfile::Builder::new()
        .prefix("airgap-skeleton-")
        .tempdir()
        .map_err(io_at(&std::env::temp_dir()))?;
    let dest = work.path().join("layout");
    let skeleton = CreateOptions {
        build: BuildOptions {
            skeleton: true,
            ..opts.build.clone()
        },
        ..opts.clone()
    };
    build_layout(definition_dir, &dest, &skeleton)?;
    let load = LoadOptions {
        skip_signature_validation: true,
        ..LoadOptions::default()
    };
    let layout = PackageLayout::load(&dest, &load)?;
    publish(&layout, backend, base, push)
}
