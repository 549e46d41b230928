use crate::archive::{create_package_archive, extract_package_archive, unpack_tar};
use crate::checksum::{list_files, sha256_bytes, ChecksumLedger, IntegrityReport};
use crate::signing::{verify_definition, PackageVerifier, PublicKey};
use crate::split::{reassemble, remove_parts, split_base, split_file};
use crate::{
    io_at, IntegrityError, StoreError, CHECKSUMS, COMPONENTS_DIR, PACKAGE_DEFINITION,
    SBOM_TAR,
};
use airgap_schema::{migrate_deprecated, parse_package_file, ComponentFilter, PackageDefinition};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

/// Bytes per megabyte when sizing split chunks.
const MEGABYTE: u64 = 1000 * 1000;

/// A component name must be one normal path segment so joins stay under `dest`.
fn is_plain_segment(name: &str) -> bool {
    let mut parts = Path::new(name).components();
    matches!(parts.next(), Some(std::path::Component::Normal(_)))
        && parts.next().is_none()
        && !name.contains(['/', '\\'])
}

/// Options controlling [`PackageLayout::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub public_key_path: Option<PathBuf>,
    pub skip_signature_validation: bool,
    /// Tolerate ledger-listed files that are absent (filtered transport).
    pub is_partial: bool,
    /// Narrows `components` of the loaded definition; never deletes files.
    pub filter: Option<Arc<dyn ComponentFilter>>,
}

/// Per-component subdirectory inside a component tarball.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentSection {
    Files,
    Charts,
    Values,
    Manifests,
    Repos,
    DataInjections,
}

impl ComponentSection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Charts => "charts",
            Self::Values => "values",
            Self::Manifests => "manifests",
            Self::Repos => "repos",
            Self::DataInjections => "data",
        }
    }
}

impl fmt::Display for ComponentSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded and verified package on disk.
///
/// Read-only once loaded. A layout opened from an archive owns its
/// extraction directory and removes it on [`cleanup`](Self::cleanup) or drop.
#[derive(Debug)]
pub struct PackageLayout {
    dir: PathBuf,
    pkg: PackageDefinition,
    ledger: ChecksumLedger,
    report: IntegrityReport,
    warnings: Vec<String>,
    extracted: Option<TempDir>,
}

impl PackageLayout {
    /// Load the layout at `dir`: parse, migrate, filter, then verify
    /// integrity and signature.
    pub fn load(dir: &Path, opts: &LoadOptions) -> Result<Self, StoreError> {
        let mut pkg = parse_package_file(dir.join(PACKAGE_DEFINITION))?;
        let warnings = migrate_deprecated(&mut pkg);

        if let Some(filter) = &opts.filter {
            pkg.components = filter.apply(&pkg)?;
            debug!("filter kept {} components", pkg.components.len());
        }

        let ledger_path = dir.join(CHECKSUMS);
        let ledger_bytes = fs::read(&ledger_path).map_err(io_at(&ledger_path))?;
        if !pkg.metadata.aggregate_checksum.is_empty() {
            let actual = sha256_bytes(&ledger_bytes);
            if actual != pkg.metadata.aggregate_checksum.as_str() {
                return Err(IntegrityError::AggregateMismatch {
                    expected: pkg.metadata.aggregate_checksum.clone(),
                    actual: actual.into_inner(),
                }
                .into());
            }
        }
        let ledger = ChecksumLedger::parse(&String::from_utf8_lossy(&ledger_bytes))?;
        let report = ledger.verify(dir, opts.is_partial)?;

        if opts.skip_signature_validation {
            debug!("skipping signature validation");
        } else {
            let key = opts
                .public_key_path
                .as_deref()
                .map(PublicKey::load)
                .transpose()?;
            verify_definition(dir, key.as_ref().map(|k| k as &dyn PackageVerifier))?;
        }

        info!(
            "loaded package '{}' ({} files verified, {} absent)",
            pkg.metadata.name,
            report.verified,
            report.absent.len()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            pkg,
            ledger,
            report,
            warnings,
            extracted: None,
        })
    }

    /// Load from a `.tar`, `.tar.zst`, or split `.part000` set.
    ///
    /// Split sets are reassembled and checked against their header before
    /// extraction.
    pub fn load_from_archive(archive: &Path, opts: &LoadOptions) -> Result<Self, StoreError> {
        let tmp = tempfile::Builder::new()
            .prefix("airgap-layout-")
            .tempdir()
            .map_err(io_at(&std::env::temp_dir()))?;

        let split_header = split_base(archive).or_else(|| {
            let header = crate::split::part_path(archive, 0);
            (!archive.exists() && header.exists()).then(|| archive.to_path_buf())
        });
        let tarball = match split_header {
            Some(base) => {
                let joined = tmp.path().join("package.tar");
                let meta = reassemble(&base, &joined)?;
                meta.verify(&joined)?;
                joined
            }
            None => archive.to_path_buf(),
        };

        let root = tmp.path().join("layout");
        extract_package_archive(&tarball, &root)?;
        if tarball.starts_with(tmp.path()) {
            fs::remove_file(&tarball).map_err(io_at(&tarball))?;
        }

        let mut layout = Self::load(&root, opts)?;
        layout.extracted = Some(tmp);
        Ok(layout)
    }

    /// Load the layout rooted at `tmp`, which the layout then owns.
    pub fn load_owned(tmp: TempDir, opts: &LoadOptions) -> Result<Self, StoreError> {
        let mut layout = Self::load(tmp.path(), opts)?;
        layout.extracted = Some(tmp);
        Ok(layout)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pkg(&self) -> &PackageDefinition {
        &self.pkg
    }

    pub fn ledger(&self) -> &ChecksumLedger {
        &self.ledger
    }

    /// Deprecation warnings produced by migrations during load.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// True when some ledger-listed files were absent at load time.
    pub fn is_partial(&self) -> bool {
        !self.report.absent.is_empty()
    }

    /// Every file in the layout: absolute path to layout-relative name.
    pub fn files(&self) -> Result<BTreeMap<PathBuf, String>, StoreError> {
        Ok(list_files(&self.dir)?
            .into_iter()
            .map(|rel| (self.dir.join(&rel), rel))
            .collect())
    }

    pub fn component_tarball(&self, name: &str) -> PathBuf {
        self.dir.join(COMPONENTS_DIR).join(format!("{name}.tar"))
    }

    /// Extract `components/<name>.tar` and return `<dest>/<name>/<section>`.
    pub fn get_component_dir(
        &self,
        dest: &Path,
        name: &str,
        section: ComponentSection,
    ) -> Result<PathBuf, StoreError> {
        if !is_plain_segment(name) {
            return Err(StoreError::InvalidComponentName(name.to_owned()));
        }
        if self.pkg.component(name).is_none() {
            return Err(StoreError::ComponentNotFound(name.to_owned()));
        }
        let tarball = self.component_tarball(name);
        if !tarball.is_file() {
            return Err(StoreError::ComponentNotFound(name.to_owned()));
        }

        fs::create_dir_all(dest).map_err(io_at(dest))?;
        let tmp = TempDir::new_in(dest).map_err(io_at(dest))?;
        let file = File::open(&tarball).map_err(io_at(&tarball))?;
        unpack_tar(BufReader::new(file), tmp.path())?;

        let extracted = tmp.path().join(name).join(section.as_str());
        if !extracted.is_dir() {
            return Err(StoreError::SectionNotFound {
                component: name.to_owned(),
                section: section.to_string(),
            });
        }

        let target_parent = dest.join(name);
        fs::create_dir_all(&target_parent).map_err(io_at(&target_parent))?;
        let target = target_parent.join(section.as_str());
        if target.exists() {
            fs::remove_dir_all(&target).map_err(io_at(&target))?;
        }
        fs::rename(&extracted, &target).map_err(io_at(&target))?;
        debug!("extracted {name}/{section} to {}", target.display());
        Ok(target)
    }

    pub fn contains_sbom(&self) -> bool {
        self.dir.join(SBOM_TAR).is_file()
    }

    /// Unpack `sboms.tar` into `dest`.
    pub fn get_sbom(&self, dest: &Path) -> Result<PathBuf, StoreError> {
        if !self.contains_sbom() {
            return Err(StoreError::NoSbom);
        }
        let path = self.dir.join(SBOM_TAR);
        let file = File::open(&path).map_err(io_at(&path))?;
        unpack_tar(BufReader::new(file), dest)?;
        Ok(dest.to_path_buf())
    }

    pub fn file_name(&self) -> String {
        package_file_name(&self.pkg)
    }

    /// Write the layout as a single archive into `dest_dir`.
    ///
    /// With a non-zero `max_size_mb`, an archive larger than that is split
    /// and the path of its `.part000` header is returned.
    pub fn archive(&self, dest_dir: &Path, max_size_mb: u64) -> Result<PathBuf, StoreError> {
        self.archive_in_chunks(dest_dir, max_size_mb.saturating_mul(MEGABYTE))
    }

    /// `chunk == 0` never splits. A failed split removes the full archive,
    /// an unsplit archive removes parts left by an earlier split.
    fn archive_in_chunks(&self, dest_dir: &Path, chunk: u64) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(dest_dir).map_err(io_at(dest_dir))?;
        let dest = dest_dir.join(self.file_name());
        create_package_archive(&self.dir, &dest, !self.pkg.metadata.uncompressed)?;

        let size = fs::metadata(&dest).map_err(io_at(&dest))?.len();
        if chunk > 0 && size > chunk {
            info!("package is {size} bytes, splitting into {chunk} byte chunks");
            if let Err(e) = split_file(&dest, chunk) {
                let _ = fs::remove_file(&dest);
                return Err(e);
            }
            return Ok(crate::split::part_path(&dest, 0));
        }
        remove_parts(&dest)?;
        Ok(dest)
    }

    /// Remove the extraction directory of an archive-backed layout.
    pub fn cleanup(mut self) -> Result<(), StoreError> {
        if let Some(tmp) = self.extracted.take() {
            let path = tmp.path().to_path_buf();
            tmp.close().map_err(io_at(&path))?;
        }
        Ok(())
    }
}

/// `zarf-package-<name>-<arch>[-<version>][-<flavor>].tar[.zst]`, or
/// `zarf-init-<arch>...` for init packages.
pub fn package_file_name(pkg: &PackageDefinition) -> String {
    let arch = pkg.architecture();
    let mut name = if pkg.is_init_config() {
        format!("zarf-init-{arch}")
    } else {
        format!("zarf-package-{}-{arch}", pkg.metadata.name)
    };
    if !pkg.metadata.version.is_empty() {
        name.push('-');
        name.push_str(&pkg.metadata.version);
    }
    if !pkg.build.flavor.is_empty() {
        name.push('-');
        name.push_str(&pkg.build.flavor);
    }
    name.push_str(if pkg.metadata.uncompressed {
        ".tar"
    } else {
        ".tar.zst"
    });
    name
}
