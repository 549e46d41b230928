//! Materialize a resolved package into a verified on-disk layout.
//!
//! Writes happen in a fixed order inside a private staging directory next
//! to the destination: component tarballs, images, SBOM, `checksums.txt`,
//! `zarf.yaml`, and finally the signature. The finished tree is renamed into
//! place, so an interrupted build never leaves a ledger or signature
//! describing tarballs that were not written.

use crate::actions::ActionRunner;
use crate::stage::{is_empty_dir, stage_component, StageContext};
use crate::{io_at, CancelToken, CoreError};
use airgap_remote::ImageCollector;
use airgap_schema::{
    host_architecture, known_migrations, Action, ActionSet, ChartSpec, Component, PackageDefinition,
    ResolvedPackage, SemanticValidator, Sha256Hex, Validator, SKELETON_ARCH,
};
use airgap_store::{
    sign_definition, write_atomic, write_tar_file, ChecksumLedger, PackageSigner, COMPONENTS_DIR,
    PACKAGE_DEFINITION, SBOM_TAR,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pulls a remote Helm chart into `charts_dir`.
pub trait ChartFetcher: Send + Sync {
    fn fetch(&self, chart: &ChartSpec, charts_dir: &Path) -> Result<(), CoreError>;
}

/// Renders a kustomization target into one manifest file at `dest`.
pub trait ManifestRenderer: Send + Sync {
    fn render(&self, target: &str, dest: &Path, allow_any_directory: bool) -> Result<(), CoreError>;
}

/// Mirrors a git repository into `repos_dir`.
pub trait RepoCollector: Send + Sync {
    fn collect(&self, url: &str, repos_dir: &Path) -> Result<(), CoreError>;
}

/// Produces the SBOM archive for a staged layout and returns its path.
pub trait SbomGenerator: Send + Sync {
    fn generate(&self, pkg: &PackageDefinition, layout_dir: &Path) -> Result<PathBuf, CoreError>;
}

#[derive(Clone)]
pub struct BuildOptions {
    pub architecture: String,
    pub flavor: String,
    /// Build an architecture-independent skeleton for use as an import source.
    pub skeleton: bool,
    pub signer: Option<Arc<dyn PackageSigner + Send + Sync>>,
    pub registry_overrides: BTreeMap<String, String>,
    pub cancel: CancelToken,
    pub image_collector: Option<Arc<dyn ImageCollector>>,
    pub sbom: Option<Arc<dyn SbomGenerator>>,
    pub manifest_renderer: Option<Arc<dyn ManifestRenderer>>,
    pub chart_fetcher: Option<Arc<dyn ChartFetcher>>,
    pub repo_collector: Option<Arc<dyn RepoCollector>>,
    pub validator: Arc<dyn Validator + Send + Sync>,
    /// Tool version recorded in `build.version`.
    pub version: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            architecture: host_architecture().to_owned(),
            flavor: String::new(),
            skeleton: false,
            signer: None,
            registry_overrides: BTreeMap::new(),
            cancel: CancelToken::new(),
            image_collector: None,
            sbom: None,
            manifest_renderer: None,
            chart_fetcher: None,
            repo_collector: None,
            validator: Arc::new(SemanticValidator),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub layout_dir: PathBuf,
    pub aggregate_checksum: Sha256Hex,
    /// Components that produced a tarball, in declaration order.
    pub components_packed: Vec<String>,
    pub images: Vec<String>,
}

pub struct PackageBuilder {
    options: BuildOptions,
}

impl PackageBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build `resolved` into the layout directory `dest`, reading relative
    /// sources from `source_dir`. `dest` must not exist or must be empty.
    pub fn build(
        &self,
        resolved: &ResolvedPackage,
        source_dir: &Path,
        dest: &Path,
    ) -> Result<BuildResult, CoreError> {
        let opts = &self.options;
        let mut pkg = resolved.definition().clone();

        let findings = opts.validator.validate(&pkg).into_result()?;
        for warning in findings.warnings() {
            warn!("{warning}");
        }
        check_destination(dest)?;

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(io_at(&parent))?;
        let staging = tempfile::Builder::new()
            .prefix(".airgap-build-")
            .tempdir_in(&parent)
            .map_err(io_at(&parent))?;
        let work = staging.path().join("work");
        let layout = staging.path().join("layout");
        fs::create_dir_all(&layout).map_err(io_at(&layout))?;

        if opts.skeleton {
            pkg.metadata.architecture = SKELETON_ARCH.to_owned();
            for component in &mut pkg.components {
                component.only.flavor.clear();
            }
        } else {
            pkg.metadata.architecture.clone_from(&opts.architecture);
        }
        info!(
            "building package {} for {}",
            pkg.metadata.name, pkg.metadata.architecture
        );

        let ctx = StageContext {
            source_dir,
            skeleton: opts.skeleton,
            charts: opts.chart_fetcher.as_deref(),
            renderer: opts.manifest_renderer.as_deref(),
            repos: opts.repo_collector.as_deref(),
        };
        let mut components_packed = Vec::new();
        for component in &mut pkg.components {
            opts.cancel.check()?;
            if self.build_component(&ctx, component, &work, &layout)? {
                components_packed.push(component.name.clone());
            }
        }

        let images = if opts.skeleton {
            Vec::new()
        } else {
            self.collect_images(&pkg, &layout)?
        };

        if let Some(generator) = &opts.sbom {
            if !opts.skeleton {
                opts.cancel.check()?;
                let produced = generator.generate(&pkg, &layout)?;
                let target = layout.join(SBOM_TAR);
                if produced != target {
                    fs::rename(&produced, &target).map_err(io_at(&produced))?;
                }
            }
        }

        opts.cancel.check()?;
        let aggregate = ChecksumLedger::compute(&layout)?.write(&layout)?;
        pkg.metadata.aggregate_checksum = aggregate.as_str().to_owned();
        self.record_build_metadata(&mut pkg);

        write_atomic(&layout.join(PACKAGE_DEFINITION), pkg.to_yaml()?.as_bytes())?;
        if let Some(signer) = &opts.signer {
            sign_definition(&layout, &**signer)?;
        }

        if dest.exists() {
            fs::remove_dir(dest).map_err(io_at(dest))?;
        }
        fs::rename(&layout, dest).map_err(io_at(dest))?;
        info!("package written to {}", dest.display());

        Ok(BuildResult {
            layout_dir: dest.to_path_buf(),
            aggregate_checksum: aggregate,
            components_packed,
            images,
        })
    }

    /// Run onCreate actions around staging and pack the staged tree.
    /// Returns whether a tarball was written.
    fn build_component(
        &self,
        ctx: &StageContext<'_>,
        component: &mut Component,
        work: &Path,
        layout: &Path,
    ) -> Result<bool, CoreError> {
        let name = component.name.clone();
        debug!("building component {name}");
        let on_create = component.actions.on_create.clone();
        let mut runner = ActionRunner::new(ctx.source_dir, self.options.cancel.clone());
        let run_actions = !ctx.skeleton;

        let comp_dir = work.join(&name);
        let staged = (|| -> Result<(), CoreError> {
            if run_actions {
                runner.run_all(&on_create, &on_create.before)?;
            }
            stage_component(ctx, component, &comp_dir)?;
            if run_actions {
                runner.run_all(&on_create, &on_create.after)?;
            }
            Ok(())
        })();
        if let Err(e) = staged {
            if run_actions {
                run_handlers(&mut runner, &on_create, &on_create.on_failure);
            }
            return Err(e);
        }

        let packed = if is_empty_dir(&comp_dir)? {
            debug!("component {name} staged nothing, no tarball");
            false
        } else {
            let tarball = layout.join(COMPONENTS_DIR).join(format!("{name}.tar"));
            write_tar_file(&comp_dir, &tarball, Some(name.as_str()))?;
            true
        };
        if run_actions {
            runner.run_all(&on_create, &on_create.on_success)?;
        }
        Ok(packed)
    }

    fn collect_images(&self, pkg: &PackageDefinition, layout: &Path) -> Result<Vec<String>, CoreError> {
        let mut seen = BTreeSet::new();
        let images: Vec<String> = pkg
            .components
            .iter()
            .flat_map(|c| &c.images)
            .filter(|image| seen.insert(image.as_str()))
            .cloned()
            .collect();
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let collector = self.options.image_collector.as_ref().ok_or_else(|| {
            CoreError::Staging {
                component: pkg.metadata.name.clone(),
                reason: format!("{} image(s) referenced but no image collector configured", images.len()),
            }
        })?;
        self.options.cancel.check()?;
        info!("collecting {} image(s)", images.len());
        Ok(collector.collect(&images, layout, &pkg.metadata.architecture)?)
    }

    fn record_build_metadata(&self, pkg: &mut PackageDefinition) {
        let opts = &self.options;
        pkg.build.terminal = hostname();
        pkg.build.user = std::env::var("USER").unwrap_or_default();
        pkg.build.architecture.clone_from(&pkg.metadata.architecture);
        pkg.build.timestamp = chrono::Utc::now().to_rfc2822();
        pkg.build.version.clone_from(&opts.version);
        pkg.build.migrations = known_migrations();
        pkg.build.registry_overrides.clone_from(&opts.registry_overrides);
        pkg.build.flavor = if opts.skeleton {
            String::new()
        } else {
            opts.flavor.clone()
        };
        pkg.build.signed = opts.signer.as_ref().map(|_| true);
    }
}

/// Failure handlers run best-effort; their own errors only get logged.
fn run_handlers(runner: &mut ActionRunner, set: &ActionSet, actions: &[Action]) {
    if let Err(e) = runner.run_all(set, actions) {
        warn!("onFailure action failed: {e}");
    }
}

fn check_destination(dest: &Path) -> Result<(), CoreError> {
    if dest.exists() && !(dest.is_dir() && is_empty_dir(dest)?) {
        return Err(CoreError::Io {
            path: dest.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "build destination exists and is not an empty directory",
            ),
        });
    }
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .map(|h| h.trim().to_owned())
        .unwrap_or_default()
}
