//! Component import resolution.
//!
//! A component may import its definition from another package directory
//! (`import.path`) or from a published skeleton (`import.url`). Resolution
//! walks the import chain depth-first, rewrites the imported component's
//! relative paths so they stay valid from the importing package, and merges
//! the importing component over it.

use crate::{CoreError, ImportError};
use airgap_remote::reference::OCI_SCHEME;
use airgap_remote::{
    fetch_definition, resolve_root, HttpRegistry, PackageReference, RegistryBackend,
    RemoteConfig, RemoteError,
};
use airgap_schema::{
    migrate_deprecated, parse_package_file, ActionSet, ChartSpec, Component, Constant,
    ManifestSpec, PackageDefinition, ResolvedPackage, SchemaError, Variable, PACKAGE_DEFINITION,
    SKELETON_ARCH,
};
use airgap_store::{sha256_bytes, unpack_tar, COMPONENTS_DIR};
use std::collections::HashSet;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A skeleton package definition plus the directory holding the extracted
/// content of the requested component.
#[derive(Debug, Clone)]
pub struct FetchedSkeleton {
    pub pkg: PackageDefinition,
    pub content_dir: PathBuf,
}

/// Fetches skeleton packages named by `import.url`.
pub trait SkeletonFetcher: Send + Sync {
    fn fetch(&self, url: &str, component: &str) -> Result<FetchedSkeleton, RemoteError>;
}

type BackendFactory = dyn Fn(&PackageReference) -> Arc<dyn RegistryBackend> + Send + Sync;

/// Fetches skeletons from an OCI registry, caching extracted component
/// trees under `cache_dir`.
pub struct OciSkeletonFetcher {
    backend_for: Box<BackendFactory>,
    cache_dir: PathBuf,
}

impl OciSkeletonFetcher {
    pub fn http(config: RemoteConfig, cache_dir: &Path) -> Self {
        Self {
            backend_for: Box::new(move |reference: &PackageReference| {
                Arc::new(HttpRegistry::for_reference(reference, &config)) as Arc<dyn RegistryBackend>
            }),
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    pub fn with_backend(backend: Arc<dyn RegistryBackend>, cache_dir: &Path) -> Self {
        Self {
            backend_for: Box::new(move |_: &PackageReference| Arc::clone(&backend)),
            cache_dir: cache_dir.to_path_buf(),
        }
    }
}

fn remote_io(path: &Path) -> impl FnOnce(std::io::Error) -> RemoteError + '_ {
    move |source| RemoteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl SkeletonFetcher for OciSkeletonFetcher {
    fn fetch(&self, url: &str, component: &str) -> Result<FetchedSkeleton, RemoteError> {
        let reference = PackageReference::parse(url)?;
        let backend = (self.backend_for)(&reference);
        let repo = reference.repository.as_str();
        let (_, root) = resolve_root(backend.as_ref(), &reference, SKELETON_ARCH).map_err(|e| {
            match e {
                RemoteError::NoPlatform { .. } => RemoteError::NotFound(format!(
                    "package at {url} exists but has not been published as a skeleton"
                )),
                other => other,
            }
        })?;
        let pkg = fetch_definition(backend.as_ref(), repo, &root)?;

        let dirs = self.cache_dir.join("dirs");
        let title = format!("{COMPONENTS_DIR}/{component}.tar");
        let Some(desc) = root.layer_titled(&title) else {
            // Every resource of the component is remote; represent it with an empty tree.
            let id = sha256_bytes(format!("{url}{component}").as_bytes());
            let content_dir = dirs.join(id.as_str());
            std::fs::create_dir_all(&content_dir).map_err(remote_io(&content_dir))?;
            return Ok(FetchedSkeleton { pkg, content_dir });
        };

        let extract_dir = dirs.join(desc.digest.encoded());
        let content_dir = extract_dir.join(component);
        if !content_dir.is_dir() {
            let data = backend.get_blob(repo, &desc.digest)?;
            let actual = sha256_bytes(&data).to_digest();
            if actual != desc.digest {
                return Err(RemoteError::DigestMismatch {
                    digest: desc.digest.clone(),
                    actual: actual.into_inner(),
                });
            }
            unpack_tar(data.as_slice(), &extract_dir)?;
            std::fs::create_dir_all(&content_dir).map_err(remote_io(&content_dir))?;
            debug!("extracted skeleton component {component} into {}", extract_dir.display());
        }
        Ok(FetchedSkeleton { pkg, content_dir })
    }
}

/// Flattens component imports for one build target.
pub struct Composer {
    arch: String,
    flavor: String,
    fetcher: Option<Arc<dyn SkeletonFetcher>>,
}

/// Result of resolving one package level.
#[derive(Default)]
struct Resolution {
    components: Vec<Component>,
    variables: Vec<Variable>,
    constants: Vec<Constant>,
}

/// One link of the active import chain: the component looked up and where.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChainLink {
    component: String,
    location: String,
}

impl ChainLink {
    fn describe(&self) -> String {
        format!("{}@{}", self.component, self.location)
    }
}

/// Where an imported component's definition and content live.
struct Imported {
    pkg: PackageDefinition,
    /// Prefix that makes the imported package's relative paths valid from the importer.
    prefix: PathBuf,
    link: ChainLink,
    /// Directory to resolve the imported package's own imports against; `None` for skeletons.
    nested_base: Option<PathBuf>,
}

impl Composer {
    pub fn new(arch: &str, flavor: &str) -> Self {
        Self {
            arch: arch.to_owned(),
            flavor: flavor.to_owned(),
            fetcher: None,
        }
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SkeletonFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Resolve every import of `pkg`, whose relative paths are anchored at `base`.
    ///
    /// Incompatible components are dropped. Variables and constants are
    /// deduplicated by name, the first declaration winning: the root
    /// package's own, then each import's in component order.
    pub fn resolve(&self, mut pkg: PackageDefinition, base: &Path) -> Result<ResolvedPackage, CoreError> {
        let mut chain = Vec::new();
        let components = std::mem::take(&mut pkg.components);
        let resolution = self.resolve_level(components, base, &mut chain)?;

        let mut variables = std::mem::take(&mut pkg.variables);
        variables.extend(resolution.variables);
        let mut constants = std::mem::take(&mut pkg.constants);
        constants.extend(resolution.constants);

        pkg.components = resolution.components;
        pkg.variables = dedup_by_name(variables, |v| &v.name);
        pkg.constants = dedup_by_name(constants, |c| &c.name);
        info!(
            "resolved package '{}' to {} components",
            pkg.metadata.name,
            pkg.components.len()
        );
        Ok(ResolvedPackage::from_flattened(pkg)?)
    }

    fn resolve_level(
        &self,
        components: Vec<Component>,
        base: &Path,
        chain: &mut Vec<ChainLink>,
    ) -> Result<Resolution, ImportError> {
        let mut out = Resolution::default();
        let mut errors = Vec::new();

        for component in components {
            if !component.is_compatible(&self.arch, &self.flavor) {
                debug!("skipping component '{}' for this build target", component.name);
                continue;
            }
            if component.import.is_none() {
                out.components.push(component);
                continue;
            }
            match self.resolve_import(&component, base, chain) {
                Ok((composed, imported)) => {
                    out.components.push(composed);
                    out.variables.extend(imported.variables);
                    out.constants.extend(imported.constants);
                }
                Err(e) => errors.push(e),
            }
        }

        match ImportError::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn resolve_import(
        &self,
        component: &Component,
        base: &Path,
        chain: &mut Vec<ChainLink>,
    ) -> Result<(Component, Resolution), ImportError> {
        check_import(component)?;
        let target = component.import_target_name().to_owned();
        let imported = self.load_import(component, &target, base)?;

        if chain.contains(&imported.link) {
            let mut names: Vec<String> = chain.iter().map(ChainLink::describe).collect();
            names.push(imported.link.describe());
            return Err(ImportError::Cycle { chain: names });
        }

        let mut candidates: Vec<Component> = imported
            .pkg
            .components
            .into_iter()
            .filter(|c| c.name == target)
            .collect();
        let mut nested = Resolution::default();
        if let Some(nested_base) = &imported.nested_base {
            chain.push(imported.link.clone());
            let result = self.resolve_level(candidates, nested_base, chain);
            chain.pop();
            nested = result?;
            candidates = std::mem::take(&mut nested.components);
        }

        let mut found: Vec<Component> = candidates
            .into_iter()
            .filter(|c| c.is_compatible(&self.arch, &self.flavor))
            .collect();
        let mut base_component = match found.len() {
            0 => {
                return Err(ImportError::NotFound {
                    name: target,
                    location: imported.link.location,
                })
            }
            1 => found.remove(0),
            _ => {
                return Err(ImportError::Ambiguous {
                    name: target,
                    location: imported.link.location,
                })
            }
        };

        fix_paths(&mut base_component, &imported.prefix, base);
        override_metadata(&mut base_component, component)?;
        override_actions(&mut base_component, component);
        override_resources(&mut base_component, component);
        debug!(
            "composed component '{}' from {}",
            base_component.name, imported.link.location
        );

        let mut variables = imported.pkg.variables;
        variables.extend(nested.variables);
        let mut constants = imported.pkg.constants;
        constants.extend(nested.constants);
        Ok((
            base_component,
            Resolution {
                components: Vec::new(),
                variables,
                constants,
            },
        ))
    }

    fn load_import(
        &self,
        component: &Component,
        target: &str,
        base: &Path,
    ) -> Result<Imported, ImportError> {
        let Some(import) = &component.import else {
            return Err(ImportError::Malformed {
                component: component.name.clone(),
                reason: "component has no import".to_owned(),
            });
        };

        if !import.path.is_empty() {
            let dir = base.join(&import.path);
            let location = dir.display().to_string();
            let canonical = std::fs::canonicalize(&dir).map_err(|source| ImportError::Definition {
                location: location.clone(),
                source: SchemaError::Io {
                    path: dir.clone(),
                    source,
                },
            })?;
            let mut pkg = parse_package_file(canonical.join(PACKAGE_DEFINITION)).map_err(|source| {
                ImportError::Definition {
                    location: location.clone(),
                    source,
                }
            })?;
            for warning in migrate_deprecated(&mut pkg) {
                debug!("{location}: {warning}");
            }
            return Ok(Imported {
                pkg,
                prefix: PathBuf::from(&import.path),
                link: ChainLink {
                    component: target.to_owned(),
                    location: canonical.display().to_string(),
                },
                nested_base: Some(dir),
            });
        }

        let fetcher = self.fetcher.as_ref().ok_or_else(|| ImportError::Malformed {
            component: component.name.clone(),
            reason: format!("cannot import {} without a skeleton fetcher", import.url),
        })?;
        let skeleton = fetcher
            .fetch(&import.url, target)
            .map_err(|source| ImportError::Fetch {
                url: import.url.clone(),
                source,
            })?;
        Ok(Imported {
            pkg: skeleton.pkg,
            prefix: skeleton.content_dir,
            link: ChainLink {
                component: target.to_owned(),
                location: import.url.clone(),
            },
            nested_base: None,
        })
    }
}

/// Every reason the import block of `component` is unusable, all at once.
fn check_import(component: &Component) -> Result<(), ImportError> {
    let Some(import) = &component.import else {
        return Ok(());
    };
    let mut reasons = Vec::new();
    match (import.path.is_empty(), import.url.is_empty()) {
        (true, true) => reasons.push("neither a path nor a URL was provided".to_owned()),
        (false, false) => reasons.push("both a path and a URL were provided".to_owned()),
        _ => {}
    }
    if !import.path.is_empty() && Path::new(&import.path).is_absolute() {
        reasons.push("path cannot be an absolute path".to_owned());
    }
    if !import.url.is_empty() && !import.url.starts_with(OCI_SCHEME) {
        reasons.push("URL is not a valid OCI URL".to_owned());
    }
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ImportError::Invalid {
            component: component.name.clone(),
            reasons,
        })
    }
}

fn dedup_by_name<T>(items: Vec<T>, name: impl Fn(&T) -> &String) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(name(&item).clone()) {
            out.push(item);
        } else {
            debug!("dropping later declaration of '{}'", name(&item));
        }
    }
    out
}

fn is_url(path: &str) -> bool {
    path.contains("://")
}

/// Lexically clean a path: drop `.` segments and fold `..` into a preceding segment.
fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<PathComponent<'_>> = Vec::new();
    for part in path.components() {
        match part {
            PathComponent::CurDir => {}
            PathComponent::ParentDir => match out.last() {
                Some(PathComponent::Normal(_)) => {
                    out.pop();
                }
                Some(PathComponent::RootDir | PathComponent::Prefix(_)) => {}
                _ => out.push(part),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// `path` as seen from the importer: URLs and absolute paths are kept,
/// relative ones are placed under `prefix`.
fn rebase(path: &str, prefix: &Path) -> String {
    if is_url(path) || Path::new(path).is_absolute() {
        return path.to_owned();
    }
    clean(&prefix.join(path)).to_string_lossy().into_owned()
}

fn rebase_action_dirs(set: &mut ActionSet, prefix: &Path) {
    let default_dir = set.defaults.dir.clone();
    for action in set.actions_mut() {
        let dir = action.dir.as_deref().unwrap_or(&default_dir);
        action.dir = Some(rebase(dir, prefix));
    }
}

/// Rewrite the relative paths of an imported component so they resolve from
/// the importing package. Kustomizations may be remote shorthands, so they
/// are only rewritten when the rebased path exists under `base`.
fn fix_paths(component: &mut Component, prefix: &Path, base: &Path) {
    for file in &mut component.files {
        file.source = rebase(&file.source, prefix);
    }
    for chart in &mut component.charts {
        for values in &mut chart.values_files {
            *values = rebase(values, prefix);
        }
        if !chart.local_path.is_empty() {
            chart.local_path = rebase(&chart.local_path, prefix);
        }
    }
    for manifest in &mut component.manifests {
        for file in &mut manifest.files {
            *file = rebase(file, prefix);
        }
        for kustomization in &mut manifest.kustomizations {
            let composed = rebase(kustomization, prefix);
            if base.join(&composed).exists() {
                *kustomization = composed;
            }
        }
    }
    for injection in &mut component.data_injections {
        injection.source = rebase(&injection.source, prefix);
    }
    rebase_action_dirs(&mut component.actions.on_create, prefix);
}

fn override_metadata(base: &mut Component, over: &Component) -> Result<(), ImportError> {
    base.name.clone_from(&over.name);
    base.default = over.default;
    base.required = over.required;
    base.group.clone_from(&over.group);
    if !over.description.is_empty() {
        base.description.clone_from(&over.description);
    }
    if !over.only.flavor.is_empty() {
        base.only.flavor.clone_from(&over.only.flavor);
    }
    if !over.only.local_os.is_empty() {
        if !base.only.local_os.is_empty() && base.only.local_os != over.only.local_os {
            return Err(ImportError::ConflictingLocalOs {
                component: over.name.clone(),
                base: base.only.local_os.clone(),
                overlay: over.only.local_os.clone(),
            });
        }
        base.only.local_os.clone_from(&over.only.local_os);
    }
    Ok(())
}

fn override_actions(base: &mut Component, over: &Component) {
    let over_sets = [
        &over.actions.on_create,
        &over.actions.on_deploy,
        &over.actions.on_remove,
    ];
    for (set, over_set) in base.actions.sets_mut().into_iter().zip(over_sets) {
        set.defaults = over_set.defaults.clone();
        set.before.extend(over_set.before.iter().cloned());
        set.after.extend(over_set.after.iter().cloned());
        set.on_success.extend(over_set.on_success.iter().cloned());
        set.on_failure.extend(over_set.on_failure.iter().cloned());
    }
}

fn replace_if_set(field: &mut String, value: &str) {
    if !value.is_empty() {
        value.clone_into(field);
    }
}

fn merge_chart(base: &mut ChartSpec, over: &ChartSpec) {
    replace_if_set(&mut base.namespace, &over.namespace);
    replace_if_set(&mut base.release_name, &over.release_name);
    replace_if_set(&mut base.version, &over.version);
    replace_if_set(&mut base.url, &over.url);
    base.values_files.extend(over.values_files.iter().cloned());
    base.variables.extend(over.variables.iter().cloned());
}

fn merge_manifest(base: &mut ManifestSpec, over: &ManifestSpec) {
    replace_if_set(&mut base.namespace, &over.namespace);
    base.files.extend(over.files.iter().cloned());
    base.kustomizations.extend(over.kustomizations.iter().cloned());
}

fn override_resources(base: &mut Component, over: &Component) {
    base.data_injections.extend(over.data_injections.iter().cloned());
    base.files.extend(over.files.iter().cloned());
    base.images.extend(over.images.iter().cloned());
    base.repos.extend(over.repos.iter().cloned());
    base.health_checks.extend(over.health_checks.iter().cloned());

    for chart in &over.charts {
        match base.charts.iter_mut().find(|c| c.name == chart.name) {
            Some(existing) => merge_chart(existing, chart),
            None => base.charts.push(chart.clone()),
        }
    }
    for manifest in &over.manifests {
        match base.manifests.iter_mut().find(|m| m.name == manifest.name) {
            Some(existing) => merge_manifest(existing, manifest),
            None => base.manifests.push(manifest.clone()),
        }
    }
}
