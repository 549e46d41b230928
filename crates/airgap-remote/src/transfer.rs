//! Package push and filtered pull against an OCI registry.
//!
//! Every file of a package layout becomes one blob layer titled with its
//! layout-relative path. The manifest is pushed by digest and the tag points
//! at an image index with one entry per architecture, so several builds of
//! the same version coexist under one tag.

use crate::{
    io_at, verify_digest, PackageReference, RegistryBackend, RemoteError, DEFAULT_CONCURRENCY,
    PACKAGE_OS,
};
use airgap_schema::{
    parse_package_str, Annotations, Component, ComponentFilter, FilterError, OciDigest,
    PackageDefinition, PACKAGE_DEFINITION,
};
use airgap_store::oci::{
    blob_rel_path, index_rel_path, oci_layout_rel_path, Descriptor, ImageIndex, ImageManifest,
    Platform, ANNOTATION_AUTHORS, ANNOTATION_CREATED, ANNOTATION_DESCRIPTION,
    ANNOTATION_DOCUMENTATION, ANNOTATION_SOURCE, ANNOTATION_TITLE, ANNOTATION_URL,
    ANNOTATION_VENDOR, MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_IMAGE_INDEX,
    MEDIA_TYPE_IMAGE_MANIFEST, PACKAGE_CONFIG_MEDIA_TYPE, PACKAGE_LAYER_MEDIA_TYPE,
};
use airgap_store::{
    sha256_file, PackageLayout, CHECKSUMS, COMPONENTS_DIR, SBOM_TAR, SIGNATURE,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Component as PathComponent, Path};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Files every selection includes, when the package has them.
const METADATA_LAYERS: [&str; 3] = [PACKAGE_DEFINITION, CHECKSUMS, SIGNATURE];

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub concurrency: usize,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug)]
pub struct PushResult {
    pub reference: PackageReference,
    pub manifest_digest: OciDigest,
    pub blobs_pushed: usize,
    pub blobs_skipped: usize,
}

/// Which part of a package a pull retrieves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LayerSelector {
    #[default]
    All,
    /// `zarf.yaml`, `checksums.txt` and the signature.
    Metadata,
    /// Metadata plus the tarballs of the selected components.
    Components,
    /// Metadata plus the image layout entries the selected components reference.
    Images,
    /// Metadata plus `sboms.tar`.
    Sbom,
}

#[derive(Debug, Clone)]
pub struct PullOptions {
    /// Architecture to pick from the tag index.
    pub architecture: String,
    pub filter: Option<Arc<dyn ComponentFilter>>,
    pub selector: LayerSelector,
    pub concurrency: usize,
}

impl PullOptions {
    pub fn new(architecture: &str) -> Self {
        Self {
            architecture: architecture.to_owned(),
            filter: None,
            selector: LayerSelector::All,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn ComponentFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: LayerSelector) -> Self {
        self.selector = selector;
        self
    }
}

#[derive(Debug)]
pub struct PullResult {
    pub pkg: PackageDefinition,
    pub manifest_digest: OciDigest,
    pub layers: Vec<Descriptor>,
    pub bytes: u64,
    /// Fewer layers were fetched than the package holds.
    pub is_partial: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageConfig<'a> {
    architecture: &'a str,
    oci_version: &'a str,
    annotations: &'a Annotations,
}

/// Manifest annotations derived from package metadata.
///
/// Title and description are always set; the other well-known keys only
/// when the metadata field is non-empty. User annotations win over derived
/// ones.
pub fn annotations_from_metadata(pkg: &PackageDefinition) -> Annotations {
    let meta = &pkg.metadata;
    let mut annotations = Annotations::new();
    annotations.insert(ANNOTATION_TITLE.to_owned(), meta.name.clone());
    annotations.insert(ANNOTATION_DESCRIPTION.to_owned(), meta.description.clone());
    for (key, value) in [
        (ANNOTATION_URL, &meta.url),
        (ANNOTATION_AUTHORS, &meta.authors),
        (ANNOTATION_DOCUMENTATION, &meta.documentation),
        (ANNOTATION_SOURCE, &meta.source),
        (ANNOTATION_VENDOR, &meta.vendor),
    ] {
        if !value.is_empty() {
            annotations.insert(key.to_owned(), value.clone());
        }
    }
    if !pkg.build.timestamp.is_empty() {
        match chrono::DateTime::parse_from_rfc2822(&pkg.build.timestamp) {
            Ok(ts) => {
                annotations.insert(ANNOTATION_CREATED.to_owned(), ts.to_rfc3339());
            }
            Err(e) => warn!("build timestamp '{}' not RFC 2822: {e}", pkg.build.timestamp),
        }
    }
    for (key, value) in &meta.annotations {
        annotations.insert(key.clone(), value.clone());
    }
    annotations
}

fn thread_pool(concurrency: usize) -> Result<rayon::ThreadPool, RemoteError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()
        .map_err(|e| RemoteError::Config(format!("cannot start transfer pool: {e}")))
}

fn platform_for(pkg: &PackageDefinition) -> Platform {
    Platform {
        architecture: pkg.architecture().to_owned(),
        os: PACKAGE_OS.to_owned(),
        variant: None,
    }
}

/// Push a loaded package layout to `reference` (which must carry a tag).
pub fn push_package(
    layout: &PackageLayout,
    backend: &dyn RegistryBackend,
    reference: &PackageReference,
    opts: &PushOptions,
) -> Result<PushResult, RemoteError> {
    if reference.is_digest() {
        return Err(RemoteError::InvalidReference {
            reference: reference.to_string(),
            reason: "packages are published to a tag".to_owned(),
        });
    }
    let pkg = layout.pkg();
    let repo = reference.repository.as_str();

    let files = layout.files()?;
    let mut layers = Vec::with_capacity(files.len());
    for (path, rel) in &files {
        let size = std::fs::metadata(path).map_err(io_at(path))?.len();
        layers.push(Descriptor {
            media_type: PACKAGE_LAYER_MEDIA_TYPE.to_owned(),
            digest: sha256_file(path)?.to_digest(),
            size,
            annotations: Annotations::from([(ANNOTATION_TITLE.to_owned(), rel.clone())]),
            platform: None,
        });
    }
    layers.sort_by(|a, b| a.digest.cmp(&b.digest).then_with(|| a.title().cmp(&b.title())));

    let root_dir = layout.dir();
    let pool = thread_pool(opts.concurrency)?;
    let outcomes: Vec<bool> = pool.install(|| {
        layers
            .par_iter()
            .map(|layer| -> Result<bool, RemoteError> {
                if backend.has_blob(repo, &layer.digest)? {
                    debug!("blob {} already present", layer.digest);
                    return Ok(false);
                }
                let title = layer.title().unwrap_or_default();
                let path = root_dir.join(title);
                let sent = backend.push_blob_from(repo, &layer.digest, &path)?;
                debug!("pushed {title} ({sent} bytes)");
                Ok(true)
            })
            .collect::<Result<Vec<bool>, RemoteError>>()
    })?;
    let blobs_pushed = outcomes.iter().filter(|pushed| **pushed).count();
    let blobs_skipped = outcomes.len() - blobs_pushed;

    let annotations = annotations_from_metadata(pkg);
    let config_data = serde_json::to_vec(&PackageConfig {
        architecture: pkg.architecture(),
        oci_version: "1.0.1",
        annotations: &annotations,
    })?;
    let config = Descriptor::for_bytes(PACKAGE_CONFIG_MEDIA_TYPE, &config_data);
    if !backend.has_blob(repo, &config.digest)? {
        backend.put_blob(repo, &config.digest, &config_data)?;
    }

    let manifest = ImageManifest::new(config, layers, annotations);
    let manifest_data = serde_json::to_vec(&manifest)?;
    let manifest_desc = Descriptor::for_bytes(MEDIA_TYPE_IMAGE_MANIFEST, &manifest_data);
    backend.put_manifest(
        repo,
        manifest_desc.digest.as_str(),
        MEDIA_TYPE_IMAGE_MANIFEST,
        &manifest_data,
    )?;

    let platform = platform_for(pkg);
    let mut index = existing_index(backend, repo, &reference.reference)?;
    let entry = Descriptor {
        platform: Some(platform.clone()),
        ..manifest_desc.clone()
    };
    match index
        .manifests
        .iter()
        .position(|m| m.platform.as_ref() == Some(&platform))
    {
        Some(idx) => index.manifests[idx] = entry,
        None => index.manifests.push(entry),
    }
    let index_data = serde_json::to_vec(&index)?;
    backend.put_manifest(repo, &reference.reference, MEDIA_TYPE_IMAGE_INDEX, &index_data)?;

    info!(
        "published {reference} ({}, {blobs_pushed} blobs pushed, {blobs_skipped} already present)",
        platform.architecture
    );
    Ok(PushResult {
        reference: reference.clone(),
        manifest_digest: manifest_desc.digest,
        blobs_pushed,
        blobs_skipped,
    })
}

/// The index a tag currently points at. A missing tag, or one pointing at a
/// plain manifest, starts a fresh index.
fn existing_index(
    backend: &dyn RegistryBackend,
    repo: &str,
    tag: &str,
) -> Result<ImageIndex, RemoteError> {
    match backend.get_manifest(repo, tag) {
        Ok(fetched) if is_index_media_type(&fetched.media_type) => {
            Ok(serde_json::from_slice(&fetched.data)?)
        }
        Ok(_) => {
            debug!("tag {tag} does not point at an index, replacing it");
            Ok(ImageIndex::default())
        }
        Err(RemoteError::NotFound(_)) => Ok(ImageIndex::default()),
        Err(e) => Err(e),
    }
}

fn is_index_media_type(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_IMAGE_INDEX || media_type == MEDIA_TYPE_DOCKER_MANIFEST_LIST
}

/// Resolve the package manifest for `architecture` at `reference`.
///
/// A tag holding an index is narrowed to its platform entry; a reference
/// holding a plain manifest is used as-is.
pub fn resolve_root(
    backend: &dyn RegistryBackend,
    reference: &PackageReference,
    architecture: &str,
) -> Result<(OciDigest, ImageManifest), RemoteError> {
    let repo = reference.repository.as_str();
    let fetched = backend.get_manifest(repo, &reference.reference)?;
    let (digest, data) = if is_index_media_type(&fetched.media_type) {
        let index: ImageIndex = serde_json::from_slice(&fetched.data)?;
        let desc = index
            .for_platform(architecture, Some(PACKAGE_OS))
            .ok_or_else(|| RemoteError::NoPlatform {
                reference: reference.to_string(),
                architecture: architecture.to_owned(),
            })?;
        let manifest = backend.get_manifest(repo, desc.digest.as_str())?;
        verify_digest(&desc.digest, &manifest.data)?;
        (desc.digest.clone(), manifest.data)
    } else {
        let digest = airgap_store::sha256_bytes(&fetched.data).to_digest();
        (digest, fetched.data)
    };
    let manifest: ImageManifest = serde_json::from_slice(&data)?;
    Ok((digest, manifest))
}

/// Fetch and parse the `zarf.yaml` layer of a root manifest.
pub fn fetch_definition(
    backend: &dyn RegistryBackend,
    repo: &str,
    root: &ImageManifest,
) -> Result<PackageDefinition, RemoteError> {
    let desc = root.layer_titled(PACKAGE_DEFINITION).ok_or_else(|| {
        RemoteError::InvalidPackage(format!("manifest has no {PACKAGE_DEFINITION} layer"))
    })?;
    let data = backend.get_blob(repo, &desc.digest)?;
    verify_digest(&desc.digest, &data)?;
    let text = String::from_utf8(data)
        .map_err(|e| RemoteError::InvalidPackage(format!("{PACKAGE_DEFINITION}: {e}")))?;
    parse_package_str(&text).map_err(|e| RemoteError::InvalidPackage(e.to_string()))
}

/// Root-manifest layers needed for `selector` over `components`.
///
/// `filtered` is true when the caller narrowed the component list; with
/// [`LayerSelector::All`] that selects the union of every group instead of
/// every root layer.
pub fn assemble_layers(
    backend: &dyn RegistryBackend,
    repo: &str,
    root: &ImageManifest,
    pkg: &PackageDefinition,
    components: &[Component],
    selector: LayerSelector,
    filtered: bool,
) -> Result<Vec<Descriptor>, RemoteError> {
    if selector == LayerSelector::All && !filtered {
        return Ok(root.layers.clone());
    }

    let mut titles: Vec<String> = METADATA_LAYERS.iter().map(|t| (*t).to_owned()).collect();
    let wants = |group: LayerSelector| selector == group || selector == LayerSelector::All;

    if wants(LayerSelector::Components) {
        titles.extend(
            components
                .iter()
                .map(|c| format!("{COMPONENTS_DIR}/{}.tar", c.name)),
        );
    }
    if wants(LayerSelector::Images) && !pkg.is_skeleton() {
        titles.extend(image_layer_titles(backend, repo, root, components)?);
    }
    if wants(LayerSelector::Sbom) {
        titles.push(SBOM_TAR.to_owned());
    }

    let mut seen = BTreeSet::new();
    Ok(titles
        .into_iter()
        .filter(|title| seen.insert(title.clone()))
        .filter_map(|title| root.layer_titled(&title).cloned())
        .collect())
}

/// Titles of the image layout entries the components' images need: the
/// index, the layout marker, and each image's manifest, config and layers.
fn image_layer_titles(
    backend: &dyn RegistryBackend,
    repo: &str,
    root: &ImageManifest,
    components: &[Component],
) -> Result<Vec<String>, RemoteError> {
    let images: BTreeSet<&str> = components
        .iter()
        .flat_map(|c| c.images.iter().map(String::as_str))
        .collect();
    if images.is_empty() {
        return Ok(Vec::new());
    }
    let index_title = index_rel_path();
    let Some(index_desc) = root.layer_titled(&index_title) else {
        return Ok(Vec::new());
    };
    let index_data = backend.get_blob(repo, &index_desc.digest)?;
    verify_digest(&index_desc.digest, &index_data)?;
    let index: ImageIndex = serde_json::from_slice(&index_data)?;

    let mut titles = vec![index_title, oci_layout_rel_path()];
    for image in images {
        let Some(entry) = index.find_image(image) else {
            warn!("image {image} is not in the package image index");
            continue;
        };
        let manifest_title = blob_rel_path(&entry.digest);
        let manifest_desc = root.layer_titled(&manifest_title).ok_or_else(|| {
            RemoteError::InvalidPackage(format!("missing layer {manifest_title} for {image}"))
        })?;
        let data = backend.get_blob(repo, &manifest_desc.digest)?;
        verify_digest(&manifest_desc.digest, &data)?;
        let manifest: ImageManifest = serde_json::from_slice(&data)?;
        titles.push(manifest_title);
        titles.extend(manifest.blobs().map(|d| blob_rel_path(&d.digest)));
    }
    Ok(titles)
}

/// A layer title must be a plain relative path that stays inside the destination.
fn safe_title(title: &str) -> bool {
    !title.is_empty()
        && Path::new(title)
            .components()
            .all(|c| matches!(c, PathComponent::Normal(_)))
}

/// Pull the package at `reference` into `dest`.
///
/// Only the layers the selector and filter need are downloaded, in parallel,
/// each checked against its digest. The pulled `zarf.yaml` is left
/// untouched, so the ledger still lists every file and a partial pull must
/// be loaded with partial verification.
pub fn pull_package(
    backend: &dyn RegistryBackend,
    reference: &PackageReference,
    dest: &Path,
    opts: &PullOptions,
) -> Result<PullResult, RemoteError> {
    let repo = reference.repository.as_str();
    let (manifest_digest, root) = resolve_root(backend, reference, &opts.architecture)?;
    let pkg = fetch_definition(backend, repo, &root)?;

    let components = match opts.filter {
        Some(ref filter) => filter.apply(&pkg).map_err(|e| match e {
            FilterError::UnknownComponent(name) => RemoteError::ComponentNotFound(name),
        })?,
        None => pkg.components.clone(),
    };
    let layers = assemble_layers(
        backend,
        repo,
        &root,
        &pkg,
        &components,
        opts.selector,
        opts.filter.is_some(),
    )?;

    let mut seen = BTreeSet::new();
    let mut unique = Vec::with_capacity(layers.len());
    for layer in layers {
        let title = layer.title().unwrap_or_default().to_owned();
        if !safe_title(&title) {
            return Err(RemoteError::InvalidPackage(format!(
                "layer {} has unsafe title '{title}'",
                layer.digest
            )));
        }
        if seen.insert(title) {
            unique.push(layer);
        }
    }

    std::fs::create_dir_all(dest).map_err(io_at(dest))?;
    let pool = thread_pool(opts.concurrency)?;
    let sizes: Vec<u64> = pool.install(|| {
        unique
            .par_iter()
            .map(|layer| {
                let title = layer.title().unwrap_or_default();
                backend.fetch_blob_to(repo, &layer.digest, &dest.join(title))
            })
            .collect::<Result<Vec<u64>, RemoteError>>()
    })?;
    let bytes: u64 = sizes.iter().sum();

    let is_partial = unique.len() < root.layers.len();
    info!(
        "pulled {} of {} layers from {reference} ({bytes} bytes)",
        unique.len(),
        root.layers.len()
    );
    Ok(PullResult {
        pkg,
        manifest_digest,
        layers: unique,
        bytes,
        is_partial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryRegistry;
    use airgap_schema::ByName;
    use airgap_store::{ChecksumLedger, LoadOptions};
    use std::fs;

    const DEFINITION: &str = "\
kind: ZarfPackageConfig
metadata:
  name: demo
  version: 1.0.0
  description: demo package
  vendor: example
  annotations:
    org.opencontainers.image.vendor: override
build:
  architecture: amd64
  timestamp: Tue, 01 Oct 2024 10:00:00 +0000
components:
  - name: web
  - name: db
";

    fn layout_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(PACKAGE_DEFINITION), DEFINITION).unwrap();
        fs::create_dir_all(root.join("components")).unwrap();
        fs::write(root.join("components/web.tar"), "web tarball").unwrap();
        fs::write(root.join("components/db.tar"), "db tarball").unwrap();
        fs::write(root.join(SBOM_TAR), "sbom").unwrap();
        ChecksumLedger::compute(root).unwrap().write(root).unwrap();
        dir
    }

    fn reference() -> PackageReference {
        PackageReference::parse("oci://registry.local/demo:1.0.0").unwrap()
    }

    fn pushed(registry: &MemoryRegistry) -> tempfile::TempDir {
        let dir = layout_fixture();
        let layout = PackageLayout::load(dir.path(), &LoadOptions::default()).unwrap();
        push_package(&layout, registry, &reference(), &PushOptions::default()).unwrap();
        dir
    }

    #[test]
    fn annotations_follow_metadata() {
        let pkg = parse_package_str(DEFINITION).unwrap();
        let a = annotations_from_metadata(&pkg);
        assert_eq!(a[ANNOTATION_TITLE], "demo");
        assert_eq!(a[ANNOTATION_DESCRIPTION], "demo package");
        assert_eq!(a[ANNOTATION_VENDOR], "override");
        assert_eq!(a[ANNOTATION_CREATED], "2024-10-01T10:00:00+00:00");
        assert!(!a.contains_key(ANNOTATION_URL));
    }

    #[test]
    fn push_writes_sorted_layers_and_platform_index() {
        let registry = MemoryRegistry::new();
        let _dir = pushed(&registry);

        let tag = registry.get_manifest("demo", "1.0.0").unwrap();
        assert_eq!(tag.media_type, MEDIA_TYPE_IMAGE_INDEX);
        let index: ImageIndex = serde_json::from_slice(&tag.data).unwrap();
        assert_eq!(index.manifests.len(), 1);
        let platform = index.manifests[0].platform.as_ref().unwrap();
        assert_eq!(platform.architecture, "amd64");
        assert_eq!(platform.os, PACKAGE_OS);

        let (_, root) = resolve_root(&registry, &reference(), "amd64").unwrap();
        let digests: Vec<_> = root.layers.iter().map(|l| l.digest.clone()).collect();
        let mut sorted = digests.clone();
        sorted.sort();
        assert_eq!(digests, sorted);
        assert!(root.layer_titled("components/web.tar").is_some());
        assert_eq!(root.config.media_type, PACKAGE_CONFIG_MEDIA_TYPE);
    }

    #[test]
    fn second_push_skips_existing_blobs() {
        let registry = MemoryRegistry::new();
        let dir = pushed(&registry);
        let layout = PackageLayout::load(dir.path(), &LoadOptions::default()).unwrap();
        let again = push_package(&layout, &registry, &reference(), &PushOptions::default()).unwrap();
        assert_eq!(again.blobs_pushed, 0);
        assert!(again.blobs_skipped > 0);
    }

    #[test]
    fn architectures_share_a_tag() {
        let registry = MemoryRegistry::new();
        let _amd = pushed(&registry);

        let arm = layout_fixture();
        let text = DEFINITION.replace("architecture: amd64", "architecture: arm64");
        fs::write(arm.path().join(PACKAGE_DEFINITION), text).unwrap();
        let layout = PackageLayout::load(arm.path(), &LoadOptions::default()).unwrap();
        push_package(&layout, &registry, &reference(), &PushOptions::default()).unwrap();

        let index: ImageIndex =
            serde_json::from_slice(&registry.get_manifest("demo", "1.0.0").unwrap().data).unwrap();
        assert_eq!(index.manifests.len(), 2);
        assert!(resolve_root(&registry, &reference(), "arm64").is_ok());
        assert!(matches!(
            resolve_root(&registry, &reference(), "s390x"),
            Err(RemoteError::NoPlatform { .. })
        ));
    }

    #[test]
    fn push_to_digest_is_rejected() {
        let registry = MemoryRegistry::new();
        let dir = layout_fixture();
        let layout = PackageLayout::load(dir.path(), &LoadOptions::default()).unwrap();
        let by_digest = reference().with_reference("sha256:00");
        assert!(matches!(
            push_package(&layout, &registry, &by_digest, &PushOptions::default()),
            Err(RemoteError::InvalidReference { .. })
        ));
    }

    #[test]
    fn full_pull_is_complete() {
        let registry = MemoryRegistry::new();
        let _dir = pushed(&registry);
        let out = tempfile::tempdir().unwrap();
        let result =
            pull_package(&registry, &reference(), out.path(), &PullOptions::new("amd64")).unwrap();
        assert!(!result.is_partial);
        assert_eq!(result.pkg.metadata.name, "demo");
        PackageLayout::load(out.path(), &LoadOptions::default()).unwrap();
    }

    #[test]
    fn filtered_pull_fetches_only_selected_component() {
        let registry = MemoryRegistry::new();
        let _dir = pushed(&registry);
        let out = tempfile::tempdir().unwrap();
        let opts = PullOptions::new("amd64").with_filter(Arc::new(ByName::new(["web"])));
        let result = pull_package(&registry, &reference(), out.path(), &opts).unwrap();

        assert!(result.is_partial);
        assert!(out.path().join("components/web.tar").is_file());
        assert!(!out.path().join("components/db.tar").exists());
        assert!(out.path().join(SBOM_TAR).is_file());

        let partial = LoadOptions {
            is_partial: true,
            ..LoadOptions::default()
        };
        PackageLayout::load(out.path(), &partial).unwrap();
    }

    #[test]
    fn metadata_selector_skips_tarballs() {
        let registry = MemoryRegistry::new();
        let _dir = pushed(&registry);
        let out = tempfile::tempdir().unwrap();
        let opts = PullOptions::new("amd64").with_selector(LayerSelector::Metadata);
        let result = pull_package(&registry, &reference(), out.path(), &opts).unwrap();
        let titles: Vec<_> = result.layers.iter().filter_map(Descriptor::title).collect();
        assert_eq!(titles, [PACKAGE_DEFINITION, CHECKSUMS]);
        assert!(result.is_partial);
    }

    #[test]
    fn unknown_component_maps_to_component_not_found() {
        let registry = MemoryRegistry::new();
        let _dir = pushed(&registry);
        let out = tempfile::tempdir().unwrap();
        let opts = PullOptions::new("amd64").with_filter(Arc::new(ByName::new(["cache"])));
        assert!(matches!(
            pull_package(&registry, &reference(), out.path(), &opts),
            Err(RemoteError::ComponentNotFound(name)) if name == "cache"
        ));
    }

    #[test]
    fn unsafe_titles_are_refused() {
        assert!(safe_title("components/web.tar"));
        assert!(!safe_title("../escape"));
        assert!(!safe_title("/etc/passwd"));
        assert!(!safe_title(""));
    }
}
