//! Collection of container images into a package's `images/` OCI layout.

use crate::{verify_digest, HttpRegistry, RegistryBackend, RemoteError};
use airgap_schema::image::DOCKER_HUB;
use airgap_schema::{ImageRef, OciDigest};
use airgap_store::oci::{
    blob_rel_path, index_rel_path, read_image_index, write_blob, write_image_index, Descriptor,
    ImageIndex, ImageManifest, ANNOTATION_BASE_NAME, MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST,
};
use airgap_store::IMAGES_DIR;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Operating system images are collected for.
const IMAGE_OS: &str = "linux";
const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// Copies container images into the OCI layout under `<layout_dir>/images`.
pub trait ImageCollector: Send + Sync {
    /// Collect `images` for `architecture`. Returns the references written.
    fn collect(
        &self,
        images: &[String],
        layout_dir: &Path,
        architecture: &str,
    ) -> Result<Vec<String>, RemoteError>;
}

type BackendFactory = dyn Fn(&str) -> Arc<dyn RegistryBackend> + Send + Sync;

/// Pulls images straight from their registries over the distribution API.
pub struct RegistryImageCollector {
    backend_for: Box<BackendFactory>,
    registry_overrides: BTreeMap<String, String>,
}

impl RegistryImageCollector {
    /// Talk to each image's registry over HTTPS (or HTTP when `plain_http`).
    /// `registry_overrides` maps an image host to the host to pull from.
    pub fn http(plain_http: bool, registry_overrides: BTreeMap<String, String>) -> Self {
        Self {
            backend_for: Box::new(move |host: &str| {
                let host = if host == DOCKER_HUB { DOCKER_HUB_API } else { host };
                Arc::new(HttpRegistry::new(host, plain_http)) as Arc<dyn RegistryBackend>
            }),
            registry_overrides,
        }
    }

    /// Serve every image from one backend, whatever its host.
    pub fn with_backend(backend: Arc<dyn RegistryBackend>) -> Self {
        Self {
            backend_for: Box::new(move |_: &str| Arc::clone(&backend)),
            registry_overrides: BTreeMap::new(),
        }
    }

    fn resolve_manifest(
        backend: &dyn RegistryBackend,
        image: &ImageRef,
        architecture: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        let fetched = backend.get_manifest(&image.path, image.manifest_reference())?;
        match fetched.media_type.as_str() {
            MEDIA_TYPE_IMAGE_INDEX | MEDIA_TYPE_DOCKER_MANIFEST_LIST => {
                let index: ImageIndex = serde_json::from_slice(&fetched.data)?;
                let desc = index.for_platform(architecture, Some(IMAGE_OS)).ok_or_else(|| {
                    RemoteError::NoPlatform {
                        reference: image.to_string(),
                        architecture: architecture.to_owned(),
                    }
                })?;
                let manifest = backend.get_manifest(&image.path, desc.digest.as_str())?;
                verify_digest(&desc.digest, &manifest.data)?;
                Ok(manifest.data)
            }
            _ => Ok(fetched.data),
        }
    }

    fn collect_one(
        &self,
        reference: &str,
        layout_dir: &Path,
        architecture: &str,
        index: &mut ImageIndex,
    ) -> Result<(), RemoteError> {
        let parsed = ImageRef::parse(reference)
            .map_err(|e| RemoteError::InvalidReference {
                reference: reference.to_owned(),
                reason: e.to_string(),
            })?;
        let source = match self.registry_overrides.get(&parsed.host) {
            Some(host) => parsed.with_host(host),
            None => parsed,
        };
        let backend = (self.backend_for)(&source.host);

        let manifest_data = Self::resolve_manifest(backend.as_ref(), &source, architecture)?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_data)?;
        for blob in manifest.blobs() {
            copy_blob(backend.as_ref(), &source.path, &blob.digest, layout_dir)?;
        }
        write_blob(layout_dir, &manifest_data)?;

        let media_type = manifest
            .media_type
            .as_deref()
            .filter(|m| *m == MEDIA_TYPE_DOCKER_MANIFEST)
            .unwrap_or(MEDIA_TYPE_IMAGE_MANIFEST);
        index.upsert_image(
            Descriptor::for_bytes(media_type, &manifest_data)
                .with_annotation(ANNOTATION_BASE_NAME, reference),
        );
        debug!("collected {reference} ({} layers)", manifest.layers.len());
        Ok(())
    }
}

fn copy_blob(
    backend: &dyn RegistryBackend,
    repo: &str,
    digest: &OciDigest,
    layout_dir: &Path,
) -> Result<(), RemoteError> {
    let dest = layout_dir.join(blob_rel_path(digest));
    if dest.is_file() {
        return Ok(());
    }
    backend.fetch_blob_to(repo, digest, &dest)?;
    Ok(())
}

impl ImageCollector for RegistryImageCollector {
    fn collect(
        &self,
        images: &[String],
        layout_dir: &Path,
        architecture: &str,
    ) -> Result<Vec<String>, RemoteError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let mut index = if layout_dir.join(index_rel_path()).is_file() {
            read_image_index(layout_dir)?
        } else {
            ImageIndex::default()
        };
        for image in images {
            self.collect_one(image, layout_dir, architecture, &mut index)?;
        }
        write_image_index(layout_dir, &index)?;
        info!(
            "collected {} images into {}",
            images.len(),
            layout_dir.join(IMAGES_DIR).display()
        );
        Ok(images.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryRegistry;
    use airgap_store::oci::{Platform, ANNOTATION_TITLE};
    use airgap_store::sha256_bytes;

    /// Push a one-layer image to `registry` under `repo:tag`, behind an
    /// index listing amd64 and arm64.
    fn seed_image(registry: &MemoryRegistry, repo: &str, tag: &str) -> ImageManifest {
        let mut index = ImageIndex::default();
        let mut amd = None;
        for arch in ["amd64", "arm64"] {
            let config = format!("{{\"architecture\":\"{arch}\"}}");
            let layer = format!("rootfs for {arch}");
            for blob in [config.as_bytes(), layer.as_bytes()] {
                registry
                    .put_blob(repo, &sha256_bytes(blob).to_digest(), blob)
                    .unwrap();
            }
            let manifest = ImageManifest::new(
                Descriptor::for_bytes("application/vnd.oci.image.config.v1+json", config.as_bytes()),
                vec![Descriptor::for_bytes(
                    "application/vnd.oci.image.layer.v1.tar",
                    layer.as_bytes(),
                )],
                Default::default(),
            );
            let data = serde_json::to_vec(&manifest).unwrap();
            let desc = Descriptor::for_bytes(MEDIA_TYPE_IMAGE_MANIFEST, &data);
            registry
                .put_manifest(repo, desc.digest.as_str(), MEDIA_TYPE_IMAGE_MANIFEST, &data)
                .unwrap();
            index.manifests.push(Descriptor {
                platform: Some(Platform {
                    architecture: arch.to_owned(),
                    os: IMAGE_OS.to_owned(),
                    variant: None,
                }),
                ..desc
            });
            if arch == "amd64" {
                amd = Some(manifest);
            }
        }
        let data = serde_json::to_vec(&index).unwrap();
        registry
            .put_manifest(repo, tag, MEDIA_TYPE_IMAGE_INDEX, &data)
            .unwrap();
        amd.unwrap()
    }

    #[test]
    fn collects_platform_manifest_into_layout() {
        let registry = Arc::new(MemoryRegistry::new());
        let expected = seed_image(&registry, "library/nginx", "1.25");
        let collector = RegistryImageCollector::with_backend(registry);

        let dir = tempfile::tempdir().unwrap();
        let written = collector
            .collect(&["nginx:1.25".to_owned()], dir.path(), "amd64")
            .unwrap();
        assert_eq!(written, ["nginx:1.25"]);

        let index = read_image_index(dir.path()).unwrap();
        let entry = index.find_image("docker.io/library/nginx:1.25").unwrap();
        assert!(dir.path().join(blob_rel_path(&entry.digest)).is_file());
        for blob in expected.blobs() {
            assert!(dir
                .path()
                .join(blob_rel_path(&blob.digest))
                .is_file());
        }
        assert!(dir.path().join("images/oci-layout").is_file());
        assert!(entry.annotations.get(ANNOTATION_TITLE).is_none());
    }

    #[test]
    fn recollecting_replaces_the_index_entry() {
        let registry = Arc::new(MemoryRegistry::new());
        seed_image(&registry, "library/nginx", "1.25");
        let collector = RegistryImageCollector::with_backend(registry);
        let dir = tempfile::tempdir().unwrap();
        let images = ["nginx:1.25".to_owned()];
        collector.collect(&images, dir.path(), "amd64").unwrap();
        collector.collect(&images, dir.path(), "arm64").unwrap();
        assert_eq!(read_image_index(dir.path()).unwrap().manifests.len(), 1);
    }

    #[test]
    fn missing_platform_is_reported() {
        let registry = Arc::new(MemoryRegistry::new());
        seed_image(&registry, "library/nginx", "1.25");
        let collector = RegistryImageCollector::with_backend(registry);
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            collector.collect(&["nginx:1.25".to_owned()], dir.path(), "s390x"),
            Err(RemoteError::NoPlatform { .. })
        ));
    }

    #[test]
    fn nothing_to_collect_writes_nothing() {
        let collector = RegistryImageCollector::with_backend(Arc::new(MemoryRegistry::new()));
        let dir = tempfile::tempdir().unwrap();
        assert!(collector.collect(&[], dir.path(), "amd64").unwrap().is_empty());
        assert!(!dir.path().join(IMAGES_DIR).exists());
    }
}
