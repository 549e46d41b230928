//! OCI image-layout and distribution types shared by the `images/` directory
//! of a package and by registry transfers.

use crate::{io_at, sha256_bytes, write_atomic, StoreError, IMAGES_DIR};
use airgap_schema::{same_image, Annotations, OciDigest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Media type of every package file pushed as a blob.
pub const PACKAGE_LAYER_MEDIA_TYPE: &str = "application/vnd.zarf.layer.v1.blob";
/// Media type of the package manifest config blob.
pub const PACKAGE_CONFIG_MEDIA_TYPE: &str = "application/vnd.zarf.config.v1+json";

pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
pub const ANNOTATION_DESCRIPTION: &str = "org.opencontainers.image.description";
pub const ANNOTATION_URL: &str = "org.opencontainers.image.url";
pub const ANNOTATION_AUTHORS: &str = "org.opencontainers.image.authors";
pub const ANNOTATION_DOCUMENTATION: &str = "org.opencontainers.image.documentation";
pub const ANNOTATION_SOURCE: &str = "org.opencontainers.image.source";
pub const ANNOTATION_VENDOR: &str = "org.opencontainers.image.vendor";
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";
pub const ANNOTATION_BASE_NAME: &str = "org.opencontainers.image.base.name";

pub const INDEX_JSON: &str = "index.json";
pub const OCI_LAYOUT: &str = "oci-layout";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: OciDigest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn for_bytes(media_type: &str, data: &[u8]) -> Self {
        Self {
            media_type: media_type.to_owned(),
            digest: sha256_bytes(data).to_digest(),
            size: data.len() as u64,
            annotations: Annotations::new(),
            platform: None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_TITLE).map(String::as_str)
    }

    #[must_use]
    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_owned(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>, annotations: Annotations) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_IMAGE_MANIFEST.to_owned()),
            config,
            layers,
            annotations,
        }
    }

    /// Layer whose title annotation equals `title`.
    pub fn layer_titled(&self, title: &str) -> Option<&Descriptor> {
        self.layers.iter().find(|l| l.title() == Some(title))
    }

    /// Config followed by every layer.
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl Default for ImageIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_IMAGE_INDEX.to_owned()),
            manifests: Vec::new(),
            annotations: Annotations::new(),
        }
    }
}

impl ImageIndex {
    /// Manifest descriptor whose base-name annotation names the same image as `reference`.
    pub fn find_image(&self, reference: &str) -> Option<&Descriptor> {
        self.manifests.iter().find(|m| {
            m.annotations
                .get(ANNOTATION_BASE_NAME)
                .is_some_and(|name| same_image(name, reference))
        })
    }

    /// Replace the entry for the same image, or append a new one.
    pub fn upsert_image(&mut self, descriptor: Descriptor) {
        let name = descriptor.annotations.get(ANNOTATION_BASE_NAME).cloned();
        let existing = name.as_deref().and_then(|name| {
            self.manifests.iter().position(|m| {
                m.annotations
                    .get(ANNOTATION_BASE_NAME)
                    .is_some_and(|other| same_image(other, name))
            })
        });
        match existing {
            Some(idx) => self.manifests[idx] = descriptor,
            None => self.manifests.push(descriptor),
        }
    }

    /// Manifest descriptor for a platform, if one is listed.
    pub fn for_platform(&self, architecture: &str, os: Option<&str>) -> Option<&Descriptor> {
        self.manifests.iter().find(|m| {
            m.platform.as_ref().is_some_and(|p| {
                p.architecture == architecture && os.is_none_or(|os| p.os == os)
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciLayoutFile {
    pub image_layout_version: String,
}

impl Default for OciLayoutFile {
    fn default() -> Self {
        Self {
            image_layout_version: "1.0.0".to_owned(),
        }
    }
}

/// Layout-relative path of a blob: `images/blobs/sha256/<hex>`.
pub fn blob_rel_path(digest: &OciDigest) -> String {
    format!(
        "{IMAGES_DIR}/blobs/{}/{}",
        digest.algorithm(),
        digest.encoded()
    )
}

pub fn index_rel_path() -> String {
    format!("{IMAGES_DIR}/{INDEX_JSON}")
}

pub fn oci_layout_rel_path() -> String {
    format!("{IMAGES_DIR}/{OCI_LAYOUT}")
}

/// Read `images/index.json` under a package layout root.
pub fn read_image_index(layout_dir: &Path) -> Result<ImageIndex, StoreError> {
    let path = layout_dir.join(index_rel_path());
    let data = fs::read(&path).map_err(io_at(&path))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Write `images/index.json` and `images/oci-layout` under a package layout root.
pub fn write_image_index(layout_dir: &Path, index: &ImageIndex) -> Result<(), StoreError> {
    let images = layout_dir.join(IMAGES_DIR);
    fs::create_dir_all(&images).map_err(io_at(&images))?;
    write_atomic(&images.join(INDEX_JSON), &serde_json::to_vec(index)?)?;
    write_atomic(
        &images.join(OCI_LAYOUT),
        &serde_json::to_vec(&OciLayoutFile::default())?,
    )
}

/// Store `data` as a content-addressed blob under the layout's `images/blobs/`.
pub fn write_blob(layout_dir: &Path, data: &[u8]) -> Result<OciDigest, StoreError> {
    let digest = sha256_bytes(data).to_digest();
    let path = layout_dir.join(blob_rel_path(&digest));
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        write_atomic(&path, data)?;
    }
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_entry(name: &str, payload: &[u8]) -> Descriptor {
        Descriptor::for_bytes(MEDIA_TYPE_IMAGE_MANIFEST, payload)
            .with_annotation(ANNOTATION_BASE_NAME, name)
    }

    #[test]
    fn descriptor_json_uses_camel_case() {
        let d = Descriptor::for_bytes(PACKAGE_LAYER_MEDIA_TYPE, b"bar")
            .with_annotation(ANNOTATION_TITLE, "foo");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"mediaType\":\"application/vnd.zarf.layer.v1.blob\""));
        assert!(json.contains(
            "\"digest\":\"sha256:fcde2b2edba56bf408601fb721fe9b5c338d10ee429ea04fae5511b68fbf8fb9\""
        ));
        assert!(!json.contains("platform"));
        assert_eq!(d.title(), Some("foo"));
    }

    #[test]
    fn find_image_normalizes_references() {
        let mut index = ImageIndex::default();
        index.upsert_image(image_entry("docker.io/library/nginx:1.25", b"a"));
        index.upsert_image(image_entry("ghcr.io/org/app:1", b"b"));
        assert!(index.find_image("nginx:1.25").is_some());
        assert!(index.find_image("nginx:1.26").is_none());
    }

    #[test]
    fn upsert_replaces_same_image() {
        let mut index = ImageIndex::default();
        index.upsert_image(image_entry("nginx", b"a"));
        index.upsert_image(image_entry("docker.io/library/nginx:latest", b"b"));
        assert_eq!(index.manifests.len(), 1);
        assert_eq!(index.manifests[0].size, 1);
        assert_eq!(index.manifests[0].digest, sha256_bytes(b"b").to_digest());
    }

    #[test]
    fn blob_paths_live_under_images() {
        let digest = sha256_bytes(b"").to_digest();
        assert_eq!(
            blob_rel_path(&digest),
            "images/blobs/sha256/e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn index_and_blobs_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let digest = write_blob(dir.path(), b"layer").unwrap();
        assert!(dir.path().join(blob_rel_path(&digest)).is_file());

        let mut index = ImageIndex::default();
        index.upsert_image(image_entry("nginx", b"m"));
        write_image_index(dir.path(), &index).unwrap();
        assert_eq!(read_image_index(dir.path()).unwrap(), index);
        let layout = fs::read_to_string(dir.path().join(oci_layout_rel_path())).unwrap();
        assert_eq!(layout, "{\"imageLayoutVersion\":\"1.0.0\"}");
    }

    #[test]
    fn platform_lookup() {
        let mut index = ImageIndex::default();
        let mut d = Descriptor::for_bytes(MEDIA_TYPE_IMAGE_MANIFEST, b"x");
        d.platform = Some(Platform {
            architecture: "amd64".to_owned(),
            os: "multi".to_owned(),
            variant: None,
        });
        index.manifests.push(d);
        assert!(index.for_platform("amd64", None).is_some());
        assert!(index.for_platform("amd64", Some("linux")).is_none());
        assert!(index.for_platform("arm64", None).is_none());
    }
}
