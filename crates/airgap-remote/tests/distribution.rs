//! Push a package holding images for two components, then pull one of them.

use airgap_remote::{
    pull_package, push_package, ImageCollector, LayerSelector, MemoryRegistry, PackageReference,
    PullOptions, PushOptions, RegistryBackend, RegistryImageCollector,
};
use airgap_schema::ByName;
use airgap_store::oci::{
    blob_rel_path, read_image_index, Descriptor, ImageManifest, MEDIA_TYPE_IMAGE_MANIFEST,
};
use airgap_store::{sha256_bytes, ChecksumLedger, LoadOptions, PackageLayout};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const DEFINITION: &str = "\
kind: ZarfPackageConfig
metadata:
  name: shop
  version: 0.3.0
build:
  architecture: amd64
components:
  - name: web
    images:
      - ghcr.io/shop/web:1.0
  - name: db
    images:
      - ghcr.io/shop/db:1.0
";

fn seed(registry: &MemoryRegistry, repo: &str) {
    let config = format!("{{\"image\":\"{repo}\"}}");
    let layer = format!("layer of {repo}");
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
    registry
        .put_manifest(repo, "1.0", MEDIA_TYPE_IMAGE_MANIFEST, &data)
        .unwrap();
}

fn build_layout(root: &Path) {
    fs::write(root.join("zarf.yaml"), DEFINITION).unwrap();
    fs::create_dir_all(root.join("components")).unwrap();
    fs::write(root.join("components/web.tar"), "web").unwrap();
    fs::write(root.join("components/db.tar"), "db").unwrap();

    let upstream = Arc::new(MemoryRegistry::new());
    seed(&upstream, "shop/web");
    seed(&upstream, "shop/db");
    RegistryImageCollector::with_backend(upstream)
        .collect(
            &["ghcr.io/shop/web:1.0".to_owned(), "ghcr.io/shop/db:1.0".to_owned()],
            root,
            "amd64",
        )
        .unwrap();
    ChecksumLedger::compute(root).unwrap().write(root).unwrap();
}

#[test]
fn filtered_pull_brings_only_the_selected_images() {
    let src = tempfile::tempdir().unwrap();
    build_layout(src.path());
    let layout = PackageLayout::load(src.path(), &LoadOptions::default()).unwrap();

    let registry = MemoryRegistry::new();
    let reference = PackageReference::parse("oci://127.0.0.1:5000/shop:0.3.0").unwrap();
    push_package(&layout, &registry, &reference, &PushOptions::default()).unwrap();

    let out = tempfile::tempdir().unwrap();
    let opts = PullOptions::new("amd64").with_filter(Arc::new(ByName::new(["web"])));
    let result = pull_package(&registry, &reference, out.path(), &opts).unwrap();
    assert!(result.is_partial);

    let index = read_image_index(out.path()).unwrap();
    let web = index.find_image("ghcr.io/shop/web:1.0").unwrap();
    let db = index.find_image("ghcr.io/shop/db:1.0").unwrap();
    assert!(out.path().join(blob_rel_path(&web.digest)).is_file());
    assert!(!out.path().join(blob_rel_path(&db.digest)).exists());
    assert!(out.path().join("components/web.tar").is_file());
    assert!(!out.path().join("components/db.tar").exists());

    let partial = LoadOptions {
        is_partial: true,
        ..LoadOptions::default()
    };
    let pulled = PackageLayout::load(out.path(), &partial).unwrap();
    assert_eq!(pulled.pkg().metadata.name, "shop");
}

#[test]
fn images_selector_without_filter_skips_component_tarballs() {
    let src = tempfile::tempdir().unwrap();
    build_layout(src.path());
    let layout = PackageLayout::load(src.path(), &LoadOptions::default()).unwrap();

    let registry = MemoryRegistry::new();
    let reference = PackageReference::parse("oci://127.0.0.1:5000/shop:0.3.0").unwrap();
    push_package(&layout, &registry, &reference, &PushOptions::default()).unwrap();

    let out = tempfile::tempdir().unwrap();
    let opts = PullOptions::new("amd64").with_selector(LayerSelector::Images);
    pull_package(&registry, &reference, out.path(), &opts).unwrap();

    assert!(out.path().join("images/index.json").is_file());
    assert!(out.path().join("images/oci-layout").is_file());
    assert!(!out.path().join("components").exists());
}
