//! Integrity enforcement of package layouts loaded from disk and from archives.

use airgap_schema::{parse_package_str, ByName};
use airgap_store::{
    split_base, write_tar_file, ChecksumLedger, IntegrityError, LoadOptions, PackageLayout,
    StoreError, COMPONENTS_DIR, PACKAGE_DEFINITION,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const DEFINITION: &str = "kind: ZarfPackageConfig
metadata:
  name: integrity
  version: 0.1.0
build:
  architecture: arm64
components:
  - name: alpha
  - name: beta
  - name: gamma
";

fn write_layout(root: &Path, payload_len: usize) {
    for (idx, name) in ["alpha", "beta", "gamma"].into_iter().enumerate() {
        let staged = tempfile::tempdir().unwrap();
        fs::create_dir_all(staged.path().join("manifests")).unwrap();
        fs::write(
            staged.path().join("manifests").join(format!("{name}-0.yaml")),
            format!("kind: ConfigMap # {idx}\n"),
        )
        .unwrap();
        let payload: Vec<u8> = (0..payload_len).map(|i| (i * 31 + idx) as u8).collect();
        fs::create_dir_all(staged.path().join("files/0")).unwrap();
        fs::write(staged.path().join("files/0/blob.bin"), payload).unwrap();
        write_tar_file(
            staged.path(),
            &root.join(COMPONENTS_DIR).join(format!("{name}.tar")),
            Some(name),
        )
        .unwrap();
    }
    let mut pkg = parse_package_str(DEFINITION).unwrap();
    pkg.metadata.aggregate_checksum = ChecksumLedger::compute(root)
        .unwrap()
        .write(root)
        .unwrap()
        .into_inner();
    fs::write(root.join(PACKAGE_DEFINITION), pkg.to_yaml().unwrap()).unwrap();
}

#[test]
fn mutating_a_checksummed_byte_fails_full_load() {
    let dir = tempfile::tempdir().unwrap();
    write_layout(dir.path(), 64);
    let tar = dir.path().join("components/beta.tar");
    let mut bytes = fs::read(&tar).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&tar, bytes).unwrap();

    let err = PackageLayout::load(dir.path(), &LoadOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityError::ChecksumMismatch { ref path, .. }) if path == "components/beta.tar"
    ));
}

#[test]
fn every_subset_loads_partially() {
    let names = ["alpha", "beta", "gamma"];
    for mask in 1u8..8 {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path(), 16);
        let keep: Vec<&str> = names
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, n)| *n)
            .collect();
        for name in names.iter().filter(|n| !keep.contains(n)) {
            fs::remove_file(dir.path().join(format!("components/{name}.tar"))).unwrap();
        }

        let opts = LoadOptions {
            is_partial: true,
            filter: Some(Arc::new(ByName::new(keep.clone()))),
            ..LoadOptions::default()
        };
        let layout = PackageLayout::load(dir.path(), &opts).unwrap();
        assert_eq!(layout.pkg().components.len(), keep.len());
        assert_eq!(layout.is_partial(), keep.len() < names.len());
    }
}

#[test]
fn unlisted_file_fails_even_when_partial() {
    let dir = tempfile::tempdir().unwrap();
    write_layout(dir.path(), 16);
    fs::write(dir.path().join("components/intruder.tar"), "x").unwrap();
    let opts = LoadOptions {
        is_partial: true,
        ..LoadOptions::default()
    };
    assert!(matches!(
        PackageLayout::load(dir.path(), &opts),
        Err(StoreError::Integrity(IntegrityError::UnexpectedFiles(_)))
    ));
}

#[test]
fn split_archive_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    write_layout(dir.path(), 1_500_000);
    let mut pkg = parse_package_str(&fs::read_to_string(dir.path().join(PACKAGE_DEFINITION)).unwrap()).unwrap();
    pkg.metadata.uncompressed = true;
    fs::write(dir.path().join(PACKAGE_DEFINITION), pkg.to_yaml().unwrap()).unwrap();

    let layout = PackageLayout::load(dir.path(), &LoadOptions::default()).unwrap();
    let out = tempfile::tempdir().unwrap();
    let header = layout.archive(out.path(), 1).unwrap();
    assert!(header.to_string_lossy().ends_with(".tar.part000"));
    assert!(split_base(&header).is_some());

    let reloaded = PackageLayout::load_from_archive(&header, &LoadOptions::default()).unwrap();
    assert_eq!(reloaded.pkg().metadata.name, "integrity");
    assert_eq!(reloaded.ledger(), layout.ledger());
}
