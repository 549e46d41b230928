//! Compose and build packages from definition directories, then load them back.

use airgap_core::{build_layout, BuildOptions, CoreError, CreateOptions, ImportError};
use airgap_store::{ComponentSection, LoadOptions, PackageLayout, StoreError, CHECKSUMS};
use std::fs;
use std::path::Path;

fn options(output: &Path) -> CreateOptions {
    CreateOptions {
        build: BuildOptions {
            architecture: "amd64".to_owned(),
            ..BuildOptions::default()
        },
        output_dir: output.to_path_buf(),
        ..CreateOptions::default()
    }
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

const SIMPLE: &str = "\
kind: ZarfPackageConfig
metadata:
  name: simple
  version: 0.1.0
components:
  - name: config
    files:
      - source: conf/app.conf
        target: /etc/app.conf
      - source: conf/extra.conf
        target: /etc/extra.conf
";

fn simple_definition() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("zarf.yaml"), SIMPLE);
    write(&dir.path().join("conf/app.conf"), "port=8080\n");
    write(&dir.path().join("conf/extra.conf"), "debug=false\n");
    dir
}

#[test]
fn rebuilding_yields_identical_ledger_and_tarballs() {
    let def = simple_definition();
    let out = tempfile::tempdir().unwrap();
    let first = build_layout(def.path(), &out.path().join("a"), &options(out.path())).unwrap();
    let second = build_layout(def.path(), &out.path().join("b"), &options(out.path())).unwrap();

    assert_eq!(first.aggregate_checksum, second.aggregate_checksum);
    assert_eq!(
        fs::read(out.path().join("a").join(CHECKSUMS)).unwrap(),
        fs::read(out.path().join("b").join(CHECKSUMS)).unwrap()
    );
    assert_eq!(
        fs::read(out.path().join("a/components/config.tar")).unwrap(),
        fs::read(out.path().join("b/components/config.tar")).unwrap()
    );
}

#[test]
fn absolute_source_is_relocated_into_the_component() {
    let outside = tempfile::tempdir().unwrap();
    let external = outside.path().join("tool.sh");
    write(&external, "#!/bin/sh\necho tool\n");

    let def = tempfile::tempdir().unwrap();
    write(
        &def.path().join("zarf.yaml"),
        &format!(
            "kind: ZarfPackageConfig\nmetadata:\n  name: tools\ncomponents:\n  - name: tool\n    files:\n      - source: {}\n        target: /usr/local/bin/tool.sh\n        executable: true\n",
            external.display()
        ),
    );

    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("layout");
    build_layout(def.path(), &dest, &options(out.path())).unwrap();

    let layout = PackageLayout::load(&dest, &LoadOptions::default()).unwrap();
    assert_eq!(layout.pkg().components[0].files[0].source, "files/0/tool.sh");
    let extract = tempfile::tempdir().unwrap();
    let files = layout
        .get_component_dir(extract.path(), "tool", ComponentSection::Files)
        .unwrap();
    assert_eq!(
        fs::read_to_string(files.join("0/tool.sh")).unwrap(),
        "#!/bin/sh\necho tool\n"
    );
}

#[test]
fn imported_chart_merges_with_override() {
    let root = tempfile::tempdir().unwrap();
    let base = root.path().join("base");
    write(
        &base.join("zarf.yaml"),
        "\
kind: ZarfPackageConfig
metadata:
  name: base
components:
  - name: database
    charts:
      - name: db
        localPath: chart
        namespace: base-ns
        releaseName: db-base
        valuesFiles:
          - values-base.yaml
",
    );
    write(&base.join("chart/Chart.yaml"), "name: db\nversion: 1.0.0\n");
    write(&base.join("values-base.yaml"), "replicas: 1\n");

    let app = root.path().join("app");
    write(
        &app.join("zarf.yaml"),
        "\
kind: ZarfPackageConfig
metadata:
  name: app
  version: 2.0.0
components:
  - name: database
    import:
      path: ../base
    charts:
      - name: db
        namespace: prod
        releaseName: db-prod
        valuesFiles:
          - values-prod.yaml
",
    );
    write(&app.join("values-prod.yaml"), "replicas: 3\n");

    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("layout");
    build_layout(&app, &dest, &options(out.path())).unwrap();

    let layout = PackageLayout::load(&dest, &LoadOptions::default()).unwrap();
    let charts = &layout.pkg().components[0].charts;
    assert_eq!(charts.len(), 1);
    assert_eq!(charts[0].namespace, "prod");
    assert_eq!(charts[0].release_name, "db-prod");
    assert_eq!(charts[0].local_path, "charts/db-0");
    assert_eq!(charts[0].values_files, ["values/db-0", "values/db-1"]);

    let extract = tempfile::tempdir().unwrap();
    let values = layout
        .get_component_dir(extract.path(), "database", ComponentSection::Values)
        .unwrap();
    assert_eq!(fs::read_to_string(values.join("db-0")).unwrap(), "replicas: 1\n");
    assert_eq!(fs::read_to_string(values.join("db-1")).unwrap(), "replicas: 3\n");
}

#[test]
fn circular_imports_fail_without_output() {
    let root = tempfile::tempdir().unwrap();
    for (name, other) in [("a", "b"), ("b", "a")] {
        write(
            &root.path().join(name).join("zarf.yaml"),
            &format!(
                "kind: ZarfPackageConfig\nmetadata:\n  name: {name}\ncomponents:\n  - name: shared\n    import:\n      path: ../{other}\n"
            ),
        );
    }
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("layout");
    let err = build_layout(&root.path().join("a"), &dest, &options(out.path())).unwrap_err();
    assert!(matches!(err, CoreError::Import(ImportError::Cycle { .. })));
    assert!(!dest.exists());
}

#[test]
fn tampering_is_caught_and_removal_needs_partial_mode() {
    let def = simple_definition();
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("layout");
    build_layout(def.path(), &dest, &options(out.path())).unwrap();

    let tarball = dest.join("components/config.tar");
    let original = fs::read(&tarball).unwrap();
    let mut tampered = original.clone();
    tampered[0] ^= 0xff;
    fs::write(&tarball, &tampered).unwrap();
    assert!(matches!(
        PackageLayout::load(&dest, &LoadOptions::default()),
        Err(StoreError::Integrity(_))
    ));

    fs::remove_file(&tarball).unwrap();
    assert!(PackageLayout::load(&dest, &LoadOptions::default()).is_err());
    let partial = LoadOptions {
        is_partial: true,
        ..LoadOptions::default()
    };
    let layout = PackageLayout::load(&dest, &partial).unwrap();
    assert!(layout.is_partial());
}
