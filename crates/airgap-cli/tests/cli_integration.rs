//! CLI subprocess integration tests.
//!
//! These tests invoke the `airgap` binary as a subprocess and verify exit
//! codes, stdout content, and JSON output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn airgap_bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_airgap"));
    cmd.env("HOME", home);
    cmd.env_remove("AIRGAP_LOG");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    airgap_bin(home).args(args).output().unwrap()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

fn assert_ok(output: &Output) {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

const DEFINITION: &str = "\
kind: ZarfPackageConfig
metadata:
  name: shop
  version: 0.3.0
components:
  - name: web
    required: true
    files:
      - source: web.conf
        target: /etc/web.conf
  - name: db
    files:
      - source: db.bin
        target: /var/lib/db.bin
";

/// Bytes zstd cannot shrink, so archive sizes are predictable.
fn noise(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state.to_le_bytes()[0]
        })
        .collect()
}

fn write_definition(dir: &Path, db_bytes: usize) -> PathBuf {
    let def = dir.join("def");
    fs::create_dir_all(&def).unwrap();
    fs::write(def.join("zarf.yaml"), DEFINITION).unwrap();
    fs::write(def.join("web.conf"), "listen 8080\n").unwrap();
    fs::write(def.join("db.bin"), noise(db_bytes)).unwrap();
    def
}

fn create(home: &Path, def: &Path, out: &Path, extra: &[&str]) -> Output {
    let mut args = vec![
        "--json",
        "create",
        def.to_str().unwrap(),
        "--output",
        out.to_str().unwrap(),
        "--arch",
        "amd64",
    ];
    args.extend_from_slice(extra);
    run(home, &args)
}

#[test]
fn version_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    let output = run(home.path(), &["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("airgap"));
}

#[test]
fn help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = run(home.path(), &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["create", "inspect", "publish", "pull", "split", "assemble", "keygen"] {
        assert!(stdout.contains(cmd), "help must list '{cmd}'");
    }
}

#[test]
fn unknown_subcommand_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = run(home.path(), &["deploy"]);
    assert!(!output.status.success());
}

#[test]
fn completions_mention_the_binary() {
    let home = tempfile::tempdir().unwrap();
    let output = run(home.path(), &["completions", "bash"]);
    assert_ok(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("airgap"));
}

#[test]
fn man_pages_cover_subcommands() {
    let home = tempfile::tempdir().unwrap();
    let dir = home.path().join("man");
    let output = run(home.path(), &["man-pages", dir.to_str().unwrap()]);
    assert_ok(&output);
    assert!(dir.join("airgap.1").is_file());
    assert!(dir.join("airgap-create.1").is_file());
}

#[test]
fn create_then_inspect_archive() {
    let work = tempfile::tempdir().unwrap();
    let def = write_definition(work.path(), 4096);
    let out = work.path().join("out");

    let created = create(work.path(), &def, &out, &[]);
    assert_ok(&created);
    let created = stdout_json(&created);
    let archive = out.join("zarf-package-shop-amd64-0.3.0.tar.zst");
    assert_eq!(created["archive"], archive.to_str().unwrap());
    assert_eq!(created["components"], serde_json::json!(["web", "db"]));

    let inspected = run(
        work.path(),
        &["--json", "inspect", archive.to_str().unwrap(), "--list-files"],
    );
    assert_ok(&inspected);
    let inspected = stdout_json(&inspected);
    assert_eq!(inspected["name"], "shop");
    assert_eq!(inspected["architecture"], "amd64");
    assert_eq!(inspected["signed"], false);
    assert_eq!(inspected["partial"], false);
    assert_eq!(inspected["aggregate_checksum"], created["aggregate_checksum"]);
    let files: Vec<String> = serde_json::from_value(inspected["files"].clone()).unwrap();
    assert!(files.contains(&"components/db.tar".to_owned()));
    assert!(files.contains(&"checksums.txt".to_owned()));
}

#[test]
fn invalid_definition_exits_with_definition_code() {
    let work = tempfile::tempdir().unwrap();
    let def = work.path().join("def");
    fs::create_dir_all(&def).unwrap();
    fs::write(def.join("zarf.yaml"), "kind: [unterminated\n").unwrap();

    let output = create(work.path(), &def, &work.path().join("out"), &[]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("error:"));
}

#[test]
fn signed_package_needs_the_key() {
    let work = tempfile::tempdir().unwrap();
    let keys = work.path().join("keys");
    let keygen = run(
        work.path(),
        &["--json", "keygen", "--dir", keys.to_str().unwrap(), "--name", "release"],
    );
    assert_ok(&keygen);
    assert!(keys.join("release.key").is_file());
    assert!(keys.join("release.pub").is_file());

    let again = run(
        work.path(),
        &["keygen", "--dir", keys.to_str().unwrap(), "--name", "release"],
    );
    assert!(!again.status.success());

    let def = write_definition(work.path(), 1024);
    let out = work.path().join("out");
    let signing_key = keys.join("release.key");
    assert_ok(&create(
        work.path(),
        &def,
        &out,
        &["--signing-key", signing_key.to_str().unwrap()],
    ));
    let archive = out.join("zarf-package-shop-amd64-0.3.0.tar.zst");

    let verified = run(
        work.path(),
        &[
            "--json",
            "inspect",
            archive.to_str().unwrap(),
            "--key",
            keys.join("release.pub").to_str().unwrap(),
        ],
    );
    assert_ok(&verified);
    let verified = stdout_json(&verified);
    assert_eq!(verified["signed"], true);
    assert_eq!(verified["build"]["signed"], true);

    let unverified = run(work.path(), &["inspect", archive.to_str().unwrap()]);
    assert_eq!(unverified.status.code(), Some(3));

    let skipped = run(
        work.path(),
        &["inspect", archive.to_str().unwrap(), "--insecure-skip-signature"],
    );
    assert_ok(&skipped);
}

#[test]
fn oversized_package_is_split_and_reassembled() {
    let work = tempfile::tempdir().unwrap();
    let def = write_definition(work.path(), 2_500_000);
    let out = work.path().join("out");

    let created = create(work.path(), &def, &out, &["--max-package-size", "1"]);
    assert_ok(&created);
    let header = out.join("zarf-package-shop-amd64-0.3.0.tar.zst.part000");
    assert_eq!(stdout_json(&created)["archive"], header.to_str().unwrap());
    assert!(out.join("zarf-package-shop-amd64-0.3.0.tar.zst.part003").is_file());

    let inspected = run(work.path(), &["--json", "inspect", header.to_str().unwrap()]);
    assert_ok(&inspected);
    assert_eq!(stdout_json(&inspected)["name"], "shop");

    let assembled = run(work.path(), &["assemble", header.to_str().unwrap()]);
    assert_ok(&assembled);
    let archive = out.join("zarf-package-shop-amd64-0.3.0.tar.zst");
    assert!(archive.is_file());
    assert_ok(&run(work.path(), &["inspect", archive.to_str().unwrap()]));
}

#[test]
fn split_then_assemble_detects_tampering() {
    let work = tempfile::tempdir().unwrap();
    let file = work.path().join("blob.bin");
    let data = noise(2_200_000);
    fs::write(&file, &data).unwrap();

    let split = run(
        work.path(),
        &["--json", "split", file.to_str().unwrap(), "--chunk-size", "1"],
    );
    assert_ok(&split);
    assert_eq!(stdout_json(&split)["parts"], 3);
    assert!(!file.exists());

    let header = work.path().join("blob.bin.part000");
    let restored = work.path().join("restored.bin");
    let assembled = run(
        work.path(),
        &[
            "assemble",
            header.to_str().unwrap(),
            "--output",
            restored.to_str().unwrap(),
        ],
    );
    assert_ok(&assembled);
    assert_eq!(fs::read(&restored).unwrap(), data);

    let part = work.path().join("blob.bin.part002");
    let mut bytes = fs::read(&part).unwrap();
    bytes[10] ^= 0xff;
    fs::write(&part, &bytes).unwrap();
    let tampered = work.path().join("tampered.bin");
    let rejected = run(
        work.path(),
        &[
            "assemble",
            header.to_str().unwrap(),
            "--output",
            tampered.to_str().unwrap(),
        ],
    );
    assert_eq!(rejected.status.code(), Some(3));
    assert!(!tampered.exists());
}

#[test]
fn publish_then_filtered_pull() {
    let work = tempfile::tempdir().unwrap();
    let server = airgap_registry::TestServer::start(work.path().join("registry")).unwrap();
    let def = write_definition(work.path(), 2048);
    let out = work.path().join("out");
    assert_ok(&create(work.path(), &def, &out, &[]));
    let archive = out.join("zarf-package-shop-amd64-0.3.0.tar.zst");

    let base = format!("oci://{}/packages", server.host());
    let published = run(
        work.path(),
        &[
            "--json",
            "--plain-http",
            "publish",
            archive.to_str().unwrap(),
            &base,
        ],
    );
    assert_ok(&published);
    let published = stdout_json(&published);
    assert_eq!(published["reference"], format!("{base}/shop:0.3.0"));
    assert_eq!(published["skeleton"], false);

    let pulled_dir = work.path().join("pulled");
    let pulled = run(
        work.path(),
        &[
            "--json",
            "--plain-http",
            "pull",
            &format!("{base}/shop:0.3.0"),
            "--output",
            pulled_dir.to_str().unwrap(),
            "--arch",
            "amd64",
            "--components",
            "web",
        ],
    );
    assert_ok(&pulled);
    let pulled_archive = pulled_dir.join("zarf-package-shop-amd64-0.3.0.tar.zst");
    assert_eq!(stdout_json(&pulled)["archive"], pulled_archive.to_str().unwrap());

    let strict = run(work.path(), &["inspect", pulled_archive.to_str().unwrap()]);
    assert_eq!(strict.status.code(), Some(3));

    let partial = run(
        work.path(),
        &["--json", "inspect", pulled_archive.to_str().unwrap(), "--partial"],
    );
    assert_ok(&partial);
    let partial = stdout_json(&partial);
    assert_eq!(partial["partial"], true);
    assert_eq!(partial["components"][0]["name"], "web");
}
