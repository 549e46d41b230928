use super::{json_pretty, registry_for_base, remote_config, with_spinner, LoadArgs, EXIT_SUCCESS};
use airgap_core::{load_from_source, publish, publish_skeleton, CreateOptions, SourceOptions};
use airgap_remote::{PushOptions, PushResult};
use airgap_schema::PACKAGE_DEFINITION;
use airgap_store::CHECKSUMS;
use std::path::{Path, PathBuf};

/// A definition directory holds `zarf.yaml` without a checksum ledger.
fn is_definition_dir(source: &str) -> bool {
    let dir = Path::new(source);
    dir.join(PACKAGE_DEFINITION).is_file() && !dir.join(CHECKSUMS).is_file()
}

pub fn run(
    source: &str,
    destination: &str,
    load: &LoadArgs,
    plain_http: bool,
    cache_dir: PathBuf,
    concurrency: Option<usize>,
    json: bool,
) -> Result<u8, String> {
    let remote = remote_config(plain_http)?;
    let backend = registry_for_base(destination, &remote)?;
    let push = PushOptions {
        concurrency: concurrency.unwrap_or(remote.concurrency).max(1),
    };

    let skeleton = is_definition_dir(source);
    let result: PushResult = if skeleton {
        let opts = CreateOptions {
            cache_dir: Some(cache_dir),
            remote,
            ..CreateOptions::default()
        };
        with_spinner(
            json,
            "publishing skeleton...",
            "skeleton published",
            "publish failed",
            || publish_skeleton(Path::new(source), &backend, destination, &opts, &push),
        )?
    } else {
        let opts = SourceOptions {
            load: load.load_options(),
            remote,
            ..SourceOptions::default()
        };
        let layout = load_from_source(source, &opts).map_err(|e| e.to_string())?;
        let pushed = with_spinner(
            json,
            "publishing package...",
            "package published",
            "publish failed",
            || publish(&layout, &backend, destination, &push),
        );
        layout.cleanup().map_err(|e| e.to_string())?;
        pushed?
    };

    if json {
        let payload = serde_json::json!({
            "reference": result.reference.to_string(),
            "digest": result.manifest_digest.as_str(),
            "skeleton": skeleton,
            "blobs_pushed": result.blobs_pushed,
            "blobs_skipped": result.blobs_skipped,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "published {} ({} blobs, {} already present)",
            result.reference, result.blobs_pushed, result.blobs_skipped
        );
        println!("digest: {}", result.manifest_digest);
    }
    Ok(EXIT_SUCCESS)
}
