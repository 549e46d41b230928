use super::{
    bold, dim, display_size, file_size, json_pretty, parse_overrides, remote_config,
    with_spinner, EXIT_SUCCESS,
};
use airgap_core::{create, BuildOptions, CancelToken, CreateOptions};
use airgap_remote::RegistryImageCollector;
use airgap_store::{PackageSigner, SigningKeyPair};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct CreateArgs {
    pub definition_dir: PathBuf,
    pub output_dir: PathBuf,
    pub architecture: Option<String>,
    pub flavor: String,
    pub max_package_size_mb: u64,
    pub signing_key: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub registry_overrides: Vec<String>,
    pub plain_http: bool,
}

pub fn run(args: &CreateArgs, cancel: &CancelToken, json: bool) -> Result<u8, String> {
    let remote = remote_config(args.plain_http)?;
    let overrides = parse_overrides(&args.registry_overrides)?;
    let signer = match &args.signing_key {
        Some(path) => Some(load_signer(path)?),
        None => None,
    };

    let mut build = BuildOptions {
        flavor: args.flavor.clone(),
        signer,
        cancel: cancel.clone(),
        image_collector: Some(Arc::new(RegistryImageCollector::http(
            remote.plain_http,
            overrides.clone(),
        ))),
        registry_overrides: overrides,
        ..BuildOptions::default()
    };
    if let Some(arch) = &args.architecture {
        build.architecture.clone_from(arch);
    }
    let opts = CreateOptions {
        build,
        output_dir: args.output_dir.clone(),
        max_package_size_mb: args.max_package_size_mb,
        cache_dir: Some(args.cache_dir.clone()),
        remote,
        fetcher: None,
    };

    let result = with_spinner(
        json,
        "creating package...",
        "package created",
        "create failed",
        || create(&args.definition_dir, &opts),
    )?;

    if json {
        let payload = serde_json::json!({
            "archive": result.archive,
            "aggregate_checksum": result.aggregate_checksum.as_str(),
            "components": result.components_packed,
            "images": result.images,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "{} {}",
            bold(&result.archive.display().to_string()),
            dim(&format!("({})", display_size(file_size(&result.archive))))
        );
        println!("aggregate checksum: {}", result.aggregate_checksum);
        println!(
            "components: {}",
            if result.components_packed.is_empty() {
                "(none with content)".to_owned()
            } else {
                result.components_packed.join(", ")
            }
        );
        if !result.images.is_empty() {
            println!("images:     {}", result.images.len());
        }
    }
    Ok(EXIT_SUCCESS)
}

fn load_signer(path: &Path) -> Result<Arc<dyn PackageSigner + Send + Sync>, String> {
    let pair = SigningKeyPair::load(path)
        .map_err(|e| format!("failed to load signing key {}: {e}", path.display()))?;
    Ok(Arc::new(pair))
}
