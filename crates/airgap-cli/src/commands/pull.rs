use super::{
    display_size, file_size, json_pretty, remote_config, with_spinner, Layers, LoadArgs,
    EXIT_SUCCESS,
};
use airgap_core::{pull, SourceOptions};
use airgap_remote::{HttpRegistry, PackageReference};
use std::path::Path;

pub fn run(
    reference: &str,
    output_dir: &Path,
    architecture: Option<&str>,
    layers: Layers,
    load: &LoadArgs,
    plain_http: bool,
    json: bool,
) -> Result<u8, String> {
    let reference = PackageReference::parse(reference).map_err(|e| e.to_string())?;
    let remote = remote_config(plain_http)?;
    let backend = HttpRegistry::for_reference(&reference, &remote);
    let mut opts = SourceOptions {
        load: load.load_options(),
        remote,
        selector: layers.into(),
        ..SourceOptions::default()
    };
    if let Some(arch) = architecture {
        arch.clone_into(&mut opts.architecture);
    }

    let archive = with_spinner(
        json,
        &format!("pulling {reference}..."),
        "package pulled",
        "pull failed",
        || pull(&backend, &reference, output_dir, &opts),
    )?;

    if json {
        let payload = serde_json::json!({
            "reference": reference.to_string(),
            "archive": archive,
            "bytes": file_size(&archive),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "pulled {reference} to {} ({})",
            archive.display(),
            display_size(file_size(&archive))
        );
    }
    Ok(EXIT_SUCCESS)
}
