use super::{bold, dim, json_pretty, remote_config, LoadArgs, EXIT_SUCCESS};
use airgap_core::{load_from_source, SourceOptions};
use airgap_store::{PackageLayout, SIGNATURE};
use std::path::Path;

pub fn run(
    source: &str,
    load: &LoadArgs,
    plain_http: bool,
    list_files: bool,
    sbom_out: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let opts = SourceOptions {
        load: load.load_options(),
        remote: remote_config(plain_http)?,
        ..SourceOptions::default()
    };
    let layout = load_from_source(source, &opts).map_err(|e| e.to_string())?;

    let outcome = report(&layout, list_files, sbom_out, json);
    layout.cleanup().map_err(|e| e.to_string())?;
    outcome
}

fn report(
    layout: &PackageLayout,
    list_files: bool,
    sbom_out: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let pkg = layout.pkg();
    let signed = layout.dir().join(SIGNATURE).is_file();
    let sbom = match sbom_out {
        Some(dest) => Some(layout.get_sbom(dest).map_err(|e| e.to_string())?),
        None => None,
    };
    let files: Vec<String> = if list_files {
        layout
            .files()
            .map_err(|e| e.to_string())?
            .into_values()
            .collect()
    } else {
        Vec::new()
    };

    if json {
        let components: Vec<_> = pkg
            .components
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "required": c.is_required(),
                    "packed": layout.component_tarball(&c.name).is_file(),
                    "images": c.images,
                })
            })
            .collect();
        let payload = serde_json::json!({
            "name": pkg.metadata.name,
            "version": pkg.metadata.version,
            "architecture": pkg.architecture(),
            "file_name": layout.file_name(),
            "aggregate_checksum": pkg.metadata.aggregate_checksum,
            "signed": signed,
            "partial": layout.is_partial(),
            "sbom": layout.contains_sbom(),
            "build": pkg.build,
            "components": components,
            "warnings": layout.warnings(),
            "files": if list_files { Some(&files) } else { None },
            "sbom_dir": sbom,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("name:          {}", bold(&pkg.metadata.name));
    if !pkg.metadata.version.is_empty() {
        println!("version:       {}", pkg.metadata.version);
    }
    println!("architecture:  {}", pkg.architecture());
    if !pkg.build.flavor.is_empty() {
        println!("flavor:        {}", pkg.build.flavor);
    }
    println!("checksum:      {}", pkg.metadata.aggregate_checksum);
    println!("signed:        {signed}");
    if layout.is_partial() {
        println!("partial:       {}", dim("yes (some components were not transferred)"));
    }
    if !pkg.build.timestamp.is_empty() {
        println!(
            "built:         {} by {}@{} (airgap {})",
            pkg.build.timestamp, pkg.build.user, pkg.build.terminal, pkg.build.version
        );
    }
    println!("components:");
    for c in &pkg.components {
        let mut notes = Vec::new();
        if c.is_required() {
            notes.push("required".to_owned());
        }
        if !c.images.is_empty() {
            notes.push(format!("{} images", c.images.len()));
        }
        if !layout.component_tarball(&c.name).is_file() {
            notes.push("no content".to_owned());
        }
        if notes.is_empty() {
            println!("  - {}", c.name);
        } else {
            println!("  - {} {}", c.name, dim(&format!("({})", notes.join(", "))));
        }
    }
    for warning in layout.warnings() {
        println!("warning: {warning}");
    }
    if list_files {
        println!("files:");
        for file in &files {
            println!("  {file}");
        }
    }
    if let Some(dir) = sbom {
        println!("SBOMs extracted to {}", dir.display());
    }
    Ok(EXIT_SUCCESS)
}
