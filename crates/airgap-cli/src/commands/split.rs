use super::{display_size, json_pretty, EXIT_SUCCESS};
use airgap_store::{part_path, split_file};
use std::path::Path;

const MEGABYTE: u64 = 1000 * 1000;

pub fn run(file: &Path, chunk_size_mb: u64, json: bool) -> Result<u8, String> {
    let meta = split_file(file, chunk_size_mb.saturating_mul(MEGABYTE)).map_err(|e| e.to_string())?;
    let header = part_path(file, 0);
    if json {
        let payload = serde_json::json!({
            "header": header,
            "parts": meta.count,
            "bytes": meta.bytes,
            "sha256": meta.sha256_sum,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "split {} ({}) into {} parts",
            file.display(),
            display_size(meta.bytes),
            meta.count
        );
        println!("header: {}", header.display());
    }
    Ok(EXIT_SUCCESS)
}
