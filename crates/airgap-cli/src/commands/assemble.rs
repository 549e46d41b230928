use super::{display_size, json_pretty, EXIT_SUCCESS};
use airgap_store::{reassemble, split_base};
use std::path::{Path, PathBuf};

/// Reassemble a split file and check it against its `.part000` header.
pub fn run(source: &Path, output: Option<&Path>, json: bool) -> Result<u8, String> {
    let dest: PathBuf = match output {
        Some(path) => path.to_path_buf(),
        None => split_base(source)
            .ok_or_else(|| format!("{} is not a .part000 header; pass --output", source.display()))?,
    };
    let meta = reassemble(source, &dest).map_err(|e| e.to_string())?;
    if let Err(e) = meta.verify(&dest) {
        let _ = std::fs::remove_file(&dest);
        return Err(e.to_string());
    }

    if json {
        let payload = serde_json::json!({
            "output": dest,
            "parts": meta.count,
            "bytes": meta.bytes,
            "sha256": meta.sha256_sum,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "assembled {} parts into {} ({}), sha256 verified",
            meta.count,
            dest.display(),
            display_size(meta.bytes)
        );
    }
    Ok(EXIT_SUCCESS)
}
