use super::{json_pretty, EXIT_SUCCESS};
use airgap_store::SigningKeyPair;
use std::path::Path;

pub fn run(dir: &Path, name: &str, force: bool, json: bool) -> Result<u8, String> {
    let private = dir.join(format!("{name}.key"));
    let public = dir.join(format!("{name}.pub"));
    if !force {
        for path in [&private, &public] {
            if path.exists() {
                return Err(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
        }
    }
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create {}: {e}", dir.display()))?;

    let pair = SigningKeyPair::generate();
    pair.save(&private, &public).map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "key_id": pair.key_id(),
            "private_key": private,
            "public_key": public,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("generated key {}", pair.key_id());
        println!("private: {}", private.display());
        println!("public:  {}", public.display());
    }
    Ok(EXIT_SUCCESS)
}
