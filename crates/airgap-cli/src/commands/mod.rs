pub mod assemble;
pub mod create;
pub mod generate;
pub mod inspect;
pub mod keygen;
pub mod publish;
pub mod pull;
pub mod split;

use airgap_remote::reference::OCI_SCHEME;
use airgap_remote::{HttpRegistry, LayerSelector, RemoteConfig};
use airgap_schema::ByName;
use airgap_store::LoadOptions;
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DEFINITION_ERROR: u8 = 2;
pub const EXIT_INTEGRITY_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// A spinner, or nothing when output is machine-readable.
pub fn spinner(msg: &str, json: bool) -> Option<ProgressBar> {
    if json {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    Some(pb)
}

fn finish(pb: Option<&ProgressBar>, msg: String) {
    if let Some(pb) = pb {
        if let Ok(style) = ProgressStyle::with_template("{msg}") {
            pb.set_style(style);
        }
        pb.finish_with_message(msg);
    }
}

pub fn spin_ok(pb: Option<&ProgressBar>, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: Option<&ProgressBar>, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

/// Run `op` behind a spinner, closing it with `ok` or `failed`.
pub fn with_spinner<T, E: std::fmt::Display>(
    json: bool,
    msg: &str,
    ok: &str,
    failed: &str,
    op: impl FnOnce() -> Result<T, E>,
) -> Result<T, String> {
    let pb = spinner(msg, json);
    match op() {
        Ok(v) => {
            spin_ok(pb.as_ref(), ok);
            Ok(v)
        }
        Err(e) => {
            spin_fail(pb.as_ref(), failed);
            Err(e.to_string())
        }
    }
}

pub fn dim(text: &str) -> String {
    console::Style::new().dim().apply_to(text).to_string()
}

pub fn bold(text: &str) -> String {
    console::Style::new().bold().apply_to(text).to_string()
}

/// Map an error message to the process exit code.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("schema error:")
        || msg.starts_with("import error:")
        || msg.starts_with("package validation failed")
    {
        EXIT_DEFINITION_ERROR
    } else if msg.contains("integrity check failed")
        || msg.contains("signature check failed")
        || msg.contains("split transport error")
    {
        EXIT_INTEGRITY_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// Which layers a pull retrieves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Layers {
    All,
    Metadata,
    Components,
    Images,
    Sbom,
}

impl From<Layers> for LayerSelector {
    fn from(layers: Layers) -> Self {
        match layers {
            Layers::All => Self::All,
            Layers::Metadata => Self::Metadata,
            Layers::Components => Self::Components,
            Layers::Images => Self::Images,
            Layers::Sbom => Self::Sbom,
        }
    }
}

/// Flags shared by every command that reads a package.
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    pub key: Option<PathBuf>,
    pub skip_signature_validation: bool,
    pub components: Vec<String>,
    pub partial: bool,
}

impl LoadArgs {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            public_key_path: self.key.clone(),
            skip_signature_validation: self.skip_signature_validation,
            is_partial: self.partial,
            filter: if self.components.is_empty() {
                None
            } else {
                Some(Arc::new(ByName::new(self.components.iter().cloned())))
            },
        }
    }
}

/// Registry settings: `~/.config/airgap/remote.json` when present, then flags.
pub fn remote_config(plain_http: bool) -> Result<RemoteConfig, String> {
    let path = airgap_remote::config::default_config_path().map_err(|e| e.to_string())?;
    let config = if path.is_file() {
        debug!("using remote config {}", path.display());
        RemoteConfig::load(&path).map_err(|e| e.to_string())?
    } else {
        RemoteConfig::default()
    };
    Ok(if plain_http {
        config.with_plain_http(true)
    } else {
        config
    })
}

/// Client for the registry named by `oci://<registry>/<namespace>`.
pub fn registry_for_base(base: &str, config: &RemoteConfig) -> Result<HttpRegistry, String> {
    let host = base
        .strip_prefix(OCI_SCHEME)
        .and_then(|rest| rest.split('/').next())
        .filter(|host| !host.is_empty())
        .ok_or_else(|| format!("'{base}' is not an oci://<registry>/<namespace> URL"))?;
    let registry = HttpRegistry::new(host, config.plain_http);
    Ok(match &config.auth_token {
        Some(token) => registry.with_token(token),
        None => registry,
    })
}

/// Parse repeated `host=mirror` flags.
pub fn parse_overrides(raw: &[String]) -> Result<BTreeMap<String, String>, String> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .filter(|(from, to)| !from.is_empty() && !to.is_empty())
                .map(|(from, to)| (from.to_owned(), to.to_owned()))
                .ok_or_else(|| format!("invalid registry override '{entry}', expected host=mirror"))
        })
        .collect()
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn display_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
