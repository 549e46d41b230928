use crate::{io_at, RemoteError, DEFAULT_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Registry base, e.g. `oci://registry.example.com/packages`.
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Talk to the registry over plain HTTP instead of HTTPS.
    #[serde(default)]
    pub plain_http: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            plain_http: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_plain_http(mut self, plain_http: bool) -> Self {
        self.plain_http = plain_http;
        self
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path).map_err(io_at(path))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid remote config: {e}")))?;
        if config.concurrency == 0 {
            return Err(RemoteError::Config(
                "concurrency must be at least 1".to_owned(),
            ));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_at(path))?;
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/airgap/remote.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");

        let config = RemoteConfig::new("oci://registry.example.com/packages")
            .with_token("secret123")
            .with_plain_http(true);
        config.save(&path).unwrap();

        let loaded = RemoteConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.concurrency, 3);
    }

    #[test]
    fn config_strips_trailing_slash() {
        let config = RemoteConfig::new("oci://example.com/");
        assert_eq!(config.url, "oci://example.com");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, r#"{"url":"oci://r.local"}"#).unwrap();
        let loaded = RemoteConfig::load(&path).unwrap();
        assert!(!loaded.plain_http);
        assert_eq!(loaded.concurrency, DEFAULT_CONCURRENCY);
        assert!(loaded.auth_token.is_none());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, r#"{"url":"oci://r.local","concurrency":0}"#).unwrap();
        assert!(matches!(
            RemoteConfig::load(&path),
            Err(RemoteError::Config(_))
        ));
    }
}
