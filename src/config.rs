use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::scanner::SUPPORTED_EXTENSIONS;

/// Chat-completions endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api.moonshot.cn/v1/chat/completions";

/// Shortest API key accepted by [`ApiConfig::validate`].
pub const MIN_API_KEY_LEN: usize = 10;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "PICSCRIBE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    /// Blank means [`DEFAULT_ENDPOINT`].
    #[serde(default)]
    pub endpoint_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "moonshot-v1-8k-vision-preview".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint_url: String::new(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API key must be at least {} characters", MIN_API_KEY_LEN)]
    ApiKeyTooShort,

    #[error("endpoint URL must start with http:// or https://")]
    InvalidEndpoint,

    #[error("import extension '{0}' is not a supported image type")]
    UnsupportedExtension(String),
}

impl ApiConfig {
    pub fn effective_endpoint(&self) -> &str {
        let endpoint = self.endpoint_url.trim();
        if endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            endpoint
        }
    }

    /// The configured key, if it is non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Check the settings a user typed in. A missing key is allowed here;
    /// the provider reports it when it is first needed.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some(key) = self.api_key() {
            if key.chars().count() < MIN_API_KEY_LEN {
                return Err(ConfigError::ApiKeyTooShort);
            }
        }

        let endpoint = self.endpoint_url.trim();
        if !endpoint.is_empty() && !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Extensions accepted when importing a folder, without the dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub recursive: bool,
}

fn default_extensions() -> Vec<String> {
    SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            recursive: false,
        }
    }
}

fn is_supported(extension: &str) -> bool {
    let extension = extension.trim().trim_start_matches('.');
    SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(extension))
}

impl ImportConfig {
    /// Every configured extension must be one the catalog can import.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match self.extensions.iter().find(|e| !is_supported(e)) {
            Some(bad) => Err(ConfigError::UnsupportedExtension(bad.clone())),
            None => Ok(()),
        }
    }

    /// The configured extensions that the catalog accepts.
    pub fn effective_extensions(&self) -> Vec<String> {
        self.extensions.iter().filter(|e| is_supported(e)).cloned().collect()
    }
}

impl Config {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.api.validate()?;
        self.import.validate()
    }

    /// Load from `PICSCRIBE_CONFIG` or the user config directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing the defaults there if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("picscribe")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.effective_endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.api.model, "moonshot-v1-8k-vision-preview");
        assert_eq!(config.api.timeout_secs, 120);
        assert!(config.api.api_key().is_none());
        assert_eq!(config.import.extensions, vec!["jpg", "jpeg", "png", "gif", "webp", "bmp"]);
        assert!(!config.import.recursive);
    }

    #[test]
    fn test_blank_endpoint_means_default() {
        let api = ApiConfig {
            endpoint_url: "   ".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(api.effective_endpoint(), DEFAULT_ENDPOINT);
        assert!(api.validate().is_ok());

        let api = ApiConfig {
            endpoint_url: "http://localhost:1234/v1/chat/completions".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(api.effective_endpoint(), "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn test_validate_api_key_length() {
        let mut api = ApiConfig {
            api_key: Some("short".to_string()),
            ..ApiConfig::default()
        };
        assert_eq!(api.validate(), Err(ConfigError::ApiKeyTooShort));

        api.api_key = Some("sk-0123456789".to_string());
        assert!(api.validate().is_ok());

        api.api_key = Some("   ".to_string());
        assert!(api.validate().is_ok());
        assert!(api.api_key().is_none());
    }

    #[test]
    fn test_validate_endpoint_scheme() {
        let api = ApiConfig {
            endpoint_url: "ftp://example.com".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(api.validate(), Err(ConfigError::InvalidEndpoint));
    }

    #[test]
    fn test_import_extensions_limited_to_supported() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.import.extensions = vec!["JPG".to_string(), ".png".to_string(), "tiff".to_string()];
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsupportedExtension("tiff".to_string()))
        );
        assert_eq!(config.import.effective_extensions(), vec!["JPG", ".png"]);
    }

    #[test]
    fn test_load_writes_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.api.model, default_model());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\napi_key = \"sk-abcdefghijkl\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api.api_key(), Some("sk-abcdefghijkl"));
        assert_eq!(config.api.timeout_secs, 120);
        assert_eq!(config.import.extensions.len(), 6);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.api.endpoint_url = "https://example.com/v1/chat/completions".to_string();
        config.import.recursive = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api.endpoint_url, config.api.endpoint_url);
        assert!(loaded.import.recursive);
    }
}
