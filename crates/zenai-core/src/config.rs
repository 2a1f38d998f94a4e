use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};
use tracing::{info, warn};

use crate::error::ConfigError;

pub const DEFAULT_API_VERSION: &str = "2025-04-01-preview";
pub const DEFAULT_MODEL_NAME: &str = "gpt-4";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub api_endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub model_name: String,
    pub api_version: String,
    pub max_tokens: u32,
    /// Whole-request timeout. `None` leaves requests unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            api_key: String::new(),
            deployment: String::new(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Checks the fields a turn cannot be sent without.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.api_endpoint.trim().is_empty() {
            missing.push("apiEndpoint");
        }
        if self.api_key.trim().is_empty() {
            missing.push("apiKey");
        }
        if self.deployment.trim().is_empty() {
            missing.push("deployment");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingFields(missing))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.api_endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Trims every field and fills the derived defaults, the way the settings form saves.
    pub fn normalized(mut self) -> Self {
        self.api_endpoint = self.api_endpoint.trim().to_string();
        self.api_key = self.api_key.trim().to_string();
        self.deployment = self.deployment.trim().to_string();
        self.model_name = self.model_name.trim().to_string();
        self.api_version = self.api_version.trim().to_string();

        if self.model_name.is_empty() {
            self.model_name = self.deployment.clone();
        }
        if self.api_version.is_empty() {
            self.api_version = DEFAULT_API_VERSION.to_string();
        }
        if self.max_tokens == 0 {
            self.max_tokens = DEFAULT_MAX_TOKENS;
        }
        self
    }

    /// Environment variables win over stored values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = non_empty("ZENAI_API_ENDPOINT") {
            self.api_endpoint = endpoint;
        }
        if let Some(key) = non_empty("ZENAI_API_KEY") {
            self.api_key = key;
        }
        if let Some(deployment) = non_empty("ZENAI_DEPLOYMENT") {
            self.deployment = deployment;
        }
        self
    }

    /// API key with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let visible: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), visible)
    }
}

/// Durable settings storage. The chat core only ever reads from it.
pub trait ConfigStore: Send + Sync {
    fn get(&self) -> Result<Config>;
    fn set(&self, config: &Config) -> Result<()>;
}

/// JSON file store, by default at `<config_dir>/zenai/config.json`.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("zenai").join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self) -> Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    fn set(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, config_content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A stored config with an API key already exists.
    Existing,
    /// The private config file was imported into the store.
    Imported,
    /// Nothing usable was found; the user has to run the settings surface.
    NeedsSetup,
}

/// First-run setup: seed the store from a private config file when no key is stored yet.
pub fn bootstrap(store: &dyn ConfigStore, private_path: Option<&Path>) -> Result<BootstrapOutcome> {
    let stored = store.get()?;
    if !stored.api_key.trim().is_empty() {
        return Ok(BootstrapOutcome::Existing);
    }

    let Some(path) = private_path.filter(|p| p.exists()) else {
        return Ok(BootstrapOutcome::NeedsSetup);
    };

    let merged = match fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|text| overlay(&stored, &text))
    {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable private config");
            return Ok(BootstrapOutcome::NeedsSetup);
        }
    };

    store.set(&merged.normalized())?;
    info!(path = %path.display(), "imported private config");
    Ok(BootstrapOutcome::Imported)
}

/// Applies only the keys present in `private_json` on top of `base`.
fn overlay(base: &Config, private_json: &str) -> Result<Config> {
    let fields: serde_json::Map<String, serde_json::Value> = serde_json::from_str(private_json)?;
    let mut merged = serde_json::to_value(base)?;
    if let serde_json::Value::Object(target) = &mut merged {
        target.extend(fields);
    }
    Ok(serde_json::from_value(merged)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid() -> Config {
        Config {
            api_endpoint: "https://example.openai.azure.com/".to_string(),
            api_key: "secret".to_string(),
            deployment: "gpt4o".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_validate_requires_three_fields() {
        assert!(valid().validate().is_ok());

        let config = Config {
            api_endpoint: String::new(),
            api_key: "x".to_string(),
            deployment: "x".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingFields(vec!["apiEndpoint"]))
        );

        assert_eq!(
            Config::default().validate(),
            Err(ConfigError::MissingFields(vec!["apiEndpoint", "apiKey", "deployment"]))
        );
    }

    #[test]
    fn test_whitespace_only_field_is_missing() {
        let config = Config {
            api_key: "   ".to_string(),
            ..valid()
        };
        assert!(!config.is_valid());
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        assert_eq!(
            valid().chat_completions_url(),
            "https://example.openai.azure.com/openai/deployments/gpt4o/chat/completions?api-version=2025-04-01-preview"
        );
    }

    #[test]
    fn test_normalized_fills_defaults() {
        let config = Config {
            api_endpoint: "  https://x  ".to_string(),
            deployment: " dep ".to_string(),
            model_name: String::new(),
            api_version: " ".to_string(),
            ..Config::default()
        }
        .normalized();

        assert_eq!(config.api_endpoint, "https://x");
        assert_eq!(config.model_name, "dep");
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
    }

    #[test]
    fn test_camel_case_file_format() {
        let config: Config =
            serde_json::from_str(r#"{"apiEndpoint":"https://x","apiKey":"k","deployment":"d"}"#)
                .unwrap();
        assert_eq!(config.api_endpoint, "https://x");
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_overrides_ignore_empty_values() {
        let config = valid().with_overrides_from(|key| match key {
            "ZENAI_API_KEY" => Some("from-env".to_string()),
            "ZENAI_DEPLOYMENT" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api_key, "from-env");
        assert_eq!(config.deployment, "gpt4o");
    }

    #[test]
    fn test_masked_api_key() {
        let config = Config {
            api_key: "abcdef123".to_string(),
            ..Config::default()
        };
        assert_eq!(config.masked_api_key(), "*****f123");
    }

    #[test]
    fn test_file_store_missing_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("config.json"));
        assert_eq!(store.get().unwrap(), Config::default());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("nested").join("config.json"));
        store.set(&valid()).unwrap();
        assert_eq!(store.get().unwrap(), valid());
    }

    #[test]
    fn test_bootstrap_imports_private_config_once() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("config.json"));
        let private = dir.path().join("config.private.json");
        fs::write(
            &private,
            r#"{"apiEndpoint":"https://p","apiKey":"pk","deployment":"pd","modelName":""}"#,
        )
        .unwrap();

        assert_eq!(bootstrap(&store, Some(&private)).unwrap(), BootstrapOutcome::Imported);
        let stored = store.get().unwrap();
        assert_eq!(stored.api_key, "pk");
        assert_eq!(stored.model_name, "pd");

        assert_eq!(bootstrap(&store, Some(&private)).unwrap(), BootstrapOutcome::Existing);
    }

    #[test]
    fn test_bootstrap_keeps_stored_fields_missing_from_private_config() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("config.json"));
        store
            .set(&Config {
                api_endpoint: "https://stored".to_string(),
                deployment: "dep".to_string(),
                request_timeout_secs: Some(30),
                ..Config::default()
            })
            .unwrap();
        let private = dir.path().join("config.private.json");
        fs::write(&private, r#"{"apiKey":"pk"}"#).unwrap();

        assert_eq!(bootstrap(&store, Some(&private)).unwrap(), BootstrapOutcome::Imported);
        let stored = store.get().unwrap();
        assert_eq!(stored.api_endpoint, "https://stored");
        assert_eq!(stored.deployment, "dep");
        assert_eq!(stored.api_key, "pk");
        assert_eq!(stored.request_timeout_secs, Some(30));
        assert!(stored.is_valid());
    }

    #[test]
    fn test_bootstrap_ignores_non_object_private_config() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("config.json"));
        let private = dir.path().join("config.private.json");
        fs::write(&private, "[1, 2]").unwrap();

        assert_eq!(bootstrap(&store, Some(&private)).unwrap(), BootstrapOutcome::NeedsSetup);
        assert_eq!(store.get().unwrap(), Config::default());
    }

    #[test]
    fn test_bootstrap_without_private_config() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("config.json"));
        let missing = dir.path().join("absent.json");
        assert_eq!(bootstrap(&store, Some(&missing)).unwrap(), BootstrapOutcome::NeedsSetup);
        assert_eq!(bootstrap(&store, None).unwrap(), BootstrapOutcome::NeedsSetup);
    }
}
