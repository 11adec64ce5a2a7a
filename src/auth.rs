//! Authentication configuration loading
//!
//! Loads API keys and provider settings from:
//! - $XDG_DATA_HOME/prompt_relay/auth.json (preferred)
//! - ~/.local/share/prompt_relay/auth.json (fallback)
//! - ~/.prompt_relay/auth.json (legacy)

use crate::provider::{ProviderConfig, ProviderError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Authentication entry for a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthEntry {
    /// Simple API key authentication
    #[serde(rename = "api")]
    Api {
        key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
}

impl AuthEntry {
    /// Get the API key
    pub fn api_key(&self) -> &str {
        match self {
            AuthEntry::Api { key, .. } => key,
        }
    }

    /// Get the base URL if configured
    pub fn base_url(&self) -> Option<&str> {
        match self {
            AuthEntry::Api { base_url, .. } => base_url.as_deref(),
        }
    }
}

/// Authentication configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthConfig {
    pub providers: HashMap<String, AuthEntry>,
}

impl AuthConfig {
    /// Load auth config from the default location
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load auth config from a specific path, empty if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: AuthConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
            let path = PathBuf::from(xdg_data).join("prompt_relay/auth.json");
            if path.exists() {
                return path;
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            let path = PathBuf::from(&home).join(".local/share/prompt_relay/auth.json");
            if path.exists() {
                return path;
            }

            let legacy_path = PathBuf::from(&home).join(".prompt_relay/auth.json");
            if legacy_path.exists() {
                return legacy_path;
            }

            // Default to XDG location even if it doesn't exist yet
            return PathBuf::from(home).join(".local/share/prompt_relay/auth.json");
        }

        PathBuf::from(".prompt_relay/auth.json")
    }

    /// Get auth entry for a provider, matched case-insensitively
    pub fn get(&self, provider: &str) -> Option<&AuthEntry> {
        self.providers.get(provider).or_else(|| {
            let lowercase = provider.to_lowercase();
            self.providers
                .iter()
                .find(|(name, _)| name.to_lowercase() == lowercase)
                .map(|(_, entry)| entry)
        })
    }

    /// Get API key for a provider
    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.get(provider).map(|e| e.api_key())
    }

    /// Get base URL for a provider
    pub fn base_url(&self, provider: &str) -> Option<&str> {
        self.get(provider).and_then(|e| e.base_url())
    }
}

/// Resolve the API key for a provider.
///
/// Priority: explicit key in the config > environment (after loading `.env`) > auth.json
pub fn resolve_api_key(config: &ProviderConfig) -> Result<String, ProviderError> {
    if let Some(key) = &config.api_key {
        return Ok(key.clone());
    }

    let _ = dotenvy::dotenv();
    if let Ok(key) = std::env::var(&config.api_key_env) {
        if !key.is_empty() {
            return Ok(key);
        }
    }

    match AuthConfig::load() {
        Ok(auth) => {
            if let Some(key) = auth.api_key(&config.name) {
                return Ok(key.to_string());
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read auth.json");
        }
    }

    Err(ProviderError::MissingApiKey {
        env: config.api_key_env.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_config() {
        let json = r#"{
            "openai": {"type": "api", "key": "sk-xxx"},
            "lm-studio": {"type": "api", "key": "lm-studio", "base_url": "http://localhost:1234/v1"}
        }"#;

        let config: AuthConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.api_key("openai"), Some("sk-xxx"));
        assert_eq!(config.api_key("OpenAI"), Some("sk-xxx"));
        assert_eq!(config.base_url("openai"), None);

        assert_eq!(config.api_key("lm-studio"), Some("lm-studio"));
        assert_eq!(
            config.base_url("lm-studio"),
            Some("http://localhost:1234/v1")
        );
    }

    #[test]
    fn test_load_from_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuthConfig::load_from(&dir.path().join("auth.json")).unwrap();
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_explicit_key_wins() {
        let config = ProviderConfig::custom("nowhere", "http://localhost", "PROMPT_RELAY_UNSET_KEY")
            .with_api_key("sk-explicit");
        assert_eq!(resolve_api_key(&config).unwrap(), "sk-explicit");
    }
}
