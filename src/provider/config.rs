//! Provider configuration

use serde::{Deserialize, Serialize};

/// Configuration for an OpenAI-compatible completion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Display name for the provider, also the auth.json lookup key
    pub name: String,
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,
    /// Environment variable name for the API key
    pub api_key_env: String,
    /// Explicit API key, takes priority over the environment and auth.json
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::openai()
    }
}

impl ProviderConfig {
    /// Create an OpenAI provider config
    pub fn openai() -> Self {
        Self {
            name: "OpenAI".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
        }
    }

    /// Create a custom provider config (e.g., LM Studio, vLLM)
    pub fn custom(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key_env: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Endpoint for streaming chat completions
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_trims_slash() {
        let config = ProviderConfig::custom("LM Studio", "http://localhost:1234/v1/", "LM_KEY");
        assert_eq!(config.completions_url(), "http://localhost:1234/v1/chat/completions");
        assert_eq!(
            ProviderConfig::openai().completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = ProviderConfig::openai().with_api_key("sk-secret");
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("sk-secret"));
    }
}
