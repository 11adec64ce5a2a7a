//! Configuration for prompt-relay

use crate::auth::AuthConfig;
use crate::provider::ProviderConfig;
use crate::settings::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Completion service
    pub provider: ProviderConfig,

    /// Session default sampling settings
    pub settings: SessionSettings,

    /// Telemetry settings
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Directory for log files and the trace database
    pub log_dir: PathBuf,

    /// Enable verbose logging
    pub verbose: bool,

    /// OTLP collector endpoint (e.g., http://localhost:4318)
    pub otel_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_dir: default_data_dir(),
            verbose: false,
            otel_endpoint: None,
        }
    }
}

/// Get the default data directory
/// Uses XDG_DATA_HOME if set, otherwise ~/.prompt_relay
pub fn default_data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("prompt_relay")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".prompt_relay")
    } else {
        PathBuf::from(".prompt_relay")
    }
}

impl Config {
    /// Load a YAML config file. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Point at a custom OpenAI-compatible endpoint (LM Studio, vLLM, ...)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.provider.base_url = base_url.into();
        self
    }

    /// Set API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.provider.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.settings.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.settings.max_tokens = max_tokens;
        self
    }

    /// Set verbose logging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.telemetry.verbose = verbose;
        self
    }

    /// Set log directory
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.telemetry.log_dir = log_dir;
        self
    }

    pub fn with_otel_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.telemetry.otel_endpoint = Some(endpoint.into());
        self
    }

    /// Take the provider's base_url from auth.json when one is configured there
    pub fn with_auth(mut self, auth: &AuthConfig) -> Self {
        if let Some(base_url) = auth.base_url(&self.provider.name) {
            self.provider.base_url = base_url.to_string();
        }
        self
    }
}
