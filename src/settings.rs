//! Sampling settings sent with every completion request

use serde::{Deserialize, Serialize};

/// Sampling configuration owned by a session
///
/// Field names match the OpenAI chat completions request body, so the struct
/// serializes straight into the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Model ID
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 1000,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

impl SessionSettings {
    /// Copy these settings with a per-message override applied
    pub fn with_override(&self, overrides: &SettingsOverride) -> Self {
        let mut settings = self.clone();
        if let Some(temperature) = overrides.temperature {
            settings.temperature = temperature;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            settings.max_tokens = max_tokens;
        }
        settings
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl std::fmt::Display for SessionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "model={} temperature={} max_tokens={} top_p={} frequency_penalty={} presence_penalty={}",
            self.model,
            self.temperature,
            self.max_tokens,
            self.top_p,
            self.frequency_penalty,
            self.presence_penalty
        )
    }
}

/// Partial settings a template applies on top of the session defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SettingsOverride {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl SettingsOverride {
    pub const NONE: Self = Self {
        temperature: None,
        max_tokens: None,
    };

    pub const fn temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: None,
        }
    }

    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_tokens.is_none()
    }
}

impl std::fmt::Display for SettingsOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "session defaults");
        }
        let mut parts = Vec::new();
        if let Some(t) = self.temperature {
            parts.push(format!("temperature={}", t));
        }
        if let Some(m) = self.max_tokens {
            parts.push(format!("max_tokens={}", m));
        }
        write!(f, "{}", parts.join(" "))
    }
}
