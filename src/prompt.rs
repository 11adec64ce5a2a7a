//! The prompt built for a single request/response cycle

use crate::selector::Selection;
use crate::settings::SessionSettings;
use crate::templates::{TemplateKind, Templates};
use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
}

/// One message of a prompt: the raw template and its substituted text
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub template: String,
    pub formatted: String,
}

impl PromptMessage {
    pub fn to_request(&self) -> Result<ChatCompletionRequestMessage> {
        let message = match self.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(self.formatted.clone())
                .build()?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(self.formatted.clone())
                .build()?
                .into(),
        };
        Ok(message)
    }
}

/// System message, routed user message and the settings used for the call.
///
/// `completion` is filled in once the stream finishes.
#[derive(Debug, Clone, Serialize)]
pub struct Prompt {
    pub template_kind: TemplateKind,
    pub messages: Vec<PromptMessage>,
    pub inputs: BTreeMap<String, String>,
    pub settings: SessionSettings,
    pub completion: Option<String>,
}

impl Prompt {
    pub fn build(
        templates: &Templates,
        selection: &Selection,
        input: &str,
        settings: SessionSettings,
    ) -> Result<Self> {
        let system = templates.system_prompt();
        let messages = vec![
            PromptMessage {
                role: Role::System,
                template: system.to_string(),
                formatted: system.to_string(),
            },
            PromptMessage {
                role: Role::User,
                template: selection.kind.source().to_string(),
                formatted: templates.render(selection.kind, input)?,
            },
        ];

        let mut inputs = BTreeMap::new();
        inputs.insert("input".to_string(), input.to_string());

        Ok(Self {
            template_kind: selection.kind,
            messages,
            inputs,
            settings,
            completion: None,
        })
    }

    /// Convert to LLM request messages
    pub fn to_request(&self) -> Result<Vec<ChatCompletionRequestMessage>> {
        self.messages.iter().map(PromptMessage::to_request).collect()
    }

    /// The substituted user message
    pub fn user_text(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.formatted.as_str())
            .unwrap_or_default()
    }
}
