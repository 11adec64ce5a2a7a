//! Prompt Relay - a single-turn chat front-end for hosted LLMs
//!
//! This crate provides:
//! - Keyword routing of a user message to one of several prompt templates
//! - Streaming relay of the completion, token by token, to an output sink
//! - CLI/REPL interface with SQLite trace history

pub mod auth;
pub mod config;
pub mod prompt;
pub mod provider;
pub mod relay;
pub mod selector;
pub mod session;
pub mod settings;
pub mod telemetry;
pub mod templates;

pub use auth::AuthConfig;
pub use config::Config;
pub use prompt::{Prompt, PromptMessage, Role};
pub use provider::{CompletionService, ProviderClient, ProviderConfig, ProviderError, StreamDelta};
pub use relay::{StdoutSink, TokenSink};
pub use selector::{select, Selection};
pub use session::Session;
pub use settings::{SessionSettings, SettingsOverride};
pub use telemetry::Telemetry;
pub use templates::{TemplateKind, Templates};
