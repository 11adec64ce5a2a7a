//! LLM Provider layer
//!
//! OpenAI-compatible provider that handles streaming chat completions.
//! Supports any API implementing the OpenAI chat completions spec.

mod client;
mod config;
mod error;
mod service;

pub use client::*;
pub use config::*;
pub use error::*;
pub use service::*;
