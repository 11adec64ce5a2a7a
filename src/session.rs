//! A chat session: routes each message to a template and relays the answer
//!
//! Every message is handled on its own. The session keeps only its default
//! settings, which each message clones and adjusts.

use crate::prompt::Prompt;
use crate::provider::{CompletionService, ProviderError};
use crate::relay::{relay, TokenSink};
use crate::selector::{self, Selection};
use crate::settings::SessionSettings;
use crate::telemetry::{Telemetry, TraceBuilder, TraceGuard};
use crate::templates::Templates;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Session {
    settings: SessionSettings,
    templates: Templates,
    service: Arc<dyn CompletionService>,
    telemetry: Option<Arc<Telemetry>>,
}

impl Session {
    /// Start a session with its default settings
    pub fn start(settings: SessionSettings, service: Arc<dyn CompletionService>) -> Result<Self> {
        Ok(Self {
            settings,
            templates: Templates::new()?,
            service,
            telemetry: None,
        })
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Session default settings
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn telemetry(&self) -> Option<&Arc<Telemetry>> {
        self.telemetry.as_ref()
    }

    /// Route a message and build its prompt without calling the service
    pub fn prepare(&self, content: &str) -> Result<(Selection, Prompt)> {
        let selection = selector::select(content);
        let settings = self.settings.with_override(&selection.overrides);
        let prompt = Prompt::build(&self.templates, &selection, content, settings)?;
        Ok((selection, prompt))
    }

    /// Handle one user message: select a template, stream the completion into
    /// `sink`, finalize it and return the prompt with its completion attached.
    ///
    /// Transport errors are returned as-is after the partial output; the sink
    /// is not finalized in that case. Cancellation finalizes what arrived.
    pub async fn handle_message<S: TokenSink + ?Sized>(
        &self,
        content: &str,
        sink: &mut S,
        cancellation: Option<CancellationToken>,
    ) -> Result<Prompt> {
        let (selection, mut prompt) = self.prepare(content)?;
        let messages = prompt.to_request()?;

        tracing::info!(
            template = %selection.kind,
            keyword = ?selection.keyword,
            content_len = content.len(),
            "Routing message"
        );
        tracing::debug!(content = content, "User message content");
        tracing::debug!(
            messages = %serde_json::to_string(&prompt.messages).unwrap_or_default(),
            settings = %prompt.settings,
            "Outgoing prompt"
        );

        let mut trace_guard = self.telemetry.as_ref().map(|t| {
            t.record_message();
            let builder = TraceBuilder::new(
                t.session_id(),
                selection.kind.as_str(),
                self.service.name(),
                &prompt.settings.model,
                serde_json::to_string(&messages).unwrap_or_default(),
                serde_json::to_string(&prompt.settings).unwrap_or_default(),
            );
            let mut guard = TraceGuard::new(t.clone(), builder);
            // Save the request before anything can go wrong
            guard.flush();
            guard
        });

        let start = Instant::now();
        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
        let service = self.service.clone();
        let settings = prompt.settings.clone();
        let stream_handle = tokio::spawn(async move {
            service
                .chat_stream(messages, settings, delta_tx, cancellation)
                .await
        });

        let relayed = relay(&mut delta_rx, &mut *sink, trace_guard.as_mut()).await;
        let outcome = match relayed {
            Ok(outcome) => outcome,
            Err(e) => {
                stream_handle.abort();
                if let Some(ref mut guard) = trace_guard {
                    guard.set_error(e.to_string());
                }
                return Err(e);
            }
        };

        let stream_result: Result<(), ProviderError> = match stream_handle.await {
            Ok(result) => result,
            Err(e) => {
                if let Some(ref mut guard) = trace_guard {
                    guard.set_error(e.to_string());
                }
                return Err(e.into());
            }
        };

        match stream_result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                tracing::warn!(
                    tokens = outcome.tokens,
                    "Stream cancelled, keeping partial response"
                );
                if let Some(ref mut guard) = trace_guard {
                    guard.set_error(e.to_string());
                }
            }
            Err(e) => {
                tracing::error!(error = %e, tokens = outcome.tokens, "Completion stream failed");
                if let Some(ref mut guard) = trace_guard {
                    guard.set_error(e.to_string());
                }
                return Err(e.into());
            }
        }

        sink.finalize(&outcome.content)?;

        tracing::info!(
            template = %selection.kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            tokens = outcome.tokens,
            input_tokens = ?outcome.usage.map(|u| u.input),
            output_tokens = ?outcome.usage.map(|u| u.output),
            content_len = outcome.content.len(),
            "LLM response"
        );

        if let Some(guard) = trace_guard {
            guard.complete();
        }

        prompt.completion = Some(outcome.content);
        Ok(prompt)
    }
}
