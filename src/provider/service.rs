//! The seam between a session and whatever produces completions

use super::{ProviderError, StreamDelta};
use crate::settings::SessionSettings;
use async_openai::types::ChatCompletionRequestMessage;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A streaming chat completion backend
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Provider name, recorded in traces
    fn name(&self) -> &str;

    /// Stream one completion.
    ///
    /// Deltas are sent through `tx` in arrival order. `StreamDelta::Done` is
    /// sent when the stream ends normally or is cancelled; on a transport
    /// error the sender is dropped without `Done` and the error is returned.
    async fn chat_stream(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        settings: SessionSettings,
        tx: mpsc::UnboundedSender<StreamDelta>,
        cancellation: Option<CancellationToken>,
    ) -> Result<(), ProviderError>;
}
