//! OpenAI-compatible provider client
//!
//! Streams chat completions over server-sent events with raw HTTP so that
//! sampling settings go into the body exactly as configured.

use super::{CompletionService, ProviderConfig, ProviderError};
use crate::auth;
use crate::settings::SessionSettings;
use async_openai::types::ChatCompletionRequestMessage;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Delta events from a streaming LLM response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Text content delta, never empty
    Text(String),
    /// Usage info (sent at end of stream)
    Usage { input: u64, output: u64 },
    /// Stream finished
    Done,
}

// Internal types for parsing streaming responses
#[derive(Debug, serde::Deserialize)]
struct StreamChunkDelta {
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChoice {
    delta: StreamChunkDelta,
}

#[derive(Debug, serde::Deserialize)]
struct StreamUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
    /// Set when the service reports a failure mid-stream
    error: Option<serde_json::Value>,
}

/// One event pulled out of the SSE byte stream
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters split
/// across network chunks decode intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            // Blank separators and ": keep-alive" comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if data == "[DONE]" {
                    events.push(SseEvent::Done);
                } else {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }
        events
    }

    /// Process whatever is left once the body ends without a final newline
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        self.push(b"\n")
    }
}

/// Turn one `data:` JSON payload into deltas. Malformed payloads yield nothing;
/// an `error` object in the payload fails the stream.
pub fn parse_chunk(data: &str) -> Result<Vec<StreamDelta>, ProviderError> {
    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(target: "llm", error = %e, "Skipping malformed stream chunk");
            return Ok(Vec::new());
        }
    };

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::Api { message });
    }

    let mut deltas = Vec::new();
    if let Some(choice) = chunk.choices.first() {
        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                deltas.push(StreamDelta::Text(content.clone()));
            }
        }
    }
    if let Some(usage) = chunk.usage {
        deltas.push(StreamDelta::Usage {
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
        });
    }
    Ok(deltas)
}

/// Forward decoded events to the channel. Returns true once `[DONE]` is seen.
fn forward_events(
    events: Vec<SseEvent>,
    tx: &mpsc::UnboundedSender<StreamDelta>,
) -> Result<bool, ProviderError> {
    for event in events {
        match event {
            SseEvent::Done => return Ok(true),
            SseEvent::Data(data) => {
                for delta in parse_chunk(&data)? {
                    let _ = tx.send(delta);
                }
            }
        }
    }
    Ok(false)
}

/// OpenAI-compatible client
#[derive(Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl ProviderClient {
    /// Create a new provider client, resolving the API key up front
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = auth::resolve_api_key(&config)?;

        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(ProviderError::Client)?;

        Ok(Self {
            config,
            api_key,
            http_client,
        })
    }

    /// Build the JSON body of a streaming request
    pub fn request_body(
        &self,
        messages: &[ChatCompletionRequestMessage],
        settings: &SessionSettings,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true}
        });

        if let (Some(body), Ok(serde_json::Value::Object(settings))) =
            (body.as_object_mut(), serde_json::to_value(settings))
        {
            body.extend(settings);
        }
        body
    }
}

#[async_trait]
impl CompletionService for ProviderClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        settings: SessionSettings,
        tx: mpsc::UnboundedSender<StreamDelta>,
        cancellation: Option<CancellationToken>,
    ) -> Result<(), ProviderError> {
        let body = self.request_body(&messages, &settings);

        tracing::info!(
            target: "llm",
            provider = %self.config.name,
            model = %settings.model,
            temperature = settings.temperature,
            max_tokens = settings.max_tokens,
            message_count = messages.len(),
            "Starting streaming LLM call"
        );

        let request_fut = self
            .http_client
            .post(self.config.completions_url())
            .bearer_auth(&self.api_key)
            .header("Connection", "close")
            .json(&body)
            .send();

        let response = if let Some(ref token) = cancellation {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let _ = tx.send(StreamDelta::Done);
                    return Err(ProviderError::Cancelled);
                }
                result = request_fut => result.map_err(ProviderError::Send)?,
            }
        } else {
            request_fut.await.map_err(ProviderError::Send)?
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(target: "llm", status = %status, error = %body, "LLM call returned error");
            return Err(ProviderError::Status { status, body });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let next = if let Some(ref token) = cancellation {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        // Dropping the stream closes the connection
                        drop(stream);
                        let _ = tx.send(StreamDelta::Done);
                        return Err(ProviderError::Cancelled);
                    }
                    item = stream.next() => item,
                }
            } else {
                stream.next().await
            };

            let Some(result) = next else {
                break;
            };
            let bytes = result.map_err(ProviderError::Stream)?;

            if forward_events(decoder.push(&bytes), &tx).inspect_err(log_stream_error)? {
                let _ = tx.send(StreamDelta::Done);
                return Ok(());
            }
        }

        forward_events(decoder.finish(), &tx).inspect_err(log_stream_error)?;
        let _ = tx.send(StreamDelta::Done);
        Ok(())
    }
}

fn log_stream_error(e: &ProviderError) {
    tracing::error!(target: "llm", error = %e, "LLM stream reported an error");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Prompt;
    use crate::selector::select;
    use crate::templates::Templates;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let events = decoder.push(b":1}\n\n: keep-alive\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn test_decoder_keeps_multibyte_chars_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n";
        let bytes = line.as_bytes();
        // Split inside the two-byte 'é'
        let split = line.find('é').unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let events = decoder.push(&bytes[split..]);

        let SseEvent::Data(data) = &events[0] else {
            panic!("expected data event");
        };
        assert_eq!(
            parse_chunk(data).unwrap(),
            vec![StreamDelta::Text("héllo".to_string())]
        );
    }

    #[test]
    fn test_parse_chunk_skips_empty_and_null_content() {
        for data in [
            r#"{"choices":[{"delta":{"content":""}}]}"#,
            r#"{"choices":[{"delta":{"content":null}}]}"#,
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[]}"#,
            "not json",
        ] {
            assert!(parse_chunk(data).unwrap().is_empty(), "{}", data);
        }
    }

    #[test]
    fn test_parse_chunk_usage() {
        let deltas = parse_chunk(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":34,"total_tokens":46}}"#,
        )
        .unwrap();
        assert_eq!(deltas, vec![StreamDelta::Usage { input: 12, output: 34 }]);
    }

    #[test]
    fn test_parse_chunk_error_payload() {
        let err = parse_chunk(r#"{"error":{"message":"server overloaded","type":"server_error"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { ref message } if message == "server overloaded"));

        let err = parse_chunk(r#"{"error":"boom"}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Api { ref message } if message == "\"boom\""));
    }

    #[test]
    fn test_decoder_finish_flushes_trailing_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":1}").is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Data("{\"a\":1}".to_string())]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_request_body_carries_settings() {
        let client = ProviderClient::new(ProviderConfig::openai().with_api_key("sk-test")).unwrap();
        let templates = Templates::new().unwrap();
        let selection = select("tell me a story");
        let settings = SessionSettings::default().with_override(&selection.overrides);
        let prompt = Prompt::build(&templates, &selection, "tell me a story", settings).unwrap();

        let body = client.request_body(&prompt.to_request().unwrap(), &prompt.settings);

        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["top_p"], 1.0);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(
            body["messages"][1]["content"].as_str(),
            Some(prompt.user_text())
        );
    }

    /// Serve one canned HTTP response on a local port and return its base URL.
    /// With `hold_open` the connection stays up after the body is written.
    async fn serve_once(head: &'static str, body: Vec<&'static str>, hold_open: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;

            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for part in body {
                // The client may hang up early, e.g. after [DONE]
                if socket.write_all(part.as_bytes()).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            if hold_open {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        format!("http://{}/v1", addr)
    }

    /// Read headers and the full JSON body so the client never sees a reset
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }

    const SSE_HEAD: &str =
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";

    fn client_for(base_url: String) -> ProviderClient {
        let config = ProviderConfig::custom("Local", base_url, "PROMPT_RELAY_TEST_KEY")
            .with_api_key("test-key");
        ProviderClient::new(config).unwrap()
    }

    fn request_messages() -> Vec<ChatCompletionRequestMessage> {
        let templates = Templates::new().unwrap();
        let selection = select("hello");
        let prompt =
            Prompt::build(&templates, &selection, "hello", SessionSettings::default()).unwrap();
        prompt.to_request().unwrap()
    }

    async fn run_stream(
        client: &ProviderClient,
        cancellation: Option<CancellationToken>,
    ) -> (Result<(), ProviderError>, Vec<StreamDelta>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = client
            .chat_stream(request_messages(), SessionSettings::default(), tx, cancellation)
            .await;
        let mut deltas = Vec::new();
        while let Some(delta) = rx.recv().await {
            deltas.push(delta);
        }
        (result, deltas)
    }

    fn text(s: &str) -> StreamDelta {
        StreamDelta::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_stream_relays_tokens_in_order() {
        let base_url = serve_once(
            SSE_HEAD,
            vec![
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"con",
                "tent\":\"lo\"}}]}\n\n",
                "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":2}}\n\n",
                "data: [DONE]\n\n",
            ],
            false,
        )
        .await;

        let (result, deltas) = run_stream(&client_for(base_url), None).await;

        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(
            deltas,
            vec![
                text("Hel"),
                text("lo"),
                StreamDelta::Usage { input: 9, output: 2 },
                StreamDelta::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_done_marker_ends_stream() {
        let base_url = serve_once(
            SSE_HEAD,
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"kept\"}}]}\n\ndata: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
            ],
            true,
        )
        .await;

        let (result, deltas) = run_stream(&client_for(base_url), None).await;

        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(deltas, vec![text("kept"), StreamDelta::Done]);
    }

    #[tokio::test]
    async fn test_body_without_trailing_newline_keeps_last_token() {
        let base_url = serve_once(
            SSE_HEAD,
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}",
            ],
            false,
        )
        .await;

        let (result, deltas) = run_stream(&client_for(base_url), None).await;

        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(deltas, vec![text("Hello"), text(" world"), StreamDelta::Done]);
    }

    #[tokio::test]
    async fn test_error_event_fails_stream() {
        let base_url = serve_once(
            SSE_HEAD,
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
                "data: {\"error\":{\"message\":\"server overloaded\",\"type\":\"server_error\"}}\n\n",
            ],
            false,
        )
        .await;

        let (result, deltas) = run_stream(&client_for(base_url), None).await;

        assert!(matches!(
            result,
            Err(ProviderError::Api { ref message }) if message == "server overloaded"
        ));
        assert_eq!(deltas, vec![text("par")]);
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let base_url = serve_once(
            "HTTP/1.1 429 Too Many Requests\r\ncontent-type: application/json\r\ncontent-length: 26\r\nconnection: close\r\n\r\n",
            vec!["{\"error\":\"rate limited\"}\n\n"],
            false,
        )
        .await;

        let (result, deltas) = run_stream(&client_for(base_url), None).await;

        match result {
            Err(ProviderError::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::TOO_MANY_REQUESTS);
                assert!(body.contains("rate limited"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_drops_stream() {
        let base_url = serve_once(
            SSE_HEAD,
            vec!["data: {\"choices\":[{\"delta\":{\"content\":\"first\"}}]}\n\n"],
            true,
        )
        .await;
        let client = client_for(base_url);
        let cancel = CancellationToken::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                client
                    .chat_stream(request_messages(), SessionSettings::default(), tx, Some(cancel))
                    .await
            })
        };

        assert_eq!(rx.recv().await, Some(text("first")));
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert_eq!(rx.recv().await, Some(StreamDelta::Done));
        assert_eq!(rx.recv().await, None);
    }
}
