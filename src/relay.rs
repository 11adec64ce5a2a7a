//! Streaming relay: forward completion tokens to an output sink as they arrive

use crate::provider::StreamDelta;
use crate::telemetry::TraceGuard;
use anyhow::Result;
use std::io::Write;
use tokio::sync::mpsc;

/// Where streamed tokens go
pub trait TokenSink {
    /// Write one non-empty token
    fn stream_token(&mut self, token: &str) -> Result<()>;

    /// Called once after the stream ends, with the full message
    fn finalize(&mut self, content: &str) -> Result<()>;
}

/// Writes tokens to stdout, flushing after each so they show up immediately
pub struct StdoutSink {
    stdout: std::io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            stdout: std::io::stdout(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSink for StdoutSink {
    fn stream_token(&mut self, token: &str) -> Result<()> {
        let mut out = self.stdout.lock();
        out.write_all(token.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    fn finalize(&mut self, _content: &str) -> Result<()> {
        let mut out = self.stdout.lock();
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

/// Token usage reported at the end of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// What the relay forwarded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayOutcome {
    /// Concatenation of every forwarded token
    pub content: String,
    pub tokens: usize,
    pub usage: Option<TokenUsage>,
}

/// Drain deltas into the sink until `Done` or until the sender is dropped.
///
/// Empty tokens are skipped. Does not finalize the sink; the caller does that
/// once it knows the stream ended without a transport error.
pub async fn relay<S: TokenSink + ?Sized>(
    rx: &mut mpsc::UnboundedReceiver<StreamDelta>,
    sink: &mut S,
    mut trace: Option<&mut TraceGuard>,
) -> Result<RelayOutcome> {
    let mut outcome = RelayOutcome::default();

    while let Some(delta) = rx.recv().await {
        match delta {
            StreamDelta::Text(token) => {
                if token.is_empty() {
                    continue;
                }
                sink.stream_token(&token)?;
                outcome.content.push_str(&token);
                outcome.tokens += 1;
                // Flush on every token so an interrupted stream keeps its text
                if let Some(guard) = trace.as_deref_mut() {
                    guard.push_text(&token);
                    guard.flush();
                }
            }
            StreamDelta::Usage { input, output } => {
                outcome.usage = Some(TokenUsage { input, output });
                if let Some(guard) = trace.as_deref_mut() {
                    guard.set_usage(input, output);
                }
            }
            StreamDelta::Done => break,
        }
    }

    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every write for assertions
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub tokens: Vec<String>,
        pub finalized: Option<String>,
    }

    impl TokenSink for RecordingSink {
        fn stream_token(&mut self, token: &str) -> Result<()> {
            self.tokens.push(token.to_string());
            Ok(())
        }

        fn finalize(&mut self, content: &str) -> Result<()> {
            self.finalized = Some(content.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tokens_forwarded_in_order_and_empty_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for token in ["Hel", "", "lo", ",", "", " world"] {
            tx.send(StreamDelta::Text(token.to_string())).unwrap();
        }
        tx.send(StreamDelta::Usage { input: 20, output: 4 }).unwrap();
        tx.send(StreamDelta::Done).unwrap();

        let mut sink = RecordingSink::default();
        let outcome = relay(&mut rx, &mut sink, None).await.unwrap();

        assert_eq!(sink.tokens, vec!["Hel", "lo", ",", " world"]);
        assert_eq!(outcome.content, sink.tokens.concat());
        assert_eq!(outcome.content, "Hello, world");
        assert_eq!(outcome.tokens, 4);
        assert_eq!(outcome.usage, Some(TokenUsage { input: 20, output: 4 }));
        assert!(sink.finalized.is_none());
    }

    #[tokio::test]
    async fn test_stops_at_done() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamDelta::Text("a".to_string())).unwrap();
        tx.send(StreamDelta::Done).unwrap();
        tx.send(StreamDelta::Text("late".to_string())).unwrap();

        let mut sink = RecordingSink::default();
        let outcome = relay(&mut rx, &mut sink, None).await.unwrap();
        assert_eq!(outcome.content, "a");
    }

    #[tokio::test]
    async fn test_ends_when_sender_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamDelta::Text("partial".to_string())).unwrap();
        drop(tx);

        let mut sink = RecordingSink::default();
        let outcome = relay(&mut rx, &mut sink, None).await.unwrap();
        assert_eq!(outcome.content, "partial");
        assert_eq!(outcome.usage, None);
    }
}
