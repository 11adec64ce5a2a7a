//! Telemetry and logging infrastructure
//!
//! - SQLite storage for every completion (queryable trace history)
//! - OpenTelemetry export (Jaeger, Honeycomb, etc.)
//! - Console logging (human-readable, verbose mode only)
//! - JSON file logging (for analysis)

use crate::config::TelemetryConfig;
use chrono::{DateTime, Utc};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

const DB_FILE: &str = "telemetry.db";

/// Session state for telemetry
#[derive(Debug)]
pub struct TelemetrySession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub message_count: AtomicU64,
    pub total_tokens: AtomicU64,
}

impl TelemetrySession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            message_count: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
        }
    }
}

impl Default for TelemetrySession {
    fn default() -> Self {
        Self::new()
    }
}

/// SQLite-backed telemetry storage
struct TelemetryDb {
    conn: Connection,
}

impl TelemetryDb {
    fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                model TEXT,
                provider TEXT
            );

            CREATE TABLE IF NOT EXISTS traces (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                template TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                model_provider TEXT NOT NULL,
                model_id TEXT NOT NULL,
                -- Full request data
                request_messages TEXT NOT NULL,
                request_settings TEXT NOT NULL,
                -- Streamed response, as much as arrived
                response_content TEXT,
                input_tokens INTEGER,
                output_tokens INTEGER,
                total_tokens INTEGER,
                latency_ms INTEGER,
                error TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_traces_session ON traces(session_id);
            CREATE INDEX IF NOT EXISTS idx_traces_started ON traces(started_at);
        "#,
        )?;

        Ok(Self { conn })
    }

    fn insert_session(
        &self,
        session: &TelemetrySession,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, started_at, model, provider) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id.to_string(),
                session.started_at.to_rfc3339(),
                model,
                provider
            ],
        )?;
        Ok(())
    }

    fn insert_trace(&self, trace: &TraceRecord) -> anyhow::Result<()> {
        // INSERT OR REPLACE so a guard can flush the same trace repeatedly
        self.conn.execute(
            r#"INSERT OR REPLACE INTO traces
               (id, session_id, template, started_at, completed_at, model_provider, model_id,
                request_messages, request_settings, response_content,
                input_tokens, output_tokens, total_tokens, latency_ms, error)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                trace.id.to_string(),
                trace.session_id.to_string(),
                trace.template,
                trace.started_at.to_rfc3339(),
                trace.completed_at.map(|t| t.to_rfc3339()),
                trace.model_provider,
                trace.model_id,
                trace.request_messages,
                trace.request_settings,
                trace.response_content,
                trace.input_tokens.map(|t| t as i64),
                trace.output_tokens.map(|t| t as i64),
                trace.total_tokens.map(|t| t as i64),
                trace.latency_ms.map(|t| t as i64),
                trace.error
            ],
        )?;
        Ok(())
    }
}

/// A full LLM call trace record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub template: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub model_provider: String,
    pub model_id: String,
    pub request_messages: String,
    pub request_settings: String,
    pub response_content: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Request-side data for a trace, captured before the LLM call
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    pub id: Uuid,
    pub session_id: Uuid,
    pub template: String,
    pub model_provider: String,
    pub model_id: String,
    pub request_messages: String,
    pub request_settings: String,
    pub started_at: DateTime<Utc>,
}

impl TraceBuilder {
    pub fn new(
        session_id: Uuid,
        template: impl Into<String>,
        model_provider: impl Into<String>,
        model_id: impl Into<String>,
        request_messages: impl Into<String>,
        request_settings: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            template: template.into(),
            model_provider: model_provider.into(),
            model_id: model_id.into(),
            request_messages: request_messages.into(),
            request_settings: request_settings.into(),
            started_at: Utc::now(),
        }
    }
}

/// Guard that saves the trace on drop, so partial responses survive
/// interruption.
///
/// NOTE: Drop only runs on graceful shutdown. `flush()` during streaming covers
/// hard kills.
pub struct TraceGuard {
    telemetry: Arc<Telemetry>,
    builder: TraceBuilder,
    pub response_content: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub error: Option<String>,
    completed: bool,
}

impl TraceGuard {
    pub fn new(telemetry: Arc<Telemetry>, builder: TraceBuilder) -> Self {
        Self {
            telemetry,
            builder,
            response_content: String::new(),
            input_tokens: None,
            output_tokens: None,
            error: None,
            completed: false,
        }
    }

    /// Append streamed text to the response
    pub fn push_text(&mut self, text: &str) {
        self.response_content.push_str(text);
    }

    /// Update token counts
    pub fn set_usage(&mut self, input: u64, output: u64) {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
    }

    /// Mark as errored
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// Flush current state to the database. Safe to call repeatedly.
    pub fn flush(&mut self) {
        self.telemetry.save_trace(self.record());
    }

    /// Save the final state; drop won't save again
    pub fn complete(mut self) {
        if let (Some(input), Some(output)) = (self.input_tokens, self.output_tokens) {
            self.telemetry.session.total_tokens.fetch_add(input + output, Ordering::SeqCst);
        }
        self.telemetry.save_trace(self.record());
        self.completed = true;
    }

    fn record(&self) -> TraceRecord {
        let completed_at = Utc::now();
        let latency_ms = (completed_at - self.builder.started_at).num_milliseconds() as u64;

        TraceRecord {
            id: self.builder.id,
            session_id: self.builder.session_id,
            template: self.builder.template.clone(),
            started_at: self.builder.started_at,
            completed_at: Some(completed_at),
            model_provider: self.builder.model_provider.clone(),
            model_id: self.builder.model_id.clone(),
            request_messages: self.builder.request_messages.clone(),
            request_settings: self.builder.request_settings.clone(),
            response_content: if self.response_content.is_empty() {
                None
            } else {
                Some(self.response_content.clone())
            },
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: match (self.input_tokens, self.output_tokens) {
                (Some(i), Some(o)) => Some(i + o),
                _ => None,
            },
            latency_ms: Some(latency_ms),
            error: self.error.clone(),
        }
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.telemetry.save_trace(self.record());
        }
    }
}

/// Main telemetry handler
pub struct Telemetry {
    session: Arc<TelemetrySession>,
    db: Arc<Mutex<TelemetryDb>>,
    log_dir: PathBuf,
    _file_guard: Option<WorkerGuard>,
    _otel_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Initialize telemetry with the full observability stack and install the
    /// global tracing subscriber
    pub fn init(
        config: &TelemetryConfig,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> anyhow::Result<Self> {
        let log_dir = config.log_dir.clone();
        let verbose = config.verbose;
        let mut telemetry = Self::open(&log_dir, model, provider)?;

        // Set up file appender for JSON logs
        let file_appender = tracing_appender::rolling::daily(&log_dir, "prompt_relay.log");
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

        let make_env_filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if verbose {
                    EnvFilter::new("debug,hyper=info,reqwest=info,h2=info,rustls=info")
                } else {
                    EnvFilter::new("info,hyper=warn,reqwest=warn,h2=warn,rustls=warn")
                }
            })
        };

        // Console output goes to stderr; stdout carries the streamed answer
        let otel_provider = if let Some(endpoint) = config.otel_endpoint.as_deref() {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(endpoint)
                .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                .build()?;

            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(Resource::builder().with_service_name("prompt-relay").build())
                .build();

            let tracer = provider.tracer("prompt-relay");
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

            let subscriber = tracing_subscriber::registry()
                .with(make_env_filter())
                .with(verbose.then(|| {
                    fmt::layer()
                        .with_target(false)
                        .compact()
                        .with_writer(std::io::stderr)
                }))
                .with(fmt::layer().json().with_writer(non_blocking))
                .with(otel_layer);
            subscriber.try_init().ok();
            Some(provider)
        } else if verbose {
            // Verbose mode: console + file
            let subscriber = tracing_subscriber::registry()
                .with(make_env_filter())
                .with(
                    fmt::layer()
                        .with_target(false)
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .with(fmt::layer().json().with_writer(non_blocking));
            subscriber.try_init().ok();
            None
        } else {
            // Normal mode: file only (no console noise)
            let subscriber = tracing_subscriber::registry()
                .with(make_env_filter())
                .with(fmt::layer().json().with_writer(non_blocking));
            subscriber.try_init().ok();
            None
        };

        tracing::info!(
            session_id = %telemetry.session.id,
            log_dir = %log_dir.display(),
            db_path = %telemetry.db_path().display(),
            otel_enabled = otel_provider.is_some(),
            "Telemetry initialized"
        );

        telemetry._file_guard = Some(file_guard);
        telemetry._otel_provider = otel_provider;
        Ok(telemetry)
    }

    /// Open the trace database and register a session without touching the
    /// global subscriber
    pub fn open(log_dir: &Path, model: Option<&str>, provider: Option<&str>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(log_dir)?;

        let session = Arc::new(TelemetrySession::new());
        let db = TelemetryDb::new(&log_dir.join(DB_FILE))?;
        db.insert_session(&session, model, provider)?;

        Ok(Self {
            session,
            db: Arc::new(Mutex::new(db)),
            log_dir: log_dir.to_path_buf(),
            _file_guard: None,
            _otel_provider: None,
        })
    }

    /// Get the current session ID
    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// Count a handled message
    pub fn record_message(&self) {
        self.session.message_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Save a trace to the database
    pub fn save_trace(&self, trace: TraceRecord) {
        tracing::debug!(
            trace_id = %trace.id,
            template = %trace.template,
            model = %trace.model_id,
            input_tokens = ?trace.input_tokens,
            output_tokens = ?trace.output_tokens,
            latency_ms = ?trace.latency_ms,
            error = ?trace.error,
            "LLM trace"
        );

        match self.db.lock() {
            Ok(db) => {
                if let Err(e) = db.insert_trace(&trace) {
                    tracing::error!(error = %e, trace_id = %trace.id, "Failed to insert trace");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to lock telemetry db");
            }
        }
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session.id,
            started_at: self.session.started_at,
            message_count: self.session.message_count.load(Ordering::SeqCst),
            total_tokens: self.session.total_tokens.load(Ordering::SeqCst),
        }
    }

    /// Get the database path for direct querying
    pub fn db_path(&self) -> PathBuf {
        self.log_dir.join(DB_FILE)
    }

    /// Most recent traces across all sessions, newest first
    pub fn recent_traces(&self, limit: usize) -> anyhow::Result<Vec<TraceSummary>> {
        let db = self.db.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = db.conn.prepare(
            r#"
            SELECT id, session_id, template, started_at, model_id, latency_ms,
                   total_tokens, error, substr(response_content, 1, 60)
            FROM traces
            ORDER BY started_at DESC
            LIMIT ?1
        "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok(TraceSummary {
                id: row.get(0)?,
                session_id: row.get(1)?,
                template: row.get(2)?,
                started_at: row.get(3)?,
                model_id: row.get(4)?,
                latency_ms: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                total_tokens: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
                error: row.get(7)?,
                response_preview: row.get(8)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub message_count: u64,
    pub total_tokens: u64,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session {} | Started: {} | Messages: {} | Tokens: {}",
            self.session_id,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message_count,
            self.total_tokens
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub id: String,
    pub session_id: String,
    pub template: String,
    pub started_at: String,
    pub model_id: String,
    pub latency_ms: Option<u64>,
    pub total_tokens: Option<u64>,
    pub error: Option<String>,
    pub response_preview: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(telemetry: &Telemetry) -> TraceBuilder {
        TraceBuilder::new(
            telemetry.session_id(),
            "creative",
            "OpenAI",
            "gpt-4o-mini",
            "[]",
            "{}",
        )
    }

    #[test]
    fn test_guard_saves_partial_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let telemetry = Arc::new(Telemetry::open(dir.path(), Some("gpt-4o-mini"), None).unwrap());

        {
            let mut guard = TraceGuard::new(telemetry.clone(), builder(&telemetry));
            guard.push_text("Once upon");
            guard.push_text(" a time");
            guard.set_error("Stream cancelled");
        }

        let traces = telemetry.recent_traces(10).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].template, "creative");
        assert_eq!(traces[0].response_preview.as_deref(), Some("Once upon a time"));
        assert_eq!(traces[0].error.as_deref(), Some("Stream cancelled"));
    }

    #[test]
    fn test_flush_then_complete_is_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let telemetry = Arc::new(Telemetry::open(dir.path(), None, None).unwrap());

        let mut guard = TraceGuard::new(telemetry.clone(), builder(&telemetry));
        guard.flush();
        guard.push_text("done");
        guard.set_usage(10, 5);
        guard.flush();
        guard.complete();

        let traces = telemetry.recent_traces(10).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].total_tokens, Some(15));
        assert_eq!(telemetry.stats().total_tokens, 15);
    }

    #[test]
    fn test_stats_count_messages() {
        let dir = tempfile::tempdir().unwrap();
        let telemetry = Telemetry::open(dir.path(), None, None).unwrap();
        telemetry.record_message();
        telemetry.record_message();

        let stats = telemetry.stats();
        assert_eq!(stats.message_count, 2);
        assert!(stats.to_string().contains("Messages: 2"));
        assert!(telemetry.db_path().exists());
    }
}
