//! Prompt Relay CLI
//!
//! Routes each message to a prompt template and streams the answer.

use anyhow::Result;
use clap::{Parser, Subcommand};
use prompt_relay::selector::route_for;
use prompt_relay::{
    AuthConfig, Config, ProviderClient, Session, StdoutSink, Telemetry, TemplateKind,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "prompt-relay")]
#[command(about = "Prompt Relay - route a message to a prompt template and stream the answer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model ID (default: gpt-4o-mini)
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL for an OpenAI-compatible endpoint (e.g., LM Studio)
    #[arg(long)]
    base_url: Option<String>,

    /// API key - overrides env vars and auth.json
    #[arg(long)]
    api_key: Option<String>,

    /// Session default temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Session default max tokens
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Data directory (default: ~/.prompt_relay or $XDG_DATA_HOME/prompt_relay)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// OpenTelemetry collector endpoint (e.g., http://localhost:4318)
    #[arg(long)]
    otel_endpoint: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive REPL session
    Repl,

    /// Send a single message
    Prompt {
        /// The message to send
        message: String,
    },

    /// Show which template and settings a message would use, without calling the model
    Classify {
        message: String,
    },

    /// List templates with their keywords and setting overrides
    Templates,

    /// List recent completion traces
    Traces {
        /// Maximum number of traces to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Build configuration
/// Priority: CLI flags > config file > auth.json base_url > defaults
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::default(),
    };

    let auth = AuthConfig::load().unwrap_or_default();
    config = config.with_auth(&auth);

    if let Some(ref base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(ref api_key) = cli.api_key {
        config = config.with_api_key(api_key);
    }
    if let Some(ref model) = cli.model {
        config = config.with_model(model);
    }
    if let Some(temperature) = cli.temperature {
        config = config.with_temperature(temperature);
    }
    if let Some(max_tokens) = cli.max_tokens {
        config = config.with_max_tokens(max_tokens);
    }
    if let Some(ref data_dir) = cli.data_dir {
        config = config.with_log_dir(data_dir.clone());
    }
    if let Some(ref endpoint) = cli.otel_endpoint {
        config = config.with_otel_endpoint(endpoint);
    }

    Ok(config.with_verbose(cli.verbose))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match cli.command {
        Some(Commands::Classify { ref message }) => {
            classify(&config, message)?;
        }
        Some(Commands::Templates) => {
            list_templates();
        }
        Some(Commands::Traces { limit, json }) => {
            show_traces(&config.telemetry.log_dir, limit, json)?;
        }
        Some(Commands::Prompt { ref message }) => {
            let session = start_session(&config)?;
            run_single_prompt(&session, message).await?;
        }
        Some(Commands::Repl) | None => {
            let session = start_session(&config)?;
            run_repl(&session, &config.telemetry.log_dir).await?;
        }
    }

    Ok(())
}

fn start_session(config: &Config) -> Result<Session> {
    let telemetry = Arc::new(Telemetry::init(
        &config.telemetry,
        Some(config.settings.model.as_str()),
        Some(config.provider.name.as_str()),
    )?);
    let client = ProviderClient::new(config.provider.clone())?;

    Ok(Session::start(config.settings.clone(), Arc::new(client))?.with_telemetry(telemetry))
}

fn classify(config: &Config, message: &str) -> Result<()> {
    let selection = prompt_relay::select(message);
    let settings = config.settings.with_override(&selection.overrides);

    println!("Template: {}", selection.kind);
    match selection.keyword {
        Some(keyword) => println!("Matched:  \"{}\"", keyword),
        None => println!("Matched:  (no keyword, generic fallback)"),
    }
    println!("Override: {}", selection.overrides);
    println!("Settings: {}", settings);
    Ok(())
}

fn list_templates() {
    println!("Templates (checked in this order, first match wins):");
    println!("{:-<80}", "");
    for (i, kind) in TemplateKind::ALL.into_iter().enumerate() {
        match route_for(kind) {
            Some(route) => {
                println!("  {}. {:16} | {}", i + 1, kind, route.overrides);
                println!("     keywords: {}", route.keywords.join(", "));
            }
            None => {
                println!("  -  {:16} | session defaults", kind);
                println!("     keywords: (anything else)");
            }
        }
    }
}

fn show_traces(data_dir: &Path, limit: usize, json: bool) -> Result<()> {
    let telemetry = Telemetry::open(data_dir, None, None)?;
    let traces = telemetry.recent_traces(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&traces)?);
        return Ok(());
    }

    println!("Recent Traces ({})", telemetry.db_path().display());
    println!("{:-<100}", "");
    for t in &traces {
        let latency = t
            .latency_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "?".to_string());
        let tokens = t
            .total_tokens
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = if t.error.is_some() { "ERR" } else { "ok" };
        let preview = t
            .response_preview
            .as_deref()
            .unwrap_or("")
            .replace('\n', " ");

        println!(
            "{} {} {:16} {:>8} {:>6} {:3} {}",
            t.started_at.get(..19).unwrap_or(&t.started_at),
            t.id.get(..8).unwrap_or(&t.id),
            t.template,
            latency,
            tokens,
            status,
            preview
        );
    }
    println!("\n{} traces", traces.len());

    Ok(())
}

/// Stream one reply to stdout. Ctrl-C stops the stream and keeps what arrived.
async fn stream_reply(session: &Session, message: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut sink = StdoutSink::new();
    let result = session.handle_message(message, &mut sink, Some(cancel)).await;
    watcher.abort();

    let prompt = result?;
    tracing::debug!(
        template = %prompt.template_kind,
        completion_len = prompt.completion.as_deref().map(str::len).unwrap_or(0),
        "Message finalized"
    );
    Ok(())
}

async fn run_single_prompt(session: &Session, message: &str) -> Result<()> {
    stream_reply(session, message).await?;

    if let Some(telemetry) = session.telemetry() {
        eprintln!("---");
        eprintln!("{}", telemetry.stats());
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  /quit, /exit        - Exit the REPL");
    println!("  /settings           - Show session default settings");
    println!("  /classify <message> - Show the template a message would use");
    println!("  /stats              - Show session statistics");
    println!("  /help               - Show this help");
}

async fn run_repl(session: &Session, data_dir: &Path) -> Result<()> {
    println!("Prompt Relay REPL");
    println!("Model: {}", session.settings().model);
    if let Some(telemetry) = session.telemetry() {
        println!("Session: {}", telemetry.session_id());
        println!("Database: {}", telemetry.db_path().display());
    }
    println!("Every message is answered on its own; there is no chat history.");
    println!();
    print_help();
    println!();

    let mut rl = DefaultEditor::new()?;
    let history_path = data_dir.join("history.txt");
    let _ = rl.load_history(&history_path);

    loop {
        match rl.readline("prompt-relay> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                if line.starts_with('/') {
                    let (cmd, arg) = match line.split_once(' ') {
                        Some((cmd, arg)) => (cmd, Some(arg.trim())),
                        None => (line, None),
                    };

                    match cmd {
                        "/quit" | "/exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        "/settings" => {
                            println!("{}", session.settings());
                        }
                        "/classify" => match arg {
                            Some(message) => {
                                let selection = prompt_relay::select(message);
                                println!(
                                    "{} ({})",
                                    selection.kind,
                                    session.settings().with_override(&selection.overrides)
                                );
                            }
                            None => println!("Usage: /classify <message>"),
                        },
                        "/stats" => match session.telemetry() {
                            Some(telemetry) => println!("{}", telemetry.stats()),
                            None => println!("Telemetry disabled."),
                        },
                        "/help" => print_help(),
                        _ => println!("Unknown command: {}", cmd),
                    }
                    continue;
                }

                println!();
                if let Err(e) = stream_reply(session, line).await {
                    eprintln!("Error: {}\n", e);
                } else {
                    println!();
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    if let Some(telemetry) = session.telemetry() {
        println!("\nSession summary: {}", telemetry.stats());
    }

    Ok(())
}
