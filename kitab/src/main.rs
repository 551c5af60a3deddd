use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kitab::api::{create_router, AppState};
use kitab::chat::relay_from_config;
use kitab::config::Config;
use kitab::query::{self, parse_history, Protocol, QueryOptions};
use kitab::tui::{self, QueryCommand, TuiOptions};

#[derive(Parser)]
#[command(name = "kitab")]
#[command(about = "Ask questions about a library of books, with cited sources")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the chat API and the web client
    Serve,

    /// Answer one question and exit (used by the terminal client)
    Query {
        /// Stream the answer to stdout as it is generated
        #[arg(long)]
        stream: bool,

        /// Output format for --stream
        #[arg(long, value_enum, default_value_t = Protocol::Events)]
        protocol: Protocol,

        /// Prior turns as JSON: [{"question": "...", "answer": "..."}]
        #[arg(long)]
        history: Option<String>,

        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Full-screen terminal client
    Tui {
        /// External command to run per question instead of `kitab query`
        #[arg(long)]
        query_command: Option<String>,

        /// Output format of the query command (defaults to sentinel for
        /// external commands)
        #[arg(long, value_enum)]
        protocol: Option<Protocol>,

        /// Directory for the log file
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Line-based client for a running `kitab serve`
    Chat {
        #[arg(long, default_value = "http://localhost:3000")]
        url: String,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    match args.command {
        Command::Serve => {
            init_stdout_logging();
            serve().await
        }
        Command::Query {
            stream,
            protocol,
            history,
            question,
        } => {
            init_stderr_logging("off");
            let code = match run_query(stream, protocol, history, question.join(" ")).await {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: {e}");
                    1
                }
            };
            std::process::exit(code);
        }
        Command::Tui {
            query_command,
            protocol,
            log_dir,
        } => {
            let _guard = init_file_logging(log_dir)?;
            let config = Config::from_env();

            let (command, protocol) = match query_command {
                Some(line) => {
                    let protocol = protocol.unwrap_or(Protocol::Sentinel);
                    (QueryCommand::external(&line)?, protocol)
                }
                None => {
                    let protocol = protocol.unwrap_or_default();
                    (QueryCommand::current_exe(protocol)?, protocol)
                }
            };

            tui::run(TuiOptions {
                command,
                protocol,
                history_turns: config.chat.history_turns,
            })
            .await?;
            Ok(())
        }
        Command::Chat { url, timeout } => {
            init_stderr_logging("kitab=warn");
            kitab::client::run_repl(&url, timeout).await?;
            Ok(())
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing::info!(
        "Using chat model {} with embeddings {}",
        config.llm.model,
        config.embeddings.model
    );
    let relay = relay_from_config(&config)?;
    let state = AppState::new(config.clone(), relay);
    let app = create_router(state);

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Kitab starting on http://{}", addr);
    tracing::info!("  Health check: http://{}/api/health", addr);
    tracing::info!("  OpenAPI spec: http://{}/api/openapi.json", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel_token.cancelled_owned())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn run_query(
    stream: bool,
    protocol: Protocol,
    history: Option<String>,
    question: String,
) -> anyhow::Result<i32> {
    let config = Config::from_env();
    let relay = relay_from_config(&config)?;
    let history = match history {
        Some(raw) => parse_history(&raw)?,
        None => Vec::new(),
    };

    let options = QueryOptions {
        question,
        stream,
        protocol,
        history,
        history_turns: config.chat.history_turns,
    };

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let code = query::run(&relay, options, &mut stdout, &mut stderr).await?;
    stdout.flush().await?;
    stderr.flush().await?;
    Ok(code)
}

fn init_stdout_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kitab=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Log to stderr, keeping stdout free for answers.
fn init_stderr_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Log to `kitab-tui.log`; the terminal belongs to the UI.
fn init_file_logging(dir: Option<PathBuf>) -> anyhow::Result<WorkerGuard> {
    let dir = dir.unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&dir)?;

    let appender = tracing_appender::rolling::never(&dir, "kitab-tui.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "kitab=info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();

    tracing::info!("Logging to {}", dir.join("kitab-tui.log").display());
    Ok(guard)
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
    cancel_token.cancel();
}
