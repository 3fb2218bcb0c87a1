//! feedback-mcp-server: standalone MCP feedback bridge daemon
//!
//! Runs the server on its own, logging feedback requests as they arrive so
//! an operator (or an embedding host) can answer them through the library
//! surface:
//!
//!   feedback-mcp-server                          # 127.0.0.1, ephemeral port
//!   feedback-mcp-server --port 3001              # fixed port
//!   feedback-mcp-server --timeout-secs 600       # 10 minute feedback window

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use feedback_mcp::{FeedbackServer, ServerConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "feedback-mcp-server")]
#[command(about = "Human-in-the-loop MCP feedback server")]
struct Cli {
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 = OS-assigned)
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Seconds a feedback request may stay pending before it times out
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Server name override
    #[arg(long)]
    name: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServerConfig {
        name: cli.name,
        feedback_timeout: Duration::from_secs(cli.timeout_secs),
        ..Default::default()
    };

    let server = FeedbackServer::new(config);
    let base_url = server.start(cli.port, &cli.host).await?;
    info!(base_url = %base_url, "Press Ctrl+C to stop");

    // Surface feedback requests in the log so an operator can see what the
    // agent is waiting on.
    let mut events = server.subscribe_feedback();
    let watcher = tokio::spawn(async move {
        while let Ok(request) = events.recv().await {
            info!(
                request_id = %request.id,
                summary = %request.summary,
                "Agent is waiting for feedback"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.stop().await;
    watcher.abort();

    Ok(())
}
