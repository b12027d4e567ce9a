//! markgo-shell server entry point.
//!
//! Boots the browser shell over the configured origin and serves its tools on
//! stdio. Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use shell_client::spawn_connectivity_listener;
use shell_core::AppConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod shell;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(origin = %config.origin, db = %config.db_path.display(), "Starting markgo-shell on stdio transport");

    let shell = Arc::new(shell::Shell::open(config).await?);
    let shutdown = CancellationToken::new();
    let listener = spawn_connectivity_listener(shell.queue.clone(), &shell.bus, shutdown.clone());

    shell.start().await;

    let handler = handler::ShellServer::new(shell.clone());
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    shutdown.cancel();
    if let Err(err) = listener.await {
        tracing::warn!(error = %err, "connectivity listener ended abnormally");
    }
    shell.agent.settle().await;

    Ok(())
}
