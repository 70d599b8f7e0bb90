//! fs-explorer MCP server.
//!
//! Serves a directory tree read-only over the Model Context Protocol, on
//! stdio or TCP.

use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fs_explorer_mcp::catalog;
use fs_explorer_mcp::config::{Args, Config, LogFormat, Transport};
use fs_explorer_mcp::error::{Error, Result};
use fs_explorer_mcp::mcp::server::McpServer;
use fs_explorer_mcp::mcp::subscriptions::SubscriptionManager;
use fs_explorer_mcp::mcp::transport::StdioTransport;
use fs_explorer_mcp::metrics::Metrics;
use fs_explorer_mcp::watcher::{self, FileWatcher};
use fs_explorer_mcp::VERSION;

fn init_logging(config: &Config) -> Result<()> {
    // --debug wins over RUST_LOG.
    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries the protocol, so logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("Failed to set tracing subscriber: {}", e)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config: Config = Args::parse().into();
    init_logging(&config)?;
    config.validate()?;

    info!("fs-explorer MCP server v{}", VERSION);
    info!("Root: {:?}", config.root);
    info!("Transport: {:?}", config.transport);

    let engine = catalog::chunk_engine(&config)?;
    let registry = catalog::build_registry(engine.clone())?;

    let subscriptions = Arc::new(SubscriptionManager::new());
    let metrics = Metrics::new();
    let server = McpServer::new(registry, "fs-explorer")
        .with_subscriptions(subscriptions.clone())
        .with_metrics(metrics.clone())
        .with_request_timeout(config.request_timeout())
        .with_instructions(
            "Read-only filesystem explorer. Read fs://chunks/{file_path} for a file's \
             chunk URIs, then fs://chunk/{file_path}/{chunk_index} for each part.",
        );

    // Held for the life of the process; dropping it stops the watch.
    let mut file_watcher = None;
    if config.watch {
        let mut w = FileWatcher::new(engine.root().to_path_buf(), config.debounce_ms);
        let changes = w.start().await?;
        watcher::spawn_notifier(changes, engine, subscriptions, metrics);
        file_watcher = Some(w);
    }

    match config.transport {
        Transport::Stdio => {
            info!("Starting stdio transport...");
            server.run(StdioTransport::stdio()).await?;
        }
        Transport::Tcp => {
            info!("Starting TCP transport on port {}...", config.port);
            let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
            server.serve_tcp(listener).await?;
        }
    }

    if let Some(mut w) = file_watcher {
        w.stop();
    }
    Ok(())
}
