//! # mcp-gateway
//!
//! Gateway server binary: loads settings, wires the registry, dispatcher
//! and transports together, and serves until Ctrl-C.

#![deny(unsafe_code)]

mod system;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mcp_core::EventBus;
use mcp_core::logging::{init_json_subscriber, init_subscriber};
use mcp_rpc::{Processor, Registry};
use mcp_server::{McpServer, ServerConfig, StaticTokenAuthProvider};
use mcp_settings::{LogFormat, McpSettings};

/// How long to wait for the listener task after shutdown starts.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// MCP resource gateway.
#[derive(Parser, Debug)]
#[command(name = "mcp-gateway", about = "MCP resource gateway server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.mcp/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut McpSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.config.clone().unwrap_or_else(mcp_settings::settings_path);
    let mut settings = mcp_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    match settings.logging.format {
        LogFormat::Json => init_json_subscriber(&settings.logging.level),
        LogFormat::Compact => init_subscriber(&settings.logging.level),
    }

    let events = Arc::new(EventBus::new());
    let registry = Arc::new(Registry::with_events(Arc::clone(&events)));
    let handler_timeout = settings.server.handler_timeout_secs.map(Duration::from_secs);
    system::register(&registry, handler_timeout)?;
    let processor = Processor::new(Arc::clone(&registry));

    let config = ServerConfig::from_settings(&settings);
    let mut server = McpServer::new(config, Arc::clone(&registry), processor, events);
    if settings.auth.enabled {
        let provider = StaticTokenAuthProvider::new(settings.auth.tokens.clone());
        tracing::info!(tokens = provider.len(), "token authentication enabled");
        server = server.with_auth_provider(Arc::new(provider));
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "MCP gateway listening on http://{addr} ({} resources registered)",
        registry.len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().await;
    if !server
        .shutdown_coordinator()
        .graceful_shutdown(vec![handle], Some(SHUTDOWN_TIMEOUT))
        .await
    {
        tracing::warn!("listener did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
