//! Relay Daemon - Chat Panel Server
//!
//! Serves the chat panel page and relays each panel's prompts to a local
//! Ollama server over a WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (http://127.0.0.1:8765/)
//! relay-daemon
//!
//! # Another model, delta updates
//! relay-daemon --model llama3.2:3b --update-mode delta
//!
//! # With config file
//! relay-daemon --config ~/.config/deep-chat/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! Configuration priority: command line, then environment, then config file,
//! then defaults.
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod http;
mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use relay_core::{LlmBackend, OllamaBackend, OverlapPolicy, RelayHandler, Settings, UpdateMode};

use server::DaemonServer;

/// Relay Daemon - serves the deep-chat panel and relays prompts to Ollama
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on (host:port)
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model to send prompts to
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Ollama host
    #[arg(long, value_name = "HOST")]
    ollama_host: Option<String>,

    /// Ollama port
    #[arg(long, value_name = "PORT")]
    ollama_port: Option<u16>,

    /// Response updates: cumulative or delta
    #[arg(long, value_name = "MODE")]
    update_mode: Option<UpdateMode>,

    /// Prompt during a running stream: cancel-previous or reject
    #[arg(long, value_name = "POLICY")]
    overlap_policy: Option<OverlapPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// Overlay command line values on loaded settings
    fn apply(&self, settings: &mut Settings) {
        if let Some(ref bind) = self.bind {
            settings.server.bind_address.clone_from(bind);
        }
        if let Some(ref model) = self.model {
            settings.relay.model.clone_from(model);
        }
        if let Some(ref host) = self.ollama_host {
            settings.backend.host.clone_from(host);
        }
        if let Some(port) = self.ollama_port {
            settings.backend.port = port;
        }
        if let Some(mode) = self.update_mode {
            settings.relay.update_mode = mode;
        }
        if let Some(policy) = self.overlap_policy {
            settings.relay.overlap_policy = policy;
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Warn early if Ollama is down or the model is missing
async fn check_backend(backend: &OllamaBackend, model: &str) {
    if !backend.health_check().await {
        warn!(
            url = %backend.base_url(),
            "Ollama is not reachable; panels will see errors until it starts"
        );
        return;
    }
    match backend.list_models().await {
        Ok(models) => match models.iter().find(|m| m.name == model) {
            Some(info) => info!(
                model = %model,
                parameters = info.parameters.as_deref().unwrap_or("unknown"),
                size_bytes = ?info.size,
                "Model available"
            ),
            None => warn!(
                model = %model,
                installed = models.len(),
                "Model not found in Ollama; run `ollama pull {model}`"
            ),
        },
        Err(e) => warn!(error = %e, "Could not list Ollama models"),
    }
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!(error = %e, "Failed to listen for SIGINT");
                        }
                        info!("Received SIGINT, initiating shutdown");
                    }
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT");
    }
    info!("Received SIGINT, initiating shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Relay Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let (mut settings, source) =
        Settings::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;

    info!(source = %source, "Configuration loaded");
    info!(
        model = %settings.relay.model,
        update_mode = %settings.relay.update_mode,
        overlap_policy = %settings.relay.overlap_policy,
        "Relay settings"
    );

    let relay = RelayHandler::new(
        OllamaBackend::from_config(&settings.backend),
        settings.relay.clone(),
    );
    check_backend(relay.backend(), &settings.relay.model).await;

    let server = DaemonServer::new(relay, settings.server.clone());
    let listener = server.bind().await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    match server.run(listener, shutdown).await {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
