//! ClipBridge - two-machine LAN clipboard bridge
//!
//! This is the main entry point for the ClipBridge daemon. Clipboard I/O is
//! an external collaborator; this binary wires the sync core to a logging
//! sink and a status stream.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipbridge::sync::{ClipboardSink, SyncSession};
use clipbridge::transport::{ConnectionRole, SyncMessage};
use clipbridge::Config;

#[derive(Parser)]
#[command(name = "clipbridge", version, about)]
struct Cli {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured connection role
    #[arg(short, long, value_enum)]
    role: Option<ConnectionRole>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Stand-in clipboard writer: logs what a real one would apply
struct LoggingSink;

#[async_trait]
impl ClipboardSink for LoggingSink {
    async fn write(&self, message: SyncMessage) {
        match &message {
            SyncMessage::Text(text) => {
                info!("remote clipboard text ({} chars)", text.chars().count())
            }
            SyncMessage::Image(data) => {
                info!("remote clipboard image ({} encoded bytes)", data.len())
            }
            SyncMessage::Files(entries) => {
                info!("remote clipboard file set ({} entries)", entries.len())
            }
            SyncMessage::ConnectionConfirm(_) => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clipbridge={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ClipBridge v{}", clipbridge::VERSION);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(role) = cli.role {
        config.role = role;
    }

    let mut session = SyncSession::start(config, Arc::new(LoggingSink))?;
    let mut status_rx = session
        .status_updates()
        .ok_or_else(|| anyhow::anyhow!("status stream already taken"))?;

    loop {
        tokio::select! {
            update = status_rx.recv() => match update {
                Some(update) => info!("status: {}", update.message),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
