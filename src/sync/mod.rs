//! Sync coordination between the clipboard collaborators and the channel
//!
//! The [`SyncCoordinator`] is the façade the rest of the application calls:
//! local clipboard changes go out over the channel if and only if it is
//! open (clipboard state is latest-value-wins, so there is no queueing),
//! and inbound messages are dispatched to the clipboard writer collaborator.
//! [`SyncSession`] owns every socket, task, and timer in the process, so
//! shutdown is a single idempotent call.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::discovery::DiscoveryService;
use crate::transport::{
    ConnectionManager, ConnectionRole, ConnectionState, StatusUpdate, SyncMessage,
};

/// Clipboard writer collaborator; receives every inbound payload message
#[async_trait]
pub trait ClipboardSink: Send + Sync {
    /// Apply a remote clipboard change locally
    async fn write(&self, message: SyncMessage);
}

/// Application-facing façade over the current channel
#[derive(Clone)]
pub struct SyncCoordinator {
    manager: Arc<ConnectionManager>,
}

impl SyncCoordinator {
    fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Forward a local clipboard change to the peer
    ///
    /// Dropped without error when no channel is open; the next change wins
    /// anyway.
    pub async fn send_local(&self, message: SyncMessage) {
        let kind = message.kind();
        match self.manager.send(message).await {
            Ok(()) => debug!("forwarded local {} change", kind),
            Err(e) => debug!("dropping local {} change: {}", kind, e),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }
}

/// Dispatch inbound messages to the clipboard writer
///
/// ConnectionConfirm messages are handshake plumbing and are consumed here,
/// never forwarded to the clipboard layer.
async fn dispatch(mut inbound_rx: mpsc::UnboundedReceiver<SyncMessage>, sink: Arc<dyn ClipboardSink>) {
    while let Some(message) = inbound_rx.recv().await {
        match message {
            SyncMessage::ConnectionConfirm(label) => {
                debug!(peer_role = %label, "consumed connection_confirm");
            }
            message => {
                debug!("delivering remote {} change to clipboard", message.kind());
                sink.write(message).await;
            }
        }
    }
}

/// Owns the whole sync subsystem for one process
///
/// Holds the connection manager, discovery service, and all spawned tasks.
/// There are no module-level handles anywhere; everything reachable from
/// here dies with [`SyncSession::shutdown`].
pub struct SyncSession {
    coordinator: SyncCoordinator,
    manager: Arc<ConnectionManager>,
    status_rx: Option<mpsc::UnboundedReceiver<StatusUpdate>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    /// Validate the config and spawn the role-appropriate services
    pub fn start(config: Config, sink: Arc<dyn ClipboardSink>) -> crate::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        info!(
            "starting sync session as {} (channel port {}, discovery port {})",
            config.role, config.channel_port, config.discovery_port
        );

        let (manager, status_rx, inbound_rx) = ConnectionManager::new(Arc::clone(&config));
        let discovery = Arc::new(DiscoveryService::new(Arc::clone(&config)));

        let mut tasks = Vec::new();
        match config.role {
            ConnectionRole::Acceptor => {
                tasks.push(tokio::spawn(Arc::clone(&manager).run_acceptor()));
                tasks.push(tokio::spawn(discovery.run_responder()));
            }
            ConnectionRole::Initiator => {
                // Latest-value-wins, like the clipboard itself: the dialer
                // only ever sees the newest discovered address.
                let (addr_tx, addr_rx) = watch::channel(None);
                tasks.push(tokio::spawn(
                    discovery.run_broadcaster(manager.state_watch(), addr_tx),
                ));
                tasks.push(tokio::spawn(Arc::clone(&manager).run_initiator(addr_rx)));
            }
        }
        tasks.push(tokio::spawn(dispatch(inbound_rx, sink)));

        Ok(Self {
            coordinator: SyncCoordinator::new(Arc::clone(&manager)),
            manager,
            status_rx: Some(status_rx),
            tasks,
        })
    }

    /// The façade for sending local clipboard changes
    pub fn coordinator(&self) -> SyncCoordinator {
        self.coordinator.clone()
    }

    /// Take the stream of human-readable status updates
    pub fn status_updates(&mut self) -> Option<mpsc::UnboundedReceiver<StatusUpdate>> {
        self.status_rx.take()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Close the channel and cancel every task and timer; idempotent
    pub async fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        info!("shutting down sync session");
        self.manager.shutdown().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
