//! Peer discovery over UDP broadcast
//!
//! The wire format is deliberately tiny: the initiator broadcasts a literal
//! marker datagram on every local interface, and the acceptor answers with
//! its chosen address as a bare dotted-quad string. The whole datagram is
//! the payload; there is no framing.
//!
//! The acceptor's responder restarts itself on socket errors instead of
//! propagating them. The initiator's broadcaster pauses while a channel is
//! open and validates every reply before handing it downstream; a reply
//! that does not parse as a strict dotted quad is logged and discarded, so
//! spoofed or malformed packets can never become a connect target.

pub mod interfaces;

pub use interfaces::{broadcast_targets, select_local_address, BroadcastTarget, LocalAddress};

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::transport::ConnectionState;

/// Query marker sent by the initiator; anything else is ignored
pub const QUERY_MARKER: &[u8] = b"CLIPBRIDGE?";

/// Pause before re-binding the responder socket after an error
const RESPONDER_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket error
    #[error("Discovery socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Role-asymmetric UDP discovery service
pub struct DiscoveryService {
    config: Arc<Config>,
}

impl DiscoveryService {
    /// Create a discovery service for this process
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Acceptor side: answer discovery queries with our chosen address
    ///
    /// Runs forever. Socket errors close the socket, wait, and re-bind
    /// rather than propagating.
    pub async fn run_responder(self: Arc<Self>) {
        let port = self.config.discovery_port;
        loop {
            if let Err(e) = self.respond_until_error(port).await {
                warn!("discovery responder error, restarting: {}", e);
                sleep(RESPONDER_RESTART_DELAY).await;
            }
        }
    }

    async fn respond_until_error(&self, port: u16) -> Result<(), DiscoveryError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        info!("discovery responder listening on port {}", port);

        let mut buf = [0u8; 256];
        loop {
            let (len, source) = socket.recv_from(&mut buf).await?;
            if &buf[..len] != QUERY_MARKER {
                debug!("ignoring non-query datagram from {}", source);
                continue;
            }

            // Address is selected fresh per query; interfaces may have
            // changed since the last one.
            let reply = select_local_address().ip.to_string();
            debug!("answering discovery query from {} with {}", source, reply);
            socket.send_to(reply.as_bytes(), source).await?;
        }
    }

    /// Initiator side: broadcast queries until a valid reply arrives
    ///
    /// Broadcasts go to every interface's subnet broadcast plus the global
    /// broadcast, on a fixed period, suppressed while a channel is open.
    /// `connect_tx` holds the latest validated reply: replies that arrive
    /// while the connection manager is busy dialing overwrite each other, so
    /// a long retry cycle resumes with the newest address, not a backlog.
    pub async fn run_broadcaster(
        self: Arc<Self>,
        state_rx: watch::Receiver<ConnectionState>,
        connect_tx: watch::Sender<Option<Ipv4Addr>>,
    ) {
        loop {
            let result = async {
                let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
                socket.set_broadcast(true)?;
                self.broadcast_on(socket, state_rx.clone(), &connect_tx).await
            }
            .await;
            if let Err(e) = result {
                warn!("discovery broadcaster error, restarting: {}", e);
                sleep(RESPONDER_RESTART_DELAY).await;
            }
        }
    }

    /// Drive the query/reply exchange on an already-bound socket
    ///
    /// Returns only on a socket error; [`DiscoveryService::run_broadcaster`]
    /// re-binds and calls back in.
    pub async fn broadcast_on(
        &self,
        socket: UdpSocket,
        state_rx: watch::Receiver<ConnectionState>,
        connect_tx: &watch::Sender<Option<Ipv4Addr>>,
    ) -> Result<(), DiscoveryError> {
        info!(
            "discovery broadcaster querying port {} every {:?}",
            self.config.discovery_port,
            self.config.broadcast_interval()
        );

        let mut tick = interval(self.config.broadcast_interval());
        let mut buf = [0u8; 256];

        loop {
            let channel_open = *state_rx.borrow() == ConnectionState::Open;

            tokio::select! {
                _ = tick.tick() => {
                    if channel_open {
                        continue;
                    }
                    self.send_queries(&socket).await;
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, source) = received?;
                    match validate_reply(&buf[..len]) {
                        Some(addr) => {
                            if channel_open {
                                debug!("ignoring reply from {}, channel already open", source);
                                continue;
                            }
                            info!("peer discovered at {} (reply from {})", addr, source);
                            connect_tx.send_replace(Some(addr));
                        }
                        None => {
                            warn!("discarding invalid discovery reply from {}", source);
                        }
                    }
                }
            }
        }
    }

    /// Send the query marker to every broadcast target
    ///
    /// Every interface is queried, not just the selected one: on multi-homed
    /// hosts the responder's reply route may differ from the interface the
    /// query arrived on. Send errors are logged per target, never fatal.
    async fn send_queries(&self, socket: &UdpSocket) {
        let port = self.config.discovery_port;
        for target in broadcast_targets() {
            for addr in [target.subnet, target.global] {
                if let Err(e) = socket.send_to(QUERY_MARKER, (addr, port)).await {
                    debug!("broadcast to {} failed: {}", addr, e);
                }
            }
        }
    }
}

/// Validate a discovery reply as a strict dotted-quad IPv4 address
///
/// Anything else is rejected so it can never be passed downstream as a
/// connect target.
pub fn validate_reply(raw: &[u8]) -> Option<Ipv4Addr> {
    let text = std::str::from_utf8(raw).ok()?;
    text.parse().ok()
}
