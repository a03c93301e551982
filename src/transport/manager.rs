//! Connection lifecycle management
//!
//! The manager owns the current channel handle and the connection state for
//! the whole process. The acceptor side binds the channel port and adopts at
//! most one inbound peer at a time; the initiator side dials discovered
//! addresses with bounded backoff. Both sides funnel everything through the
//! same session pump, which applies [`transition`] per event and emits a
//! human-readable status update on every state change.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::transport::{
    transition, ChannelConfig, ChannelEvent, ChannelHandle, ConnectionRole, ConnectionState,
    RetryState, SyncMessage, TransportError,
};

/// Human-readable connection status, emitted on every state transition
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    /// State after the transition
    pub state: ConnectionState,
    /// Status line for the UI/status sink
    pub message: String,
}

/// Owns the duplex channel lifecycle for one process
pub struct ConnectionManager {
    role: ConnectionRole,
    config: Arc<Config>,
    current: Mutex<Option<ChannelHandle>>,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
    inbound_tx: mpsc::UnboundedSender<SyncMessage>,
}

impl ConnectionManager {
    /// Create a manager along with its status and inbound message streams
    pub fn new(
        config: Arc<Config>,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<StatusUpdate>,
        mpsc::UnboundedReceiver<SyncMessage>,
    ) {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        let manager = Arc::new(Self {
            role: config.role,
            config,
            current: Mutex::new(None),
            state_tx,
            status_tx,
            inbound_tx,
        });

        (manager, status_rx, inbound_rx)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state changes (used by discovery to pause broadcasts)
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Forward a message over the current channel
    ///
    /// Fails with [`TransportError::NotOpen`] unless the state is `Open`.
    pub async fn send(&self, message: SyncMessage) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Open {
            return Err(TransportError::NotOpen);
        }
        match self.current.lock().await.as_ref() {
            Some(handle) => handle.send(message),
            None => Err(TransportError::NotOpen),
        }
    }

    /// Close any open channel; idempotent
    pub async fn shutdown(&self) {
        if let Some(handle) = self.current.lock().await.take() {
            handle.close();
        }
    }

    /// Apply one event to the state machine, announcing any change
    fn apply(&self, event: &ChannelEvent) {
        let old = self.state();
        let new = transition(old, event);
        if new == old {
            return;
        }
        self.state_tx.send_replace(new);
        let message = status_message(new);
        info!("connection {} -> {} ({})", old, new, message);
        let _ = self.status_tx.send(StatusUpdate {
            state: new,
            message,
        });
    }

    /// Acceptor loop: bind the channel port and adopt one peer at a time
    ///
    /// Runs forever. Bind failures are probed and retried, accept errors
    /// trigger a rebind, and extra inbound connections are dropped while a
    /// peer is active.
    pub async fn run_acceptor(self: Arc<Self>) {
        let port = self.config.channel_port;
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));

        loop {
            let listener = match TcpListener::bind(bind_addr).await {
                Ok(listener) => listener,
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    self.wait_for_port(port).await;
                    continue;
                }
                Err(e) => {
                    error!("failed to bind channel listener on {}: {}", bind_addr, e);
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };
            info!("listening for peer on {}", bind_addr);

            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed, rebinding listener: {}", e);
                        break;
                    }
                };

                // At most one active peer; extra connections are dropped.
                if !self.state().is_settled() {
                    debug!("rejecting {} while a peer is active", peer_addr);
                    continue;
                }

                let ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        warn!("websocket upgrade from {} failed: {}", peer_addr, e);
                        continue;
                    }
                };

                info!("inbound connection from {}", peer_addr);
                self.apply(&ChannelEvent::TransportOpen);
                let manager = Arc::clone(&self);
                tokio::spawn(async move {
                    manager.run_session(ws).await;
                });
            }
        }
    }

    /// Probe a contended channel port before retrying the bind
    ///
    /// If the occupant still answers a connect it is alive and we wait
    /// longer; an unresponsive occupant usually means the port is about to
    /// free up.
    async fn wait_for_port(&self, port: u16) {
        let probe = tokio::time::timeout(
            Duration::from_secs(1),
            TcpStream::connect((Ipv4Addr::LOCALHOST, port)),
        )
        .await;
        match probe {
            Ok(Ok(_)) => {
                warn!("channel port {} held by a live process, waiting", port);
                sleep(Duration::from_secs(5)).await;
            }
            _ => {
                debug!("channel port {} busy but unresponsive, retrying bind", port);
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// Initiator loop: dial the latest discovered address with bounded backoff
    ///
    /// The watch holds only the most recent validated reply, so replies that
    /// pile up during a slow retry cycle collapse into one dial of the newest
    /// address. Addresses observed while a connection is active are ignored;
    /// the discovery service surfaces a fresh one once the channel closes.
    pub async fn run_initiator(
        self: Arc<Self>,
        mut addr_rx: watch::Receiver<Option<Ipv4Addr>>,
    ) {
        while addr_rx.changed().await.is_ok() {
            let addr = match *addr_rx.borrow_and_update() {
                Some(addr) => addr,
                None => continue,
            };
            if !self.state().is_settled() {
                debug!("ignoring discovered {} while a connection is active", addr);
                continue;
            }
            self.connect_with_retry(addr).await;
        }
    }

    /// Dial one address until it yields an open channel or retries run out
    async fn connect_with_retry(&self, addr: Ipv4Addr) {
        let url = format!("ws://{}:{}", addr, self.config.channel_port);
        let mut retry = RetryState::new(&self.config.retry);

        loop {
            self.apply(&ChannelEvent::DialStarted);
            info!("dialing {} (attempt {})", url, retry.attempt() + 1);

            let dial = tokio::time::timeout(
                self.config.handshake_timeout(),
                connect_async(url.as_str()),
            )
            .await;

            match dial {
                Ok(Ok((ws, _response))) => {
                    self.apply(&ChannelEvent::TransportOpen);
                    if self.run_session(ws).await {
                        // The channel was open for real; discovery takes over
                        // again now that it has closed. The next address gets
                        // a fresh backoff schedule.
                        return;
                    }
                    // Fell over before Open; counts as a failed attempt.
                }
                Ok(Err(e)) => {
                    warn!("dial to {} failed: {}", url, e);
                    self.apply(&ChannelEvent::DialFailed);
                }
                Err(_) => {
                    warn!(
                        "dial to {} timed out after {:?}",
                        url,
                        self.config.handshake_timeout()
                    );
                    self.apply(&ChannelEvent::DialFailed);
                }
            }

            match retry.next_delay() {
                Some(delay) => {
                    debug!("retrying {} in {:?}", addr, delay);
                    sleep(delay).await;
                }
                None => {
                    warn!(
                        "giving up on {} after {} attempts, resuming discovery",
                        addr,
                        retry.attempt()
                    );
                    let _ = self.status_tx.send(StatusUpdate {
                        state: self.state(),
                        message: "not connected, searching for peer".to_string(),
                    });
                    return;
                }
            }
        }
    }

    /// Drive one channel session from handshake to teardown
    ///
    /// Returns whether the channel ever reached `Open`. On return the state
    /// is `Closed` and the current channel reference is cleared.
    async fn run_session<S>(&self, ws: WebSocketStream<S>) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let channel_config = ChannelConfig {
            role: self.role,
            heartbeat_interval: self.config.heartbeat_interval(),
            handshake_timeout: self.config.handshake_timeout(),
        };
        let handle = ChannelHandle::spawn(ws, channel_config, events_tx);
        *self.current.lock().await = Some(handle);

        let mut reached_open = false;
        while let Some(event) = events_rx.recv().await {
            match event {
                ChannelEvent::Inbound(message) => {
                    let _ = self.inbound_tx.send(message);
                }
                event => {
                    self.apply(&event);
                    if self.state() == ConnectionState::Open {
                        reached_open = true;
                    }
                }
            }
        }

        // Driver is gone: clear the channel reference, then settle the state.
        self.current.lock().await.take();
        if !self.state().is_settled() {
            self.apply(&ChannelEvent::TransportClosed);
        }
        if self.state() == ConnectionState::Closing {
            self.apply(&ChannelEvent::TransportClosed);
        }
        reached_open
    }
}

fn status_message(state: ConnectionState) -> String {
    match state {
        ConnectionState::Idle => "idle".to_string(),
        ConnectionState::Connecting => "connecting to peer".to_string(),
        ConnectionState::AwaitingHandshake => "negotiating with peer".to_string(),
        ConnectionState::Open => "connected to peer".to_string(),
        ConnectionState::Closing => "disconnected".to_string(),
        ConnectionState::Closed => "not connected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> (
        Arc<ConnectionManager>,
        mpsc::UnboundedReceiver<StatusUpdate>,
        mpsc::UnboundedReceiver<SyncMessage>,
    ) {
        ConnectionManager::new(Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn test_send_requires_open_channel() {
        let (manager, _status, _inbound) = test_manager();
        let result = manager.send(SyncMessage::Text("dropped".to_string())).await;
        assert!(matches!(result, Err(TransportError::NotOpen)));
    }

    #[tokio::test]
    async fn test_apply_emits_status_per_transition() {
        let (manager, mut status_rx, _inbound) = test_manager();

        manager.apply(&ChannelEvent::TransportOpen);
        manager.apply(&ChannelEvent::PeerConfirmed);
        manager.apply(&ChannelEvent::HeartbeatExpired);
        manager.apply(&ChannelEvent::TransportClosed);

        let states: Vec<ConnectionState> = std::iter::from_fn(|| {
            status_rx.try_recv().ok().map(|update| update.state)
        })
        .collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::AwaitingHandshake,
                ConnectionState::Open,
                ConnectionState::Closing,
                ConnectionState::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_no_status_for_no_op_events() {
        let (manager, mut status_rx, _inbound) = test_manager();
        // Inbound events and impossible transitions stay silent
        manager.apply(&ChannelEvent::PeerConfirmed);
        manager.apply(&ChannelEvent::Inbound(SyncMessage::Text("x".to_string())));
        assert!(status_rx.try_recv().is_err());
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_without_channel_is_noop() {
        let (manager, _status, _inbound) = test_manager();
        manager.shutdown().await;
        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Idle);
    }
}
