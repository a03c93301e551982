//! Live duplex channel driver
//!
//! One task per connection owns the WebSocket stream end to end: it sends our
//! ConnectionConfirm as soon as the transport opens, enforces the handshake
//! deadline, runs the heartbeat probe once the channel is open, and reports
//! everything that happens upstream as [`ChannelEvent`]s. The driver never
//! lets a bad frame escape into the transport layer; malformed messages are
//! logged and dropped.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{Bytes, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::transport::{ChannelEvent, ConnectionRole, HeartbeatCounter, SyncMessage, TransportError};

/// Per-channel timing configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Role label sent in our ConnectionConfirm
    pub role: ConnectionRole,
    /// Probe period once the channel is open
    pub heartbeat_interval: Duration,
    /// Deadline for the mutual confirmation exchange
    pub handshake_timeout: Duration,
}

/// Handle to a spawned channel driver
///
/// Owned exclusively by the connection manager; dropping the handle (or
/// calling [`ChannelHandle::close`]) tears the channel down.
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<SyncMessage>,
    close_tx: mpsc::UnboundedSender<()>,
}

impl ChannelHandle {
    /// Spawn a driver task for an established transport connection
    ///
    /// Channel lifecycle notices arrive on `events`; the sender is dropped
    /// when the driver exits, which is the teardown signal for the caller.
    pub fn spawn<S>(
        ws: WebSocketStream<S>,
        config: ChannelConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(ws, config, events, outbound_rx, close_rx));

        Self {
            outbound: outbound_tx,
            close_tx,
        }
    }

    /// Queue a message for the peer
    pub fn send(&self, message: SyncMessage) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .map_err(|_| TransportError::NotOpen)
    }

    /// Ask the driver to close the channel; safe to call more than once
    pub fn close(&self) {
        let _ = self.close_tx.send(());
    }
}

async fn run<S>(
    ws: WebSocketStream<S>,
    config: ChannelConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<SyncMessage>,
    mut close_rx: mpsc::UnboundedReceiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    // Our half of the mutual confirmation goes out immediately.
    let confirm = SyncMessage::ConnectionConfirm(config.role.label().to_string());
    let frame = match confirm.encode() {
        Ok(frame) => frame,
        Err(e) => {
            warn!("failed to encode handshake message: {}", e);
            let _ = events.send(ChannelEvent::TransportClosed);
            return;
        }
    };
    if sink.send(WsMessage::text(frame)).await.is_err() {
        let _ = events.send(ChannelEvent::TransportClosed);
        return;
    }

    let mut open = false;
    let mut heartbeat = HeartbeatCounter::default();
    let mut probe = tokio::time::interval(config.heartbeat_interval);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let handshake_deadline = tokio::time::sleep(config.handshake_timeout);
    tokio::pin!(handshake_deadline);

    let reason = loop {
        tokio::select! {
            _ = &mut handshake_deadline, if !open => {
                warn!(
                    "peer did not confirm within {:?}, dropping connection",
                    config.handshake_timeout
                );
                break ChannelEvent::TransportClosed;
            }

            _ = probe.tick(), if open => {
                if heartbeat.expired() {
                    warn!("heartbeat silence exceeded threshold, forcing teardown");
                    break ChannelEvent::HeartbeatExpired;
                }
                heartbeat.probe_sent();
                if sink.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break ChannelEvent::TransportClosed;
                }
            }

            message = outbound_rx.recv() => match message {
                Some(message) if open => {
                    match message.encode() {
                        Ok(frame) => {
                            let kind = message.kind();
                            if sink.send(WsMessage::text(frame)).await.is_err() {
                                break ChannelEvent::TransportClosed;
                            }
                            debug!("sent {} message", kind);
                        }
                        Err(e) => warn!("failed to encode outbound message: {}", e),
                    }
                }
                Some(message) => {
                    debug!("dropping {} message, channel not yet open", message.kind());
                }
                None => break ChannelEvent::CloseRequested,
            },

            _ = close_rx.recv() => break ChannelEvent::CloseRequested,

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match SyncMessage::decode(text.as_str()) {
                    Ok(SyncMessage::ConnectionConfirm(label)) if !open => {
                        open = true;
                        heartbeat.acknowledged();
                        probe.reset();
                        debug!(peer_role = %label, "peer confirmed, channel open");
                        let _ = events.send(ChannelEvent::PeerConfirmed);
                    }
                    Ok(message) if open => {
                        let _ = events.send(ChannelEvent::Inbound(message));
                    }
                    Ok(message) => {
                        debug!("ignoring {} message before handshake", message.kind());
                    }
                    Err(e) => {
                        // Protocol error: drop the frame, keep the channel.
                        warn!("dropping malformed frame: {}", e);
                    }
                },
                Some(Ok(WsMessage::Pong(_))) => heartbeat.acknowledged(),
                Some(Ok(WsMessage::Ping(payload))) => {
                    if sink.send(WsMessage::Pong(payload)).await.is_err() {
                        break ChannelEvent::TransportClosed;
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    warn!("dropping unexpected binary frame of {} bytes", data.len());
                }
                Some(Ok(WsMessage::Close(_))) => {
                    debug!("peer closed the channel");
                    break ChannelEvent::TransportClosed;
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    warn!("websocket error: {}", e);
                    break ChannelEvent::TransportClosed;
                }
                None => break ChannelEvent::TransportClosed,
            },
        }
    };

    if matches!(reason, ChannelEvent::CloseRequested) {
        let _ = sink.send(WsMessage::Close(None)).await;
    }
    let _ = events.send(reason);
    // Dropping `events` here is the teardown signal for the session pump.
}
