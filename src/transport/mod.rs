//! Duplex channel transport for clipboard synchronization
//!
//! This module owns the lifecycle of the WebSocket channel between the two
//! peers: the role-asymmetric connection state machine, the mutual
//! confirmation handshake, the heartbeat liveness probe, and the initiator's
//! bounded backoff retry. Connection state only changes through
//! [`transition`], driven by [`ChannelEvent`]s, so the retry/heartbeat/
//! teardown interactions stay auditable without real sockets.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod channel;
pub mod manager;
pub mod protocol;
pub mod retry;

pub use channel::{ChannelConfig, ChannelHandle};
pub use manager::{ConnectionManager, StatusUpdate};
pub use protocol::{DecodeError, FileEntry, SyncMessage};
pub use retry::RetryState;

/// Transport layer errors
///
/// Socket and protocol failures never surface here; the channel driver
/// turns them into [`ChannelEvent`]s and handles them locally.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No channel is open for sending
    #[error("Channel is not open")]
    NotOpen,
}

/// Which side of the pair this process plays, fixed for the process lifetime
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Binds the channel port and waits for one peer
    Acceptor,
    /// Discovers and dials the acceptor
    Initiator,
}

impl ConnectionRole {
    /// Role label carried in the ConnectionConfirm handshake message
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionRole::Acceptor => "acceptor",
            ConnectionRole::Initiator => "initiator",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Connection lifecycle states
///
/// Exactly one non-terminal connection exists at a time; a new attempt may
/// only start once the prior one reaches `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt in progress
    Idle,
    /// Dial in flight (initiator only)
    Connecting,
    /// Transport open, mutual confirmation not yet complete
    AwaitingHandshake,
    /// Confirmed in both directions; messages flow
    Open,
    /// Teardown started; no new sends accepted
    Closing,
    /// Terminal; a new attempt may begin
    Closed,
}

impl ConnectionState {
    /// Whether a new connection attempt may start from this state
    pub fn is_settled(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingHandshake => "awaiting handshake",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Events driving the connection state machine
#[derive(Debug)]
pub enum ChannelEvent {
    /// Initiator started dialing
    DialStarted,
    /// Transport-level connection is up (dial completed or inbound accepted)
    TransportOpen,
    /// Dial failed or timed out before the transport opened
    DialFailed,
    /// Peer's ConnectionConfirm arrived
    PeerConfirmed,
    /// A decoded payload message arrived; no state change
    Inbound(SyncMessage),
    /// Local close requested
    CloseRequested,
    /// Three consecutive heartbeat probes went unacknowledged
    HeartbeatExpired,
    /// Transport stream ended or errored
    TransportClosed,
}

/// Connection state transition function
///
/// Each event produces exactly one transition; combinations not listed leave
/// the state unchanged.
pub fn transition(state: ConnectionState, event: &ChannelEvent) -> ConnectionState {
    use ChannelEvent::*;
    use ConnectionState::*;

    match (state, event) {
        (Idle | Closed, DialStarted) => Connecting,
        (Idle | Closed, TransportOpen) => AwaitingHandshake,
        (Connecting, TransportOpen) => AwaitingHandshake,
        (Connecting, DialFailed | TransportClosed) => Closed,
        (AwaitingHandshake, PeerConfirmed) => Open,
        (AwaitingHandshake | Open, CloseRequested | HeartbeatExpired | TransportClosed) => Closing,
        (Closing, CloseRequested | TransportClosed | HeartbeatExpired) => Closed,
        (s, _) => s,
    }
}

/// Counter of consecutive unacknowledged heartbeat probes
///
/// Liveness is decided here, independent of transport close notifications,
/// which may never arrive on a half-open connection.
#[derive(Debug, Default)]
pub struct HeartbeatCounter {
    missed: u32,
}

impl HeartbeatCounter {
    /// Unacknowledged probes tolerated before forcing teardown
    pub const MAX_MISSED: u32 = 2;

    /// Record a probe being sent
    pub fn probe_sent(&mut self) {
        self.missed += 1;
    }

    /// Record an acknowledgement; any ack clears the whole streak
    pub fn acknowledged(&mut self) {
        self.missed = 0;
    }

    /// Whether the silence has exceeded the tolerated streak
    pub fn expired(&self) -> bool {
        self.missed > Self::MAX_MISSED
    }
}
