//! # ClipBridge
//!
//! Keeps the clipboards of two machines on the same local network in sync.
//!
//! One machine (the acceptor) listens for the other (the initiator). The pair
//! find each other through a UDP broadcast discovery exchange, then hold a
//! persistent WebSocket channel over which clipboard change events stream in
//! both directions. The channel self-heals: handshake timeouts, missed
//! heartbeats, and dropped sockets all funnel back into discovery and
//! reconnection without user intervention.
//!
//! Clipboard reading/writing and any UI are external collaborators; this
//! crate consumes "local content changed" events and emits "remote content
//! received" events through the [`sync`] module.

pub mod config;
pub mod discovery;
pub mod sync;
pub mod transport;

pub use config::Config;

/// Result type alias for ClipBridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ClipBridge operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Discovery error
    #[error("Discovery error: {0}")]
    Discovery(#[from] discovery::DiscoveryError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port for the duplex sync channel
pub const DEFAULT_CHANNEL_PORT: u16 = 3000;

/// Default port for the UDP discovery exchange
pub const DEFAULT_DISCOVERY_PORT: u16 = 3001;
