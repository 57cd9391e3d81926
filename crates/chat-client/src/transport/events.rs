//! Connection states and session events

use chat_core::protocol::ReadyPayload;
use chat_core::ServerEvent;

/// Connection state of a [`TransportSession`](super::TransportSession)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Why a connected session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The gateway sent a close frame
    Closed { code: u16, reason: String },
    /// No heartbeat ACK for two intervals
    HeartbeatTimeout,
    /// Socket error or end of stream
    Network(String),
    /// `disconnect()` was called
    Requested,
    /// The credential was rejected; no retry follows
    AuthenticationFailed,
    /// The gateway invalidated the session
    InvalidSession,
}

impl DisconnectReason {
    /// Check if the driver will try to reconnect after this
    pub fn will_retry(&self) -> bool {
        !matches!(self, Self::Requested | Self::AuthenticationFailed)
    }
}

/// Typed session lifecycle and server events, in arrival order
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake complete
    Connected { ready: ReadyPayload },
    Disconnected { reason: DisconnectReason },
    Event(ServerEvent),
}
