//! Transport session - the client end of the gateway protocol
//!
//! Owns the socket, the Hello/Identify handshake, heartbeats and reconnection
//! with exponential backoff. Server events reach consumers through typed
//! [`SessionEvent`]s or raw per-event handlers.

mod driver;
mod events;
mod session;

pub use events::{ConnectionState, DisconnectReason, SessionEvent};
pub use session::{Subscription, TransportSession};
