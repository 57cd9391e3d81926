//! Connection management
//!
//! Tracks WebSocket connections, their users, and joined conversations.

mod connection;
mod manager;

pub use connection::{Connection, Outbound};
pub use manager::{ConnectionManager, Departure, Exclude};
