//! Heartbeat handler (op 1)

use super::HandlerResult;
use crate::connection::Connection;
use chat_core::{CloseCode, GatewayMessage};
use std::sync::Arc;

/// Handles heartbeat messages
pub struct HeartbeatHandler;

impl HeartbeatHandler {
    /// Handle a heartbeat from the client
    ///
    /// The `last_sequence` is the client's last received sequence number (or None if none received).
    pub fn handle(connection: &Arc<Connection>, last_sequence: Option<u64>) -> HandlerResult<Option<CloseCode>> {
        connection.record_heartbeat();

        tracing::trace!(
            session_id = %connection.session_id(),
            client_seq = ?last_sequence,
            server_seq = connection.current_sequence(),
            "Heartbeat received"
        );

        if !connection.send(GatewayMessage::heartbeat_ack()) {
            tracing::warn!(session_id = %connection.session_id(), "Failed to queue heartbeat ACK");
        }

        Ok(None)
    }
}
