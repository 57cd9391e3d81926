//! Op code handlers
//!
//! Handles incoming WebSocket messages based on their operation code.

mod conversations;
mod error;
mod events;
mod heartbeat;
mod identify;
mod messages;
mod presence;
mod reactions;
mod typing;

pub use conversations::ConversationHandler;
pub use error::{HandlerError, HandlerResult};
pub use events::EventRouter;
pub use heartbeat::HeartbeatHandler;
pub use identify::IdentifyHandler;
pub use messages::{MessageHandler, Post};
pub use presence::PresenceHandler;
pub use reactions::ReactionHandler;
pub use typing::TypingHandler;

use crate::connection::Connection;
use crate::server::GatewayState;
use chat_core::protocol::ErrorPayload;
use chat_core::{CloseCode, GatewayMessage, OpCode, ServerEvent};
use std::sync::Arc;

/// Dispatch incoming client messages to appropriate handlers
pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Handle an incoming client message
    ///
    /// `Ok(Some(code))` asks the caller to close the socket with `code`.
    pub async fn dispatch(
        state: &GatewayState,
        connection: &Arc<Connection>,
        message: GatewayMessage,
    ) -> HandlerResult<Option<CloseCode>> {
        if !message.op.is_client_op() {
            tracing::warn!(
                session_id = %connection.session_id(),
                op = %message.op,
                "Received server-only op code from client"
            );
            return Ok(Some(CloseCode::UnknownOpcode));
        }

        match message.op {
            OpCode::Identify => {
                let payload = message
                    .as_identify()
                    .ok_or_else(|| HandlerError::InvalidPayload("Invalid Identify payload".to_string()))?;

                IdentifyHandler::handle(state, connection, payload).await
            }
            OpCode::Heartbeat => {
                let seq = message
                    .as_heartbeat_seq()
                    .ok_or_else(|| HandlerError::InvalidPayload("Invalid Heartbeat payload".to_string()))?;

                HeartbeatHandler::handle(connection, seq)
            }
            OpCode::Event => {
                let Some(user) = connection.user().cloned() else {
                    return Err(HandlerError::NotAuthenticated);
                };

                match message.as_client_event() {
                    Some(Ok(event)) => {
                        EventRouter::route(state, connection, &user, event).await;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(
                            session_id = %connection.session_id(),
                            event = ?message.t,
                            error = %e,
                            "Unreadable client event"
                        );
                        connection.dispatch(&ServerEvent::Error(ErrorPayload::new(
                            "INVALID_EVENT",
                            format!("Invalid event: {e}"),
                        )));
                    }
                    None => {
                        return Err(HandlerError::InvalidPayload("Event without a name".to_string()));
                    }
                }
                Ok(None)
            }
            // These ops should never reach here due to is_client_op check
            _ => {
                tracing::error!(op = %message.op, "Unhandled client op code");
                Ok(Some(CloseCode::UnknownOpcode))
            }
        }
    }
}
