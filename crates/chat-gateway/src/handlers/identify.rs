//! Identify handler (op 2)

use super::{HandlerError, HandlerResult, PresenceHandler};
use crate::connection::Connection;
use crate::server::GatewayState;
use chat_core::protocol::{IdentifyPayload, ReadyPayload};
use chat_core::{CloseCode, ServerEvent};
use std::sync::Arc;

/// Handles Identify messages
pub struct IdentifyHandler;

impl IdentifyHandler {
    /// Authenticate the connection and answer with `ready`
    pub async fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: IdentifyPayload,
    ) -> HandlerResult<Option<CloseCode>> {
        if connection.is_authenticated() {
            tracing::warn!(
                session_id = %connection.session_id(),
                "Client sent Identify while already authenticated"
            );
            return Ok(Some(CloseCode::AlreadyAuthenticated));
        }

        let claims = state
            .jwt_service()
            .validate_access_token(payload.bare_token())
            .map_err(|e| {
                tracing::debug!(session_id = %connection.session_id(), error = %e, "Token validation failed");
                HandlerError::AuthenticationFailed(e.to_string())
            })?;
        let user = claims.user()?;

        let conversations = state.store().conversations_for(user.id).await?;
        let unread = state.store().unread_for(user.id).await?;

        let first_session = state
            .connection_manager()
            .authenticate_connection(connection, user.clone());

        let ready = ReadyPayload {
            user: user.clone(),
            session_id: connection.session_id().to_string(),
            conversations,
            unread,
        };
        let conversation_count = ready.conversations.len();
        if !connection.dispatch(&ServerEvent::Ready(ready)) {
            return Err(HandlerError::Internal("Failed to queue ready".to_string()));
        }

        tracing::info!(
            session_id = %connection.session_id(),
            user_id = %user.id,
            name = %user.display_name,
            conversations = conversation_count,
            client = ?payload.properties.and_then(|p| p.client),
            "Client identified"
        );

        if first_session {
            PresenceHandler::announce_online(state, &user);
        }

        Ok(None)
    }
}
