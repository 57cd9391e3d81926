//! Typing events
//!
//! Starts are broadcast once per burst; refreshes only extend the server
//! TTL. Stops are broadcast on `typing_stop`, on send, on leave, on the
//! user's last disconnect, and by the expiry sweep.

use super::ConversationHandler;
use crate::connection::Exclude;
use crate::server::GatewayState;
use chat_core::protocol::TypingUpdate;
use chat_core::{Conversation, ServerEvent, Snowflake, StoreResult, UserSummary};
use tokio::time::Instant;

pub struct TypingHandler;

impl TypingHandler {
    pub async fn start(state: &GatewayState, user: &UserSummary, conversation_id: Snowflake) -> StoreResult<()> {
        let conversation = ConversationHandler::accessible(state, conversation_id, user.id).await?;

        if state.typing().start(conversation.id, user, Instant::now()) {
            state.connection_manager().send_to_conversation(
                &conversation,
                &ServerEvent::UserTyping(TypingUpdate {
                    channel_id: conversation.id,
                    user: user.clone(),
                }),
                Exclude::User(user.id),
            );
        }
        Ok(())
    }

    /// Stop typing in a conversation known by id
    pub async fn stop(state: &GatewayState, user: &UserSummary, conversation_id: Snowflake) {
        if let Some(user) = state.typing().stop(conversation_id, user.id) {
            Self::broadcast_stop(state, conversation_id, user).await;
        }
    }

    /// Stop typing in an already loaded conversation
    pub fn stop_in(state: &GatewayState, conversation: &Conversation, user_id: Snowflake) {
        if let Some(user) = state.typing().stop(conversation.id, user_id) {
            Self::send_stop(state, conversation, user);
        }
    }

    /// Stop a user everywhere
    pub async fn stop_everywhere(state: &GatewayState, user_id: Snowflake) {
        for (conversation_id, user) in state.typing().stop_user(user_id) {
            Self::broadcast_stop(state, conversation_id, user).await;
        }
    }

    /// Expire stale typing entries; returns how many were stopped
    pub async fn sweep(state: &GatewayState) -> usize {
        let expired = state.typing().expire(Instant::now());
        let count = expired.len();
        for (conversation_id, user) in expired {
            Self::broadcast_stop(state, conversation_id, user).await;
        }
        if count > 0 {
            tracing::trace!(count, "Expired typing indicators");
        }
        count
    }

    async fn broadcast_stop(state: &GatewayState, conversation_id: Snowflake, user: UserSummary) {
        match state.store().find_conversation(conversation_id).await {
            Ok(Some(conversation)) => Self::send_stop(state, &conversation, user),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to load conversation for typing stop");
            }
        }
    }

    fn send_stop(state: &GatewayState, conversation: &Conversation, user: UserSummary) {
        let user_id = user.id;
        state.connection_manager().send_to_conversation(
            conversation,
            &ServerEvent::UserStoppedTyping(TypingUpdate {
                channel_id: conversation.id,
                user,
            }),
            Exclude::User(user_id),
        );
    }
}
