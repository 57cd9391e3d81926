//! Reaction events
//!
//! Add and remove are idempotent per (message, emoji, user). The full
//! aggregate is broadcast every time, including to the caller, so a client
//! with a pending toggle always settles.

use super::MessageHandler;
use crate::connection::Exclude;
use crate::server::GatewayState;
use chat_core::protocol::{ReactionChange, ReactionsUpdated};
use chat_core::{ServerEvent, StoreResult, UserSummary};

pub struct ReactionHandler;

impl ReactionHandler {
    pub async fn change(state: &GatewayState, user: &UserSummary, request: ReactionChange, add: bool) -> StoreResult<()> {
        let (conversation, mut message, _guard) = MessageHandler::locked(state, user, request.message_id).await?;

        let changed = if add {
            message.reactions.add(&request.emoji, user.id)
        } else {
            message.reactions.remove(&request.emoji, user.id)
        };
        if changed {
            state.store().update_message(&message).await?;
        }

        tracing::trace!(
            message_id = %message.id,
            emoji = %request.emoji,
            add,
            changed,
            "Reaction applied"
        );

        state.connection_manager().send_to_conversation(
            &conversation,
            &ServerEvent::MessageReactionUpdated(ReactionsUpdated {
                message_id: message.id,
                channel_id: conversation.id,
                reactions: message.reactions,
            }),
            Exclude::Nobody,
        );
        Ok(())
    }
}
