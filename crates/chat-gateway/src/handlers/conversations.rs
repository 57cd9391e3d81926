//! Conversation events: join/leave, channel creation, direct threads, read markers

use super::TypingHandler;
use crate::connection::{Connection, Exclude};
use crate::server::GatewayState;
use chat_core::protocol::{ChannelMessages, ConversationRef, NewChannel, NewDirectMessage, StartConversation};
use chat_core::{
    ChannelSpec, Conversation, ConversationKind, DomainError, ServerEvent, Snowflake, StoreResult,
    UserSummary,
};

/// Handles conversation events
pub struct ConversationHandler;

impl ConversationHandler {
    /// Load a conversation the user may read and post in
    pub async fn accessible(state: &GatewayState, conversation_id: Snowflake, user_id: Snowflake) -> StoreResult<Conversation> {
        let conversation = state
            .store()
            .find_conversation(conversation_id)
            .await?
            .ok_or(DomainError::ConversationNotFound(conversation_id))?;

        if !conversation.can_access(user_id) {
            return Err(DomainError::NotConversationMember);
        }
        Ok(conversation)
    }

    /// Subscribe to a conversation and reply with its recent history
    ///
    /// Runs under the conversation's sequencer lock, so no message falls
    /// between the snapshot and the live stream.
    pub async fn join(state: &GatewayState, connection: &Connection, user: &UserSummary, conversation_id: Snowflake) -> StoreResult<()> {
        let conversation = Self::accessible(state, conversation_id, user.id).await?;

        let _guard = state.sequencer().lock(conversation.id).await;
        let messages = state
            .store()
            .recent_messages(conversation.id, state.config().realtime.history_limit)
            .await?;
        state.connection_manager().subscribe(connection, conversation.id);

        tracing::debug!(
            session_id = %connection.session_id(),
            conversation_id = %conversation.id,
            messages = messages.len(),
            "Joined conversation"
        );

        connection.dispatch(&ServerEvent::ChannelMessages(ChannelMessages {
            channel_id: conversation.id,
            messages,
        }));
        Ok(())
    }

    pub async fn leave(state: &GatewayState, connection: &Connection, user: &UserSummary, conversation_id: Snowflake) -> StoreResult<()> {
        state.connection_manager().unsubscribe(connection, conversation_id);
        TypingHandler::stop(state, user, conversation_id).await;
        Ok(())
    }

    /// Create a channel and announce it to everyone who can see it
    pub async fn create_channel(state: &GatewayState, user: &UserSummary, spec: ChannelSpec) -> StoreResult<()> {
        let channel = Conversation::channel(state.ids().generate(), spec, user.id);
        state.store().insert_conversation(&channel).await?;

        tracing::info!(conversation_id = %channel.id, creator = %user.id, "Channel created");

        let manager = state.connection_manager();
        let members = match &channel.kind {
            ConversationKind::Channel {
                is_private: true,
                member_ids,
                ..
            } => Some(member_ids.clone()),
            _ => None,
        };
        let event = ServerEvent::NewChannel(NewChannel { channel });
        match members {
            Some(members) => {
                for member in members {
                    manager.send_to_user(member, &event, Exclude::Nobody);
                }
            }
            None => {
                manager.broadcast(&event, Exclude::Nobody);
            }
        }
        Ok(())
    }

    /// Find or create the direct thread with another user
    ///
    /// The caller's connections always learn the thread; the receiver only
    /// when it was just created.
    pub async fn start_direct(state: &GatewayState, user: &UserSummary, request: StartConversation) -> StoreResult<()> {
        let receiver = UserSummary::new(request.receiver_id, request.receiver_name);
        let candidate = Conversation::direct(state.ids().generate(), user.clone(), receiver)?;
        let (conversation, created) = state.store().find_or_create_direct(candidate).await?;

        tracing::debug!(
            conversation_id = %conversation.id,
            user_id = %user.id,
            receiver_id = %request.receiver_id,
            created,
            "Direct thread resolved"
        );

        let event = ServerEvent::NewDirectMessage(NewDirectMessage {
            message: None,
            conversation,
        });
        let manager = state.connection_manager();
        manager.send_to_user(user.id, &event, Exclude::Nobody);
        if created {
            manager.send_to_user(request.receiver_id, &event, Exclude::Nobody);
        }
        Ok(())
    }

    /// Reset the caller's unread counter and sync their other connections
    pub async fn mark_read(state: &GatewayState, connection: &Connection, user: &UserSummary, conversation_id: Snowflake) -> StoreResult<()> {
        Self::accessible(state, conversation_id, user.id).await?;
        state.store().reset_unread(conversation_id, user.id).await?;

        state.connection_manager().send_to_user(
            user.id,
            &ServerEvent::MessagesRead(ConversationRef { conversation_id }),
            Exclude::Session(connection.session_id()),
        );
        Ok(())
    }
}
