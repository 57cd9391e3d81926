//! Message events: send, edit, delete

use super::{ConversationHandler, TypingHandler};
use crate::connection::{Connection, Exclude};
use crate::server::GatewayState;
use chat_core::protocol::{
    EditMessage, MessageConfirmed, MessageDeleted, MessageEdited, MessageEnvelope, NewDirectMessage,
};
use chat_core::{
    Attachment, Conversation, ConversationKind, DomainError, Message, NewMessage, ServerEvent,
    Snowflake, StoreResult, UserSummary,
};
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

/// A send request, from either `send_message` or `send_direct_message`
#[derive(Debug, Clone)]
pub struct Post {
    pub conversation_id: Snowflake,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<Snowflake>,
    pub temp_id: String,
    /// Only accept a direct thread
    pub direct: bool,
}

/// Handles message events
pub struct MessageHandler;

impl MessageHandler {
    /// Sequence, store, and fan out a new message
    ///
    /// The sender's connection gets `message_confirmed`; everyone else in
    /// the audience gets `new_message` (or `new_direct_message`). A repeated
    /// `tempId` from the same sender is confirmed again without a second append.
    pub async fn send(state: &GatewayState, connection: &Connection, user: &UserSummary, post: Post) -> StoreResult<()> {
        let mut conversation = ConversationHandler::accessible(state, post.conversation_id, user.id).await?;
        if post.direct && !conversation.is_direct() {
            return Err(DomainError::ValidationError(format!(
                "Conversation {} is not a direct thread",
                conversation.id
            )));
        }

        let guard = state.sequencer().lock(conversation.id).await;
        if let Some(existing) = state
            .store()
            .find_by_temp_id(conversation.id, user.id, &post.temp_id)
            .await?
        {
            tracing::debug!(
                conversation_id = %conversation.id,
                message_id = %existing.id,
                temp_id = %post.temp_id,
                "Resent message already stored"
            );
            connection.dispatch(&ServerEvent::MessageConfirmed(MessageConfirmed {
                channel_id: conversation.id,
                temp_id: post.temp_id,
                message: existing,
            }));
            return Ok(());
        }

        let message = state
            .store()
            .append_message(NewMessage {
                id: state.ids().generate(),
                conversation_id: conversation.id,
                sender: user.clone(),
                content: post.content,
                attachments: post.attachments,
                reply_to: post.reply_to,
                temp_id: Some(post.temp_id.clone()),
            })
            .await?;

        connection.dispatch(&ServerEvent::MessageConfirmed(MessageConfirmed {
            channel_id: conversation.id,
            temp_id: post.temp_id.clone(),
            message: message.clone(),
        }));

        let envelope = MessageEnvelope {
            message: message.clone(),
            temp_id: Some(post.temp_id),
        };
        let event = if conversation.is_direct() {
            conversation.last_message = Some(message.preview());
            ServerEvent::NewDirectMessage(NewDirectMessage {
                message: Some(envelope),
                conversation: conversation.clone(),
            })
        } else {
            ServerEvent::NewMessage(envelope)
        };
        let delivered = state.connection_manager().send_to_conversation(
            &conversation,
            &event,
            Exclude::Session(connection.session_id()),
        );
        drop(guard);

        tracing::debug!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            seq = message.seq,
            delivered,
            "Message sent"
        );

        for recipient in unread_recipients(&conversation, user.id) {
            state.store().increment_unread(conversation.id, recipient).await?;
        }
        TypingHandler::stop_in(state, &conversation, user.id);
        Ok(())
    }

    pub async fn edit(state: &GatewayState, user: &UserSummary, request: EditMessage) -> StoreResult<()> {
        let (conversation, mut message, _guard) = Self::authored(state, user, request.message_id).await?;

        message.edit(request.content, Utc::now());
        state.store().update_message(&message).await?;

        state.connection_manager().send_to_conversation(
            &conversation,
            &ServerEvent::MessageEdited(MessageEdited {
                message_id: message.id,
                channel_id: conversation.id,
                content: message.content.clone(),
                edited_at: message.edited_at.unwrap_or_else(Utc::now),
            }),
            Exclude::Nobody,
        );
        Ok(())
    }

    /// Tombstone a message; the row stays for ordering continuity
    pub async fn delete(state: &GatewayState, user: &UserSummary, message_id: Snowflake) -> StoreResult<()> {
        let (conversation, mut message, _guard) = Self::authored(state, user, message_id).await?;

        message.tombstone();
        state.store().update_message(&message).await?;

        tracing::debug!(conversation_id = %conversation.id, message_id = %message_id, "Message deleted");

        state.connection_manager().send_to_conversation(
            &conversation,
            &ServerEvent::MessageDeleted(MessageDeleted {
                message_id,
                channel_id: conversation.id,
            }),
            Exclude::Nobody,
        );
        Ok(())
    }

    /// Lock the message's conversation and load a live message of the caller
    async fn authored(
        state: &GatewayState,
        user: &UserSummary,
        message_id: Snowflake,
    ) -> StoreResult<(Conversation, Message, OwnedMutexGuard<()>)> {
        let (conversation, message, guard) = Self::locked(state, user, message_id).await?;
        if message.sender_id != user.id {
            return Err(DomainError::NotMessageAuthor);
        }
        Ok((conversation, message, guard))
    }

    /// Lock the message's conversation and load a live message the caller may see
    ///
    /// The message is re-read under the lock so a concurrent delete wins.
    pub async fn locked(
        state: &GatewayState,
        user: &UserSummary,
        message_id: Snowflake,
    ) -> StoreResult<(Conversation, Message, OwnedMutexGuard<()>)> {
        let conversation_id = Self::find(state, message_id).await?.conversation_id;
        let conversation = ConversationHandler::accessible(state, conversation_id, user.id).await?;

        let guard = state.sequencer().lock(conversation_id).await;
        let message = Self::find(state, message_id).await?;
        if message.is_deleted {
            return Err(DomainError::MessageDeleted);
        }
        Ok((conversation, message, guard))
    }

    async fn find(state: &GatewayState, message_id: Snowflake) -> StoreResult<Message> {
        state
            .store()
            .find_message(message_id)
            .await?
            .ok_or(DomainError::MessageNotFound(message_id))
    }
}

/// Users whose unread counter a new message bumps
///
/// Public channels have no member list, so only direct threads and private
/// channels keep counters.
fn unread_recipients(conversation: &Conversation, sender: Snowflake) -> Vec<Snowflake> {
    match &conversation.kind {
        ConversationKind::Direct { participants, .. } => participants.other(sender).into_iter().collect(),
        ConversationKind::Channel {
            is_private: true,
            member_ids,
            ..
        } => member_ids.iter().copied().filter(|id| *id != sender).collect(),
        ConversationKind::Channel { .. } => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::ChannelSpec;

    fn user(id: i64) -> UserSummary {
        UserSummary::new(Snowflake::new(id), format!("user{id}"))
    }

    #[test]
    fn test_unread_recipients() {
        let dm = Conversation::direct(Snowflake::new(1), user(1), user(2)).unwrap();
        assert_eq!(unread_recipients(&dm, Snowflake::new(1)), vec![Snowflake::new(2)]);

        let mut spec = ChannelSpec::public("team");
        spec.is_private = true;
        spec.member_ids.insert(Snowflake::new(2));
        spec.member_ids.insert(Snowflake::new(3));
        let private = Conversation::channel(Snowflake::new(2), spec, Snowflake::new(1));
        assert_eq!(
            unread_recipients(&private, Snowflake::new(1)),
            vec![Snowflake::new(2), Snowflake::new(3)]
        );

        let public = Conversation::channel(Snowflake::new(3), ChannelSpec::public("general"), Snowflake::new(1));
        assert!(unread_recipients(&public, Snowflake::new(1)).is_empty());
    }
}
