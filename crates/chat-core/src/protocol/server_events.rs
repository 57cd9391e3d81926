//! Server to client events
//!
//! Carried as op 0 (Dispatch) with the event name in `t` and the payload in `d`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payloads::ReadyPayload;
use super::ConversationRef;
use crate::entities::{Conversation, Message, PresenceRecord, PresenceStatus, Reactions, UserSummary};
use crate::error::DomainError;
use crate::value_objects::Snowflake;

/// Every event the gateway may dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready(ReadyPayload),
    OnlineUsers(OnlineUsers),
    UserOnline(UserOnline),
    UserOffline(UserOffline),
    UserStatusChanged(UserStatusChanged),
    NewMessage(MessageEnvelope),
    ChannelMessages(ChannelMessages),
    NewChannel(NewChannel),
    MessageConfirmed(MessageConfirmed),
    MessageEdited(MessageEdited),
    MessageDeleted(MessageDeleted),
    MessageReactionUpdated(ReactionsUpdated),
    UserTyping(TypingUpdate),
    UserStoppedTyping(TypingUpdate),
    NewDirectMessage(NewDirectMessage),
    MessagesRead(ConversationRef),
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::OnlineUsers(_) => "online_users",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::UserStatusChanged(_) => "user_status_changed",
            Self::NewMessage(_) => "new_message",
            Self::ChannelMessages(_) => "channel_messages",
            Self::NewChannel(_) => "new_channel",
            Self::MessageConfirmed(_) => "message_confirmed",
            Self::MessageEdited(_) => "message_edited",
            Self::MessageDeleted(_) => "message_deleted",
            Self::MessageReactionUpdated(_) => "message_reaction_updated",
            Self::UserTyping(_) => "user_typing",
            Self::UserStoppedTyping(_) => "user_stopped_typing",
            Self::NewDirectMessage(_) => "new_direct_message",
            Self::MessagesRead(_) => "messages_read",
            Self::Error(_) => "error",
        }
    }

    /// Conversation the event belongs to, if any
    pub fn conversation_id(&self) -> Option<Snowflake> {
        match self {
            Self::NewMessage(e) => Some(e.message.conversation_id),
            Self::ChannelMessages(e) => Some(e.channel_id),
            Self::NewChannel(e) => Some(e.channel.id),
            Self::MessageConfirmed(e) => Some(e.channel_id),
            Self::MessageEdited(e) => Some(e.channel_id),
            Self::MessageDeleted(e) => Some(e.channel_id),
            Self::MessageReactionUpdated(e) => Some(e.channel_id),
            Self::UserTyping(e) | Self::UserStoppedTyping(e) => Some(e.channel_id),
            Self::NewDirectMessage(e) => Some(e.conversation.id),
            Self::MessagesRead(e) => Some(e.conversation_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUsers {
    pub users: Vec<PresenceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOnline {
    pub uid: Snowflake,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOffline {
    pub uid: Snowflake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatusChanged {
    pub uid: Snowflake,
    pub status: PresenceStatus,
}

/// A confirmed message, plus the sender's `tempId` when it originated from a send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

/// History snapshot sent in response to `join_channel`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessages {
    pub channel_id: Snowflake,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChannel {
    pub channel: Conversation,
}

/// Confirmation sent to the originating connection only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageConfirmed {
    pub channel_id: Snowflake,
    pub temp_id: String,
    #[serde(flatten)]
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEdited {
    pub message_id: Snowflake,
    pub channel_id: Snowflake,
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: Snowflake,
    pub channel_id: Snowflake,
}

/// Full reaction aggregate of one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionsUpdated {
    pub message_id: Snowflake,
    pub channel_id: Snowflake,
    pub reactions: Reactions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub channel_id: Snowflake,
    pub user: UserSummary,
}

/// Direct thread activity
///
/// Without a message this announces the thread itself, e.g. as the answer to
/// `start_conversation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDirectMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageEnvelope>,
    pub conversation: Conversation,
}

/// Rejection of a client event, sent to the caller only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            temp_id: None,
        }
    }

    #[must_use]
    pub fn with_temp_id(mut self, temp_id: Option<String>) -> Self {
        self.temp_id = temp_id;
        self
    }
}

impl From<&DomainError> for ErrorPayload {
    fn from(err: &DomainError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}
