//! Client to server events
//!
//! Carried as op 3 (Event) with the event name in `t` and the payload in `d`.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::entities::{Attachment, ChannelSpec, PresenceStatus};
use crate::value_objects::Snowflake;

/// Maximum message content length in characters
pub const MAX_CONTENT_LEN: u64 = 4000;

/// Every event a client may send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinChannel(ChannelRef),
    LeaveChannel(ChannelRef),
    SendMessage(SendMessage),
    EditMessage(EditMessage),
    DeleteMessage(MessageRef),
    AddReaction(ReactionChange),
    RemoveReaction(ReactionChange),
    TypingStart(ChannelRef),
    TypingStop(ChannelRef),
    CreateChannel(ChannelSpec),
    StartConversation(StartConversation),
    SendDirectMessage(SendDirectMessage),
    MarkMessagesRead(ConversationRef),
    GetOnlineUsers,
    UpdateStatus(UpdateStatus),
}

impl ClientEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChannel(_) => "join_channel",
            Self::LeaveChannel(_) => "leave_channel",
            Self::SendMessage(_) => "send_message",
            Self::EditMessage(_) => "edit_message",
            Self::DeleteMessage(_) => "delete_message",
            Self::AddReaction(_) => "add_reaction",
            Self::RemoveReaction(_) => "remove_reaction",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::CreateChannel(_) => "create_channel",
            Self::StartConversation(_) => "start_conversation",
            Self::SendDirectMessage(_) => "send_direct_message",
            Self::MarkMessagesRead(_) => "mark_messages_read",
            Self::GetOnlineUsers => "get_online_users",
            Self::UpdateStatus(_) => "update_status",
        }
    }

    /// Run field validation for payloads that carry user input
    pub fn validate_payload(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::SendMessage(payload) => payload.validate(),
            Self::EditMessage(payload) => payload.validate(),
            Self::AddReaction(payload) | Self::RemoveReaction(payload) => payload.validate(),
            Self::CreateChannel(payload) => payload.validate(),
            Self::StartConversation(payload) => payload.validate(),
            Self::SendDirectMessage(payload) => payload.validate(),
            _ => Ok(()),
        }
    }

    /// Client-local id carried by sends, echoed back on errors
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            Self::SendMessage(payload) => Some(&payload.temp_id),
            Self::SendDirectMessage(payload) => Some(&payload.temp_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub channel_id: Snowflake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: Snowflake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: Snowflake,
}

/// New channel message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_send_body"))]
pub struct SendMessage {
    pub channel_id: Snowflake,
    #[validate(length(max = 4000, message = "Message content must be at most 4000 characters"))]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub temp_id: String,
}

/// New direct thread message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_direct_body"))]
pub struct SendDirectMessage {
    pub conversation_id: Snowflake,
    #[validate(length(max = 4000, message = "Message content must be at most 4000 characters"))]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub temp_id: String,
}

fn validate_send_body(payload: &SendMessage) -> Result<(), ValidationError> {
    require_body(&payload.content, &payload.attachments)
}

fn validate_direct_body(payload: &SendDirectMessage) -> Result<(), ValidationError> {
    require_body(&payload.content, &payload.attachments)
}

// A message needs visible text or at least one attachment
fn require_body(content: &str, attachments: &[Attachment]) -> Result<(), ValidationError> {
    if content.trim().is_empty() && attachments.is_empty() {
        let mut err = ValidationError::new("empty_message");
        err.message = Some("Message must have content or attachments".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub message_id: Snowflake,
    #[validate(length(min = 1, max = 4000, message = "Message content must be 1-4000 characters"))]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReactionChange {
    pub message_id: Snowflake,
    #[validate(length(min = 1, max = 64, message = "Emoji must be 1-64 characters"))]
    pub emoji: String,
}

/// Find-or-create a direct thread with another user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartConversation {
    pub receiver_id: Snowflake,
    #[validate(length(min = 1, max = 100, message = "Receiver name must be 1-100 characters"))]
    pub receiver_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email(message = "Invalid email format"))]
    pub receiver_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub status: PresenceStatus,
}
