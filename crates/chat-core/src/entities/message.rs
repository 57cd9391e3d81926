//! Message entity - a server-confirmed chat message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reaction::Reactions;
use crate::value_objects::Snowflake;

/// Maximum snippet length (in characters) for previews
pub const PREVIEW_LEN: usize = 80;

/// Message as confirmed by the server
///
/// `seq` is the per-conversation position assigned by the gateway sequencer;
/// it starts at 1 and has no gaps within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Snowflake,
    pub seq: u64,
    pub conversation_id: Snowflake,
    pub sender_id: Snowflake,
    pub sender_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Reactions::is_empty")]
    pub reactions: Reactions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    /// `tempId` the sender submitted this message with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl Message {
    /// Check if message has been edited
    #[inline]
    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }

    /// Replace the content; earlier content is not retained
    pub fn edit(&mut self, content: String, at: DateTime<Utc>) {
        self.content = content;
        self.edited_at = Some(at);
    }

    /// Tombstone the message, keeping the row for ordering continuity
    pub fn tombstone(&mut self) {
        self.is_deleted = true;
        self.content.clear();
        self.attachments.clear();
        self.reactions.clear();
    }

    /// Preview used by conversation listings
    pub fn preview(&self) -> MessagePreview {
        MessagePreview {
            message_id: self.id,
            sender_id: self.sender_id,
            snippet: if self.is_deleted {
                String::new()
            } else {
                snippet(&self.content, PREVIEW_LEN)
            },
            created_at: self.created_at,
        }
    }

    /// Reply preview for messages quoting this one
    pub fn reply_preview(&self) -> ReplyPreview {
        ReplyPreview {
            message_id: self.id,
            sender_name: self.sender_name.clone(),
            snippet: snippet(&self.content, PREVIEW_LEN),
        }
    }
}

/// Truncate to at most `max_chars` characters on a char boundary
fn snippet(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((end, _)) => content[..end].to_string(),
        None => content.to_string(),
    }
}

/// Opaque attachment descriptor; file storage is handled elsewhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

impl Attachment {
    /// Check if attachment is an image
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Quoted message shown above a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub message_id: Snowflake,
    pub sender_name: String,
    pub snippet: String,
}

/// Last-message preview shown in conversation listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub message_id: Snowflake,
    pub sender_id: Snowflake,
    pub snippet: String,
    pub created_at: DateTime<Utc>,
}
