//! Conversation store port - authoritative history, conversations, and unread counters
//!
//! The domain layer defines what it needs, and the infrastructure layer
//! provides the implementation.

use async_trait::async_trait;

use crate::entities::{Attachment, Conversation, Message, UserSummary};
use crate::error::DomainError;
use crate::protocol::UnreadCount;
use crate::value_objects::Snowflake;

/// Result type for store operations
pub type StoreResult<T> = Result<T, DomainError>;

/// A message accepted by the gateway, before the store sequences it
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Snowflake,
    pub conversation_id: Snowflake,
    pub sender: UserSummary,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Id of the message being replied to
    pub reply_to: Option<Snowflake>,
    /// Client reference of the send, unique per sender and conversation
    pub temp_id: Option<String>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Find conversation by ID
    async fn find_conversation(&self, id: Snowflake) -> StoreResult<Option<Conversation>>;

    /// List every conversation the user may access
    async fn conversations_for(&self, user_id: Snowflake) -> StoreResult<Vec<Conversation>>;

    /// Insert a new conversation
    async fn insert_conversation(&self, conversation: &Conversation) -> StoreResult<()>;

    /// Return the existing direct thread for the candidate's participant pair,
    /// or insert the candidate; the flag reports whether it was created
    async fn find_or_create_direct(
        &self,
        candidate: Conversation,
    ) -> StoreResult<(Conversation, bool)>;

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message, assigning the next per-conversation sequence number
    /// and updating the conversation's last-message preview
    async fn append_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// Find the message a sender already submitted with `temp_id`
    async fn find_by_temp_id(
        &self,
        conversation_id: Snowflake,
        sender_id: Snowflake,
        temp_id: &str,
    ) -> StoreResult<Option<Message>>;

    /// Find message by ID
    async fn find_message(&self, id: Snowflake) -> StoreResult<Option<Message>>;

    /// Overwrite a stored message (edit, tombstone, reactions)
    async fn update_message(&self, message: &Message) -> StoreResult<()>;

    /// Most recent messages of a conversation, oldest first
    async fn recent_messages(
        &self,
        conversation_id: Snowflake,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;

    // ------------------------------------------------------------------
    // Unread counters
    // ------------------------------------------------------------------

    /// Increment a user's unread counter; returns the new value
    async fn increment_unread(&self, conversation_id: Snowflake, user_id: Snowflake)
    -> StoreResult<u32>;

    /// Reset a user's unread counter to zero
    async fn reset_unread(&self, conversation_id: Snowflake, user_id: Snowflake) -> StoreResult<()>;

    /// Non-zero unread counters for a user
    async fn unread_for(&self, user_id: Snowflake) -> StoreResult<Vec<UnreadCount>>;
}
